//! 심볼별 버전 관리 모델 저장소.
//!
//! ```text
//! models/
//! └── BTCUSDT/
//!     ├── latest.json                  ← {"version", "updated_at"}
//!     ├── 20240101T000000_000/
//!     │   ├── weights.json
//!     │   ├── hyperparameters.json
//!     │   ├── features.json
//!     │   └── metrics.json
//!     └── 20240101T060000_000/
//! ```
//!
//! 버전 디렉토리는 임시 디렉토리에 모두 기록한 뒤 rename하므로,
//! 읽는 쪽은 완성된 버전만 보게 됩니다. 매니페스트도 임시 파일 후 rename합니다.
//! 학습 경로에서 `spawn_blocking`으로 호출되므로 동기 파일 I/O를 사용합니다.

use crate::ml::error::{MlError, MlResult};
use crate::ml::network::Network;
use crate::ml::training::{evaluate, holdout_len, TrainedModel, TEST_PERCENT};
use crate::ml::types::{
    ComparisonReport, Hyperparameters, PerformanceMetrics, TrainingSample, FEATURE_NAMES,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const WEIGHTS_FILE: &str = "weights.json";
pub const HYPERPARAMETERS_FILE: &str = "hyperparameters.json";
pub const FEATURES_FILE: &str = "features.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const MANIFEST_FILE: &str = "latest.json";

/// 버전 ID 형식 (UTC, 밀리초 포함). 사전순 = 시간순.
pub const VERSION_FORMAT: &str = "%Y%m%dT%H%M%S_%3f";

const TMP_PREFIX: &str = ".tmp-";

/// 심볼별 최신 버전 포인터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

/// 디스크에서 읽은 모델 버전 하나.
#[derive(Debug, Clone)]
pub struct ModelVersion {
    pub symbol: String,
    pub version: String,
    pub network: Network,
    pub hyperparameters: Hyperparameters,
    pub features: Vec<String>,
    pub metrics: PerformanceMetrics,
}

/// 파일 시스템 기반 모델 레지스트리.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(symbol)
    }

    // ==================== 쓰기 ====================

    /// 학습된 모델을 새 버전으로 저장하고 최신 포인터를 갱신합니다.
    ///
    /// # 반환
    /// 생성된 버전 ID
    pub fn persist(&self, symbol: &str, model: &TrainedModel) -> MlResult<String> {
        let dir = self.symbol_dir(symbol);
        fs::create_dir_all(&dir)?;

        let version = self.next_version_id(symbol)?;
        let staging = dir.join(format!("{}{}", TMP_PREFIX, version));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let features: Vec<&str> = FEATURE_NAMES.to_vec();
        write_json(&staging.join(WEIGHTS_FILE), &model.network)?;
        write_json(&staging.join(HYPERPARAMETERS_FILE), &model.hyperparameters)?;
        write_json(&staging.join(FEATURES_FILE), &features)?;
        write_json(&staging.join(METRICS_FILE), &model.metrics)?;

        fs::rename(&staging, dir.join(&version))?;

        let manifest = Manifest {
            version: version.clone(),
            updated_at: Utc::now(),
        };
        let tmp_manifest = dir.join(format!("{}{}", TMP_PREFIX, MANIFEST_FILE));
        write_json(&tmp_manifest, &manifest)?;
        fs::rename(&tmp_manifest, dir.join(MANIFEST_FILE))?;

        info!(
            symbol = %symbol,
            version = %version,
            mae = model.metrics.mean_absolute_error,
            "Model version persisted"
        );
        Ok(version)
    }

    /// 현재 시각 기반 버전 ID. 기존 최신 버전보다 항상 큽니다.
    fn next_version_id(&self, symbol: &str) -> MlResult<String> {
        let mut candidate = Utc::now().naive_utc();
        if let Some(last) = self.list_versions(symbol)?.last() {
            if let Ok(last) = NaiveDateTime::parse_from_str(last, VERSION_FORMAT) {
                if candidate <= last {
                    candidate = last + Duration::milliseconds(1);
                }
            }
        }
        Ok(candidate.format(VERSION_FORMAT).to_string())
    }

    /// 최신 `keep`개를 제외한 버전을 삭제합니다.
    ///
    /// 남아 있는 임시 디렉토리도 함께 정리합니다.
    ///
    /// # 반환
    /// 삭제된 버전 ID (오래된 순)
    pub fn prune(&self, symbol: &str, keep: usize) -> MlResult<Vec<String>> {
        if keep == 0 {
            return Err(MlError::InvalidInput("keep must be at least 1".to_string()));
        }

        self.remove_staging_leftovers(symbol)?;

        let versions = self.list_versions(symbol)?;
        if versions.len() <= keep {
            return Ok(Vec::new());
        }

        let removed: Vec<String> = versions[..versions.len() - keep].to_vec();
        for version in &removed {
            fs::remove_dir_all(self.symbol_dir(symbol).join(version))?;
            debug!(symbol = %symbol, version = %version, "Pruned model version");
        }

        info!(symbol = %symbol, removed = removed.len(), kept = keep, "Model versions pruned");
        Ok(removed)
    }

    fn remove_staging_leftovers(&self, symbol: &str) -> MlResult<()> {
        let entries = match fs::read_dir(self.symbol_dir(symbol)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TMP_PREFIX) && entry.path().is_dir() {
                warn!(symbol = %symbol, dir = %name, "Removing unfinished model version");
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    // ==================== 읽기 ====================

    /// 모델이 있는 심볼 목록 (정렬됨).
    pub fn symbols(&self) -> MlResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().is_dir() {
                symbols.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    /// 완성된 버전 목록 (오래된 순).
    pub fn list_versions(&self, symbol: &str) -> MlResult<Vec<String>> {
        let entries = match fs::read_dir(self.symbol_dir(symbol)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TMP_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            if entry.path().join(WEIGHTS_FILE).is_file() {
                versions.push(name);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// 최신 버전부터 최대 `count`개.
    pub fn recent_versions(&self, symbol: &str, count: usize) -> MlResult<Vec<String>> {
        let mut versions = self.list_versions(symbol)?;
        versions.reverse();
        versions.truncate(count);
        Ok(versions)
    }

    /// 최신 버전 ID.
    ///
    /// 매니페스트가 없거나 손상되었거나 없는 버전을 가리키면
    /// 디렉토리 목록의 마지막 버전을 사용합니다.
    pub fn latest_version(&self, symbol: &str) -> MlResult<Option<String>> {
        let path = self.symbol_dir(symbol).join(MANIFEST_FILE);
        match read_json::<Manifest>(&path) {
            Ok(manifest) => {
                if self
                    .symbol_dir(symbol)
                    .join(&manifest.version)
                    .join(WEIGHTS_FILE)
                    .is_file()
                {
                    return Ok(Some(manifest.version));
                }
                warn!(symbol = %symbol, version = %manifest.version, "Manifest points to missing version");
            }
            Err(MlError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(symbol = %symbol, error = %e, "Ignoring unreadable manifest"),
        }
        Ok(self.list_versions(symbol)?.pop())
    }

    /// 특정 버전을 읽습니다.
    ///
    /// # 에러
    /// * `VersionNotFound` - 버전 디렉토리가 없음
    /// * `Corrupted` - 파일을 해석할 수 없거나 feature 목록이 다름
    pub fn load(&self, symbol: &str, version: &str) -> MlResult<ModelVersion> {
        let dir = self.symbol_dir(symbol).join(version);
        if version.starts_with(TMP_PREFIX) || !dir.join(WEIGHTS_FILE).is_file() {
            return Err(MlError::VersionNotFound {
                symbol: symbol.to_string(),
                version: version.to_string(),
            });
        }

        let network: Network = read_artifact(&dir.join(WEIGHTS_FILE))?;
        let hyperparameters: Hyperparameters = read_artifact(&dir.join(HYPERPARAMETERS_FILE))?;
        let features: Vec<String> = read_artifact(&dir.join(FEATURES_FILE))?;
        let metrics: PerformanceMetrics = read_artifact(&dir.join(METRICS_FILE))?;

        if features.iter().map(String::as_str).ne(FEATURE_NAMES.iter().copied())
            || network.input_size() != FEATURE_NAMES.len()
        {
            return Err(MlError::Corrupted {
                path: dir.join(FEATURES_FILE).display().to_string(),
                reason: format!("unexpected feature list {:?}", features),
            });
        }

        Ok(ModelVersion {
            symbol: symbol.to_string(),
            version: version.to_string(),
            network,
            hyperparameters,
            features,
            metrics,
        })
    }

    /// 최신 버전을 읽습니다. 없으면 `NoModel`.
    pub fn load_latest(&self, symbol: &str) -> MlResult<ModelVersion> {
        let version = self
            .latest_version(symbol)?
            .ok_or_else(|| MlError::NoModel(symbol.to_string()))?;
        self.load(symbol, &version)
    }

    // ==================== 비교 ====================

    /// 두 버전을 같은 평가 구간(시간순 마지막 20%)에서 비교합니다.
    ///
    /// 점수가 같으면 A가 승자입니다.
    pub fn compare(
        &self,
        symbol: &str,
        version_a: &str,
        version_b: &str,
        samples: &[TrainingSample],
    ) -> MlResult<ComparisonReport> {
        let a = self.load(symbol, version_a)?;
        let b = self.load(symbol, version_b)?;

        let test = &samples[samples.len() - holdout_len(samples.len(), TEST_PERCENT)..];
        let metrics_a = evaluate(&a.network, test)?;
        let metrics_b = evaluate(&b.network, test)?;

        let (score_a, score_b) = (metrics_a.score(), metrics_b.score());
        let (winner, best, worst) = if score_a >= score_b {
            (version_a, score_a, score_b)
        } else {
            (version_b, score_b, score_a)
        };

        Ok(ComparisonReport {
            symbol: symbol.to_string(),
            version_a: version_a.to_string(),
            version_b: version_b.to_string(),
            metrics_a,
            metrics_b,
            winner: winner.to_string(),
            improvement_pct: relative_improvement(best, worst),
        })
    }
}

/// 패자 점수 대비 승자 점수의 개선율 (%).
///
/// 패자 점수가 0이면 점수 차이 × 100을 사용합니다.
pub fn relative_improvement(winner: f64, loser: f64) -> f64 {
    if loser.abs() < f64::EPSILON {
        (winner - loser) * 100.0
    } else {
        (winner - loser) / loser.abs() * 100.0
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> MlResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> MlResult<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// 버전 구성 파일을 읽습니다. 해석 실패는 `Corrupted`.
fn read_artifact<T: DeserializeOwned>(path: &Path) -> MlResult<T> {
    read_json(path).map_err(|e| match e {
        MlError::Serialization(e) => MlError::Corrupted {
            path: path.display().to_string(),
            reason: e.to_string(),
        },
        MlError::Io(e) if e.kind() == ErrorKind::NotFound => MlError::Corrupted {
            path: path.display().to_string(),
            reason: "missing file".to_string(),
        },
        other => other,
    })
}
