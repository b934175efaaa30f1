//! 심볼별 학습 데이터 저장소.
//!
//! 포인트는 월별 JSONL 파일(`<root>/<SYMBOL>/<YYYY-MM>.jsonl`)에 추가 기록되고,
//! 레이블은 같은 파일에 별도 레코드로 덧붙입니다. 시작 시 파일을 재생해
//! 메모리 버퍼를 복원하며, 심볼당 최근 `buffer_cap`개만 메모리에 둡니다.

use crate::ml::error::{MlError, MlResult};
use crate::ml::types::{FeaturePoint, TrainingSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// JSONL 한 줄.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoreRecord {
    Point(FeaturePoint),
    Label {
        timestamp: DateTime<Utc>,
        label: f64,
    },
}

/// 레이블 기록 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    /// 새로 기록됨
    Recorded,
    /// 이미 레이블이 있어 무시됨
    AlreadyLabeled,
    /// 버퍼에 없는 포인트
    Unknown,
}

/// 파일 기반 학습 데이터 저장소.
#[derive(Debug)]
pub struct TrainingStore {
    root: PathBuf,
    buffer_cap: usize,
    buffers: Mutex<HashMap<String, VecDeque<FeaturePoint>>>,
}

impl TrainingStore {
    /// 저장소를 열고 기존 파일로 버퍼를 복원합니다.
    pub async fn open(root: impl Into<PathBuf>, buffer_cap: usize) -> MlResult<Self> {
        if buffer_cap == 0 {
            return Err(MlError::InvalidInput("buffer_cap must be positive".to_string()));
        }
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let buffers = hydrate(&root, buffer_cap).await?;
        let total: usize = buffers.values().map(VecDeque::len).sum();
        info!(
            root = %root.display(),
            symbols = buffers.len(),
            points = total,
            "Training store hydrated"
        );

        Ok(Self {
            root,
            buffer_cap,
            buffers: Mutex::new(buffers),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 포인트를 기록하고 버퍼에 추가합니다.
    ///
    /// 같은 (symbol, timestamp)가 이미 있으면 아무 것도 하지 않고 `false`를 반환합니다.
    ///
    /// # 에러
    /// * `InvalidInput` - 심볼이 비었거나 feature가 유한하지 않음
    pub async fn append(&self, point: FeaturePoint) -> MlResult<bool> {
        if point.symbol.is_empty() {
            return Err(MlError::InvalidInput("empty symbol".to_string()));
        }
        point.features.validate()?;

        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(point.symbol.clone()).or_default();
        if buffer.iter().any(|p| p.timestamp == point.timestamp) {
            debug!(symbol = %point.symbol, timestamp = %point.timestamp, "Duplicate point ignored");
            return Ok(false);
        }

        let path = self.file_for(&point.symbol, point.timestamp);
        append_record(&path, &StoreRecord::Point(point.clone())).await?;

        buffer.push_back(point);
        while buffer.len() > self.buffer_cap {
            buffer.pop_front();
        }
        Ok(true)
    }

    /// 포인트에 레이블을 한 번만 기록합니다.
    ///
    /// 이미 레이블이 있으면 경고만 남기고 기존 값을 유지합니다.
    pub async fn set_label(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        label: f64,
    ) -> MlResult<LabelOutcome> {
        if !label.is_finite() {
            return Err(MlError::InvalidInput(format!("label is not finite: {}", label)));
        }

        let mut buffers = self.buffers.lock().await;
        let Some(point) = buffers
            .get_mut(symbol)
            .and_then(|buffer| buffer.iter_mut().find(|p| p.timestamp == timestamp))
        else {
            warn!(symbol = %symbol, timestamp = %timestamp, "Label for unknown point dropped");
            return Ok(LabelOutcome::Unknown);
        };

        if let Some(existing) = point.label {
            warn!(
                symbol = %symbol,
                timestamp = %timestamp,
                existing,
                "Point already labeled; keeping first label"
            );
            return Ok(LabelOutcome::AlreadyLabeled);
        }

        let path = self.file_for(symbol, timestamp);
        append_record(&path, &StoreRecord::Label { timestamp, label }).await?;
        point.label = Some(label);
        Ok(LabelOutcome::Recorded)
    }

    /// 레이블된 샘플 (시간순).
    pub async fn labeled_samples(&self, symbol: &str) -> Vec<TrainingSample> {
        let buffers = self.buffers.lock().await;
        let mut points: Vec<&FeaturePoint> = buffers
            .get(symbol)
            .map(|b| b.iter().filter(|p| p.is_labeled()).collect())
            .unwrap_or_default();
        points.sort_by_key(|p| p.timestamp);
        points.into_iter().filter_map(TrainingSample::from_point).collect()
    }

    /// 레이블 대기 중인 포인트 (모든 심볼).
    pub async fn unlabeled_points(&self) -> Vec<FeaturePoint> {
        let buffers = self.buffers.lock().await;
        buffers
            .values()
            .flat_map(|b| b.iter().filter(|p| !p.is_labeled()).cloned())
            .collect()
    }

    /// 데이터가 있는 심볼 (정렬됨).
    pub async fn symbols(&self) -> Vec<String> {
        let buffers = self.buffers.lock().await;
        let mut symbols: Vec<String> = buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// 심볼의 버퍼 크기.
    pub async fn len(&self, symbol: &str) -> usize {
        self.buffers
            .lock()
            .await
            .get(symbol)
            .map_or(0, VecDeque::len)
    }

    fn file_for(&self, symbol: &str, timestamp: DateTime<Utc>) -> PathBuf {
        self.root
            .join(symbol)
            .join(format!("{}.jsonl", timestamp.format("%Y-%m")))
    }
}

async fn append_record(path: &Path, record: &StoreRecord) -> MlResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

/// 디스크의 모든 심볼 파일을 재생합니다.
async fn hydrate(
    root: &Path,
    buffer_cap: usize,
) -> MlResult<HashMap<String, VecDeque<FeaturePoint>>> {
    let mut buffers = HashMap::new();

    let mut symbols = fs::read_dir(root).await?;
    while let Some(entry) = symbols.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let symbol = entry.file_name().to_string_lossy().to_string();
        let points = replay_symbol(&entry.path(), &symbol).await?;

        let skip = points.len().saturating_sub(buffer_cap);
        let buffer: VecDeque<FeaturePoint> = points.into_iter().skip(skip).collect();
        if !buffer.is_empty() {
            buffers.insert(symbol, buffer);
        }
    }

    Ok(buffers)
}

async fn replay_symbol(dir: &Path, symbol: &str) -> MlResult<Vec<FeaturePoint>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    files.sort();

    let mut points: Vec<FeaturePoint> = Vec::new();
    for file in files {
        let content = match fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreRecord>(line) {
                Ok(StoreRecord::Point(point)) => {
                    if point.symbol != symbol {
                        warn!(file = %file.display(), line = line_no + 1, "Point for another symbol skipped");
                        continue;
                    }
                    if !points.iter().any(|p| p.timestamp == point.timestamp) {
                        points.push(point);
                    }
                }
                Ok(StoreRecord::Label { timestamp, label }) => {
                    match points.iter_mut().find(|p| p.timestamp == timestamp) {
                        Some(point) if point.label.is_none() => point.label = Some(label),
                        Some(_) => {}
                        None => debug!(symbol = %symbol, timestamp = %timestamp, "Orphan label skipped"),
                    }
                }
                Err(e) => warn!(
                    file = %file.display(),
                    line = line_no + 1,
                    error = %e,
                    "Corrupted record skipped"
                ),
            }
        }
    }

    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::types::{FeatureSet, RawOhlcv};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn point(symbol: &str, minutes: i64) -> FeaturePoint {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap()
            + Duration::minutes(minutes);
        FeaturePoint::new(
            symbol,
            timestamp,
            RawOhlcv {
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100.5),
                volume: dec!(1000),
            },
            FeatureSet {
                ema_diff: 0.5,
                rsi: 52.0,
                macd_hist: 0.01,
                bb_width: 2.0,
                atr: 0.7,
                volume_change: 5.0,
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_label_once() {
        let dir = TempDir::new().unwrap();
        let store = TrainingStore::open(dir.path(), 1000).await.unwrap();
        let p = point("BTCUSDT", 0);

        assert!(store.append(p.clone()).await.unwrap());
        assert!(!store.append(p.clone()).await.unwrap());

        let first = store.set_label("BTCUSDT", p.timestamp, 1.5).await.unwrap();
        let second = store.set_label("BTCUSDT", p.timestamp, -3.0).await.unwrap();
        assert_eq!(first, LabelOutcome::Recorded);
        assert_eq!(second, LabelOutcome::AlreadyLabeled);

        let samples = store.labeled_samples("BTCUSDT").await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].label, 1.5);
    }

    #[tokio::test]
    async fn test_label_for_unknown_point() {
        let dir = TempDir::new().unwrap();
        let store = TrainingStore::open(dir.path(), 10).await.unwrap();
        let outcome = store.set_label("BTCUSDT", Utc::now(), 1.0).await.unwrap();
        assert_eq!(outcome, LabelOutcome::Unknown);
        assert!(store.set_label("BTCUSDT", Utc::now(), f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_features_rejected() {
        let dir = TempDir::new().unwrap();
        let store = TrainingStore::open(dir.path(), 10).await.unwrap();
        let mut p = point("BTCUSDT", 0);
        p.features.rsi = f64::NAN;

        assert!(store.append(p).await.is_err());
        assert_eq!(store.len("BTCUSDT").await, 0);
    }

    #[tokio::test]
    async fn test_buffer_cap_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let store = TrainingStore::open(dir.path(), 3).await.unwrap();
        for i in 0..5 {
            store.append(point("ETHUSDT", i * 15)).await.unwrap();
        }

        assert_eq!(store.len("ETHUSDT").await, 3);
        let unlabeled = store.unlabeled_points().await;
        assert_eq!(unlabeled.first().map(|p| p.timestamp), Some(point("ETHUSDT", 30).timestamp));
    }

    #[tokio::test]
    async fn test_hydration_restores_points_and_first_label() {
        let dir = TempDir::new().unwrap();
        {
            let store = TrainingStore::open(dir.path(), 100).await.unwrap();
            // 월 경계를 넘어 두 파일에 기록
            store.append(point("BTCUSDT", 0)).await.unwrap();
            store.append(point("BTCUSDT", 90)).await.unwrap();
            store
                .set_label("BTCUSDT", point("BTCUSDT", 0).timestamp, 2.0)
                .await
                .unwrap();
        }

        // 손상된 줄과 중복 레이블 추가
        let file = dir.path().join("BTCUSDT").join("2024-01.jsonl");
        let mut content = std::fs::read_to_string(&file).unwrap();
        content.push_str("{broken\n");
        content.push_str(&format!(
            "{{\"type\":\"label\",\"timestamp\":\"{}\",\"label\":9.0}}\n",
            point("BTCUSDT", 0).timestamp.to_rfc3339()
        ));
        std::fs::write(&file, content).unwrap();
        assert!(dir.path().join("BTCUSDT").join("2024-02.jsonl").is_file());

        let store = TrainingStore::open(dir.path(), 100).await.unwrap();
        assert_eq!(store.len("BTCUSDT").await, 2);
        assert_eq!(store.symbols().await, vec!["BTCUSDT".to_string()]);

        let samples = store.labeled_samples("BTCUSDT").await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].label, 2.0);
        assert_eq!(store.unlabeled_points().await.len(), 1);
    }
}
