//! 레지스트리 모델을 사용한 예측 서비스.
//!
//! 불러온 모델은 (symbol, version) 키로 캐시하며, 용량을 넘으면 가장 먼저
//! 들어온 항목을 내보냅니다.

use crate::ml::error::{MlError, MlResult};
use crate::ml::features::{normalize_features, LABEL_RANGE};
use crate::ml::registry::{ModelRegistry, ModelVersion};
use crate::ml::types::FeatureSet;
use crosswatch_core::PredictionOutcome;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// 95% 구간 계수.
const Z_95: f64 = 1.96;

type CacheKey = (String, String);

/// 삽입 순서 기반 모델 캐시.
#[derive(Debug)]
struct ModelCache {
    capacity: usize,
    entries: HashMap<CacheKey, Arc<ModelVersion>>,
    order: VecDeque<CacheKey>,
}

impl ModelCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<ModelVersion>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, model: Arc<ModelVersion>) {
        if self.entries.insert(key.clone(), model).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn remove_symbol(&mut self, symbol: &str) {
        self.entries.retain(|(s, _), _| s != symbol);
        self.order.retain(|(s, _)| s != symbol);
    }
}

/// 단일 모델/앙상블 예측 서비스.
#[derive(Debug)]
pub struct PredictionService {
    registry: Arc<ModelRegistry>,
    cache: Mutex<ModelCache>,
}

impl PredictionService {
    pub fn new(registry: Arc<ModelRegistry>, cache_capacity: usize) -> Self {
        Self {
            registry,
            cache: Mutex::new(ModelCache::new(cache_capacity)),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// 단일 모델로 예측합니다.
    ///
    /// 유한하지 않은 feature는 정규화 범위의 중간값으로 대체되며 예측을 막지
    /// 않습니다.
    ///
    /// # 인자
    /// * `version` - `None`이면 최신 버전
    ///
    /// # 에러
    /// * `NoModel` - 심볼에 모델이 없음
    /// * `VersionNotFound` - 지정한 버전이 없음
    pub fn predict(
        &self,
        symbol: &str,
        features: &FeatureSet,
        version: Option<&str>,
    ) -> MlResult<PredictionOutcome> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self
                .registry
                .latest_version(symbol)?
                .ok_or_else(|| MlError::NoModel(symbol.to_string()))?,
        };
        let model = self.model(symbol, &version)?;

        let value = predict_value(&model, features)?;
        let std_dev = model.metrics.std_dev;
        let confidence = if value == 0.0 && std_dev == 0.0 {
            0.0
        } else {
            100.0 * value.abs() / (value.abs() + std_dev)
        };

        Ok(PredictionOutcome {
            value,
            lower: value - Z_95 * std_dev,
            upper: value + Z_95 * std_dev,
            confidence,
            std_dev,
            version,
            models_used: 1,
        })
    }

    /// 최근 `size`개 버전의 가중 평균으로 예측합니다.
    ///
    /// 최신 버전부터 N, N-1, …, 1의 가중치를 주며, 불러올 수 없는 버전은 건너뜁니다.
    /// 표준편차는 모델 예측값들의 가중 분산에서 구합니다.
    ///
    /// # 에러
    /// * `NoModel` - 심볼에 버전이 하나도 없음
    /// * 모든 버전이 실패하면 마지막 버전의 에러
    pub fn predict_ensemble(
        &self,
        symbol: &str,
        features: &FeatureSet,
        size: usize,
    ) -> MlResult<PredictionOutcome> {
        let versions = self.registry.recent_versions(symbol, size.max(1))?;
        if versions.is_empty() {
            return Err(MlError::NoModel(symbol.to_string()));
        }

        let mut predictions = Vec::with_capacity(versions.len());
        let mut last_error = None;
        for version in &versions {
            match self
                .model(symbol, version)
                .and_then(|model| predict_value(&model, features))
            {
                Ok(value) => predictions.push((version.clone(), value)),
                Err(e) => {
                    warn!(symbol = %symbol, version = %version, error = %e, "Ensemble member skipped");
                    last_error = Some(e);
                }
            }
        }

        let Some((newest, _)) = predictions.first().cloned() else {
            return Err(last_error.unwrap_or_else(|| MlError::NoModel(symbol.to_string())));
        };

        let n = predictions.len();
        let weights: Vec<f64> = (0..n).map(|i| (n - i) as f64).collect();
        let total: f64 = weights.iter().sum();

        let value = predictions
            .iter()
            .zip(&weights)
            .map(|((_, p), w)| p * w)
            .sum::<f64>()
            / total;
        let dispersion = (predictions
            .iter()
            .zip(&weights)
            .map(|((_, p), w)| w * (p - value).powi(2))
            .sum::<f64>()
            / total)
            .sqrt();

        debug!(symbol = %symbol, models = n, value, dispersion, "Ensemble prediction");

        Ok(PredictionOutcome {
            value,
            lower: value - Z_95 * dispersion,
            upper: value + Z_95 * dispersion,
            confidence: 100.0 / (1.0 + dispersion),
            std_dev: dispersion,
            version: newest,
            models_used: n,
        })
    }

    /// 심볼의 캐시 항목을 모두 제거합니다 (재학습 후 호출).
    pub fn invalidate(&self, symbol: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove_symbol(symbol);
    }

    /// 현재 캐시된 모델 수.
    pub fn cached_models(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    fn model(&self, symbol: &str, version: &str) -> MlResult<Arc<ModelVersion>> {
        let key = (symbol.to_string(), version.to_string());
        if let Some(model) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(model);
        }

        let model = Arc::new(self.registry.load(symbol, version)?);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&model));
        Ok(model)
    }
}

/// 정규화 → 추론 → 변화율(%)로 역정규화.
fn predict_value(model: &ModelVersion, features: &FeatureSet) -> MlResult<f64> {
    let normalized = model.network.predict_one(&normalize_features(features))?;
    Ok(LABEL_RANGE.denormalize(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::network::{Activation, Network};
    use crate::ml::training::TrainedModel;
    use crate::ml::types::{ConfidenceInterval, Hyperparameters, PerformanceMetrics, FEATURE_COUNT};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn trained(seed: u64, std_dev: f64) -> TrainedModel {
        let mut rng = StdRng::seed_from_u64(seed);
        TrainedModel {
            network: Network::new(FEATURE_COUNT, &[4], Activation::Tanh, &mut rng),
            hyperparameters: Hyperparameters::degraded(),
            metrics: PerformanceMetrics {
                mean_absolute_error: 1.0,
                direction_accuracy: 0.5,
                confidence_interval_95: ConfidenceInterval {
                    lower: 0.8,
                    upper: 1.2,
                },
                std_dev,
                sample_count: 20,
            },
            trials: Vec::new(),
            degraded: false,
            training_samples: 80,
        }
    }

    fn features() -> FeatureSet {
        FeatureSet {
            ema_diff: 1.2,
            rsi: 61.0,
            macd_hist: 0.05,
            bb_width: 3.5,
            atr: 1.1,
            volume_change: 20.0,
        }
    }

    fn service(dir: &TempDir, capacity: usize) -> PredictionService {
        PredictionService::new(Arc::new(ModelRegistry::new(dir.path())), capacity)
    }

    #[test]
    fn test_single_prediction_bounds() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 50);
        let version = service.registry().persist("BTCUSDT", &trained(1, 2.0)).unwrap();

        let outcome = service.predict("BTCUSDT", &features(), None).unwrap();
        assert_eq!(outcome.version, version);
        assert_eq!(outcome.models_used, 1);
        assert!((outcome.upper - outcome.value - 1.96 * 2.0).abs() < 1e-9);
        assert!((outcome.value - outcome.lower - 1.96 * 2.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&outcome.confidence));
        assert!((-20.0..=20.0).contains(&outcome.value));
    }

    #[test]
    fn test_no_model_and_missing_version() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 50);

        assert!(matches!(
            service.predict("BTCUSDT", &features(), None),
            Err(MlError::NoModel(_))
        ));
        service.registry().persist("BTCUSDT", &trained(1, 1.0)).unwrap();
        assert!(matches!(
            service.predict("BTCUSDT", &features(), Some("19990101T000000_000")),
            Err(MlError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_nan_feature_predicts_as_midpoint() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 50);
        for seed in 0..2 {
            service.registry().persist("BTCUSDT", &trained(seed, 1.0)).unwrap();
        }

        let mut missing = features();
        missing.rsi = f64::NAN;
        let mut midpoint = features();
        midpoint.rsi = 50.0;

        let a = service.predict("BTCUSDT", &missing, None).unwrap();
        let b = service.predict("BTCUSDT", &midpoint, None).unwrap();
        assert!(a.value.is_finite());
        assert!((a.value - b.value).abs() < 1e-12);

        let a = service.predict_ensemble("BTCUSDT", &missing, 5).unwrap();
        let b = service.predict_ensemble("BTCUSDT", &midpoint, 5).unwrap();
        assert_eq!(a.models_used, 2);
        assert!((a.value - b.value).abs() < 1e-12);
    }

    #[test]
    fn test_ensemble_reports_member_error_when_all_fail() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 50);
        assert!(matches!(
            service.predict_ensemble("BTCUSDT", &features(), 5),
            Err(MlError::NoModel(_))
        ));

        let version = service.registry().persist("BTCUSDT", &trained(1, 1.0)).unwrap();
        std::fs::write(
            dir.path()
                .join("BTCUSDT")
                .join(&version)
                .join(crate::ml::registry::WEIGHTS_FILE),
            b"[]",
        )
        .unwrap();

        assert!(matches!(
            service.predict_ensemble("BTCUSDT", &features(), 5),
            Err(MlError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_ensemble_of_identical_models_has_zero_dispersion() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 50);
        let mut newest = String::new();
        for _ in 0..3 {
            newest = service.registry().persist("ETHUSDT", &trained(9, 1.0)).unwrap();
        }

        let outcome = service.predict_ensemble("ETHUSDT", &features(), 5).unwrap();
        let single = service.predict("ETHUSDT", &features(), None).unwrap();

        assert_eq!(outcome.models_used, 3);
        assert_eq!(outcome.version, newest);
        assert!(outcome.std_dev.abs() < 1e-12);
        assert!((outcome.confidence - 100.0).abs() < 1e-9);
        assert!((outcome.value - single.value).abs() < 1e-12);
    }

    #[test]
    fn test_ensemble_limited_to_size() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 50);
        for seed in 0..4 {
            service.registry().persist("BTCUSDT", &trained(seed, 1.0)).unwrap();
        }
        let outcome = service.predict_ensemble("BTCUSDT", &features(), 2).unwrap();
        assert_eq!(outcome.models_used, 2);
        assert!(outcome.confidence > 0.0 && outcome.confidence <= 100.0);
    }

    #[test]
    fn test_cache_evicts_oldest_and_invalidates() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, 2);
        let versions: Vec<String> = (0..3)
            .map(|seed| service.registry().persist("BTCUSDT", &trained(seed, 1.0)).unwrap())
            .collect();

        for version in &versions {
            service.predict("BTCUSDT", &features(), Some(version)).unwrap();
        }
        assert_eq!(service.cached_models(), 2);

        service.invalidate("BTCUSDT");
        assert_eq!(service.cached_models(), 0);
    }
}
