//! 모델 수명주기.
//!
//! 크로스오버 알림에 첨부할 향후 가격 변화율(%)을 예측합니다.
//!
//! ```text
//! 캔들 마감
//!     │
//!     ▼
//! ┌────────────────┐   레이블 (horizon 후 가격 변화율)
//! │ TrainingStore  │ ◄──────────────────────────────
//! └───────┬────────┘
//!         │ labeled samples
//!         ▼
//! ┌────────────────┐   MemoryGuard
//! │ Trainer        │ ← 하이퍼파라미터 탐색 + 80/20 평가
//! └───────┬────────┘
//!         ▼
//! ┌────────────────┐
//! │ ModelRegistry  │ ← 버전 저장, prune, compare
//! └───────┬────────┘
//!         ▼
//! ┌────────────────┐
//! │ Prediction     │ ← 캐시, 단일/앙상블 예측
//! │ Service        │
//! └────────────────┘
//! ```

pub mod error;
pub mod features;
pub mod guard;
pub mod network;
pub mod predictor;
pub mod registry;
pub mod store;
pub mod training;
pub mod types;

pub use error::{MlError, MlResult};
pub use features::{normalize_features, FeatureExtractor, FeatureRange, LABEL_RANGE};
pub use guard::{FixedMemoryProbe, MemoryGuard, MemoryProbe, ProcessMemoryProbe};
pub use network::{Activation, Network};
pub use predictor::PredictionService;
pub use registry::{Manifest, ModelRegistry, ModelVersion};
pub use store::{LabelOutcome, TrainingStore};
pub use training::{evaluate, SearchSpace, TrainedModel, Trainer, TrainerConfig, TrialOutcome};
pub use types::{
    ComparisonReport, ConfidenceInterval, FeaturePoint, FeatureSet, Hyperparameters,
    PerformanceMetrics, RawOhlcv, TrainingSample, FEATURE_COUNT, FEATURE_NAMES,
};
