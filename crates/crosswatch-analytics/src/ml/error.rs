//! ML 모듈 에러 타입.

use thiserror::Error;

/// 모델 수명주기 작업에서 발생할 수 있는 에러.
#[derive(Debug, Error)]
pub enum MlError {
    /// 유효하지 않은 입력 (결측/비유한 feature 등)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 학습을 위한 데이터 부족
    #[error("Insufficient data: need {required} samples, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// 메모리 상한 초과로 학습 보류
    #[error("Resource exhausted: process memory {used_bytes} bytes exceeds {limit_bytes}")]
    ResourceExhausted { used_bytes: u64, limit_bytes: u64 },

    /// 학습 실패 (발산 등)
    #[error("Training error: {0}")]
    Training(String),

    /// 모델 버전 없음
    #[error("Model version not found: {symbol}/{version}")]
    VersionNotFound { symbol: String, version: String },

    /// 심볼에 학습된 모델이 없음
    #[error("No model for symbol: {0}")]
    NoModel(String),

    /// 저장된 파일 손상
    #[error("Corrupted artifact {path}: {reason}")]
    Corrupted { path: String, reason: String },

    /// 파일 입출력 에러
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 직렬화 에러
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// ML 작업을 위한 Result 타입.
pub type MlResult<T> = Result<T, MlError>;

impl MlError {
    /// 이 에러가 복구 가능한지 확인 (나중에 다른 데이터로 재시도 가능).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MlError::InsufficientData { .. }
                | MlError::InvalidInput(_)
                | MlError::ResourceExhausted { .. }
        )
    }

    /// 배치 작업에서 실패가 아닌 "보류"로 집계할지 여부.
    pub fn is_deferral(&self) -> bool {
        matches!(self, MlError::ResourceExhausted { .. })
    }

    /// 데이터 부족으로 "수행하지 않음"인지 여부.
    pub fn is_not_performed(&self) -> bool {
        matches!(self, MlError::InsufficientData { .. })
    }
}
