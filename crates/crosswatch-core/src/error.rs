//! 시스템 공통 에러 타입.

use thiserror::Error;

/// 핵심 에러.
#[derive(Debug, Error)]
pub enum CrosswatchError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 입력 검증 에러
    #[error("검증 에러: {0}")]
    Validation(String),

    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 파일 입출력 에러
    #[error("입출력 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 핵심 작업을 위한 Result 타입.
pub type CrosswatchResult<T> = Result<T, CrosswatchError>;

impl CrosswatchError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrosswatchError::Network(_) | CrosswatchError::Io(_))
    }

    /// 시작 단계에서 치명적인 에러인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrosswatchError::Config(_))
    }
}

impl From<serde_json::Error> for CrosswatchError {
    fn from(err: serde_json::Error) -> Self {
        CrosswatchError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for CrosswatchError {
    fn from(err: config::ConfigError) -> Self {
        CrosswatchError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(CrosswatchError::Network("timeout".to_string()).is_retryable());
        assert!(!CrosswatchError::Validation("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(CrosswatchError::Config("ema_period".to_string()).is_fatal());
        assert!(!CrosswatchError::NotFound("BTCUSDT".to_string()).is_fatal());
    }
}
