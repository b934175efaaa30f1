//! 에러 타입 정의.

use crosswatch_analytics::ml::MlError;
use crosswatch_analytics::IndicatorError;
use crosswatch_core::CrosswatchError;
use crosswatch_exchange::ExchangeError;
use crosswatch_notification::NotificationError;
use thiserror::Error;

/// Collector 에러 타입
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정/핵심 에러
    #[error("설정 에러: {0}")]
    Config(#[from] CrosswatchError),

    /// 시장 데이터 에러
    #[error("시장 데이터 에러: {0}")]
    Exchange(#[from] ExchangeError),

    /// 지표 계산 에러
    #[error("지표 에러: {0}")]
    Indicator(#[from] IndicatorError),

    /// 모델 수명주기 에러
    #[error("모델 에러: {0}")]
    Ml(#[from] MlError),

    /// 알림 에러
    #[error("알림 에러: {0}")]
    Notification(#[from] NotificationError),

    /// 백그라운드 작업 실패
    #[error("작업 실패: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// 내부 채널 종료
    #[error("채널 종료: {0}")]
    ChannelClosed(&'static str),
}

impl CollectorError {
    /// 재시도하면 해결될 수 있는 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Exchange(e) => e.is_retryable(),
            Self::Config(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_errors_keep_retry_semantics() {
        let err = CollectorError::from(ExchangeError::RateLimited);
        assert!(err.is_retryable());

        let err = CollectorError::from(ExchangeError::SymbolNotFound("FOO".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ml_error_display() {
        let err = CollectorError::from(MlError::NoModel("BTCUSDT".to_string()));
        assert_eq!(err.to_string(), "모델 에러: No model for symbol: BTCUSDT");
    }
}
