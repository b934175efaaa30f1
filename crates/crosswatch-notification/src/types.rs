//! 알림 이벤트 타입 및 trait 정의.
//!
//! 사람이 읽을 문장은 만들지 않습니다. 구조화된 이벤트만 바깥으로 넘깁니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crosswatch_core::{Crossover, PredictionOutcome, Side, TrainingBatchReport};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 알림 우선순위 레벨.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// 낮은 우선순위 (정보성)
    Low,
    /// 일반 우선순위
    #[default]
    Normal,
    /// 높은 우선순위 (즉시 확인 필요)
    High,
}

/// 크로스오버 알림 내용.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossoverAlert {
    pub symbol: String,
    /// 새 위치 (가격이 지표 위/아래)
    pub direction: Side,
    /// 현재 가격
    pub price: Decimal,
    /// 현재 지표 값
    pub indicator: Decimal,
    /// 지표 대비 가격 차이 (%)
    pub difference_pct: Decimal,
    /// 모델 예측 (없으면 예측 없이 발송)
    pub prediction: Option<PredictionOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl CrossoverAlert {
    /// 정책이 결정한 크로스오버로 알림을 만듭니다.
    pub fn from_crossover(symbol: impl Into<String>, crossover: &Crossover) -> Self {
        Self {
            symbol: symbol.into(),
            direction: crossover.direction,
            price: crossover.price,
            indicator: crossover.indicator,
            difference_pct: crossover.difference_pct,
            prediction: None,
            timestamp: crossover.at,
        }
    }

    /// 예측 결과를 첨부합니다.
    pub fn with_prediction(mut self, prediction: Option<PredictionOutcome>) -> Self {
        self.prediction = prediction;
        self
    }
}

/// 알림 이벤트.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// 가격/지표 크로스오버
    Crossover(CrossoverAlert),
    /// 새로 감시 대상이 된 심볼
    NewSymbol {
        symbol: String,
        /// 24시간 거래대금
        volume: Decimal,
        price: Decimal,
        /// 24시간 변화율 (%)
        change_pct: Decimal,
    },
    /// 학습 배치 완료
    TrainingComplete(TrainingBatchReport),
}

impl AlertEvent {
    /// 이벤트 종류 (직렬화 태그와 같음).
    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::Crossover(_) => "crossover",
            AlertEvent::NewSymbol { .. } => "new_symbol",
            AlertEvent::TrainingComplete(_) => "training_complete",
        }
    }

    /// 이벤트와 관련된 심볼.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            AlertEvent::Crossover(alert) => Some(&alert.symbol),
            AlertEvent::NewSymbol { symbol, .. } => Some(symbol),
            AlertEvent::TrainingComplete(_) => None,
        }
    }

    fn default_priority(&self) -> NotificationPriority {
        match self {
            AlertEvent::Crossover(_) => NotificationPriority::High,
            AlertEvent::NewSymbol { .. } => NotificationPriority::Normal,
            AlertEvent::TrainingComplete(_) => NotificationPriority::Low,
        }
    }
}

/// 알림 메시지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 고유 알림 ID
    pub id: Uuid,
    /// 알림 이벤트
    pub event: AlertEvent,
    /// 우선순위 레벨
    pub priority: NotificationPriority,
    /// 생성 시각
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// 새 알림을 생성합니다. 우선순위는 이벤트 종류에서 정해집니다.
    pub fn new(event: AlertEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: event.default_priority(),
            event,
            timestamp: Utc::now(),
        }
    }

    /// 우선순위 레벨을 설정합니다.
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// 알림 작업용 Result 타입.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// 알림 에러.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("알림 전송 실패: {0}")]
    SendFailed(String),

    #[error("알림 채널이 닫혔습니다")]
    ChannelClosed,

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// 알림 전송기 trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 알림을 전송합니다.
    async fn send(&self, notification: &Notification) -> NotificationResult<()>;

    /// 전송기가 활성화되어 있는지 확인합니다.
    fn is_enabled(&self) -> bool;

    /// 전송기 이름을 반환합니다.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn crossover() -> Crossover {
        Crossover {
            direction: Side::Above,
            price: dec!(10.5),
            indicator: dec!(10),
            difference_pct: dec!(5),
            at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap(),
        }
    }

    #[test]
    fn test_crossover_alert_from_decision() {
        let alert = CrossoverAlert::from_crossover("BTCUSDT", &crossover());
        assert_eq!(alert.symbol, "BTCUSDT");
        assert_eq!(alert.direction, Side::Above);
        assert_eq!(alert.difference_pct, dec!(5));
        assert!(alert.prediction.is_none());
    }

    #[test]
    fn test_event_tagging() {
        let event = AlertEvent::Crossover(CrossoverAlert::from_crossover("BTCUSDT", &crossover()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "crossover");
        assert_eq!(json["direction"], "above");
        assert_eq!(json["symbol"], "BTCUSDT");

        let new_symbol = AlertEvent::NewSymbol {
            symbol: "SOLUSDT".to_string(),
            volume: dec!(75000000),
            price: dec!(140.2),
            change_pct: dec!(3.1),
        };
        assert_eq!(new_symbol.kind(), "new_symbol");
        let json = serde_json::to_value(&new_symbol).unwrap();
        assert_eq!(json["type"], "new_symbol");

        let back: AlertEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, new_symbol);
    }

    #[test]
    fn test_priority_follows_event() {
        let alert = Notification::new(AlertEvent::Crossover(CrossoverAlert::from_crossover(
            "ETHUSDT",
            &crossover(),
        )));
        assert_eq!(alert.priority, NotificationPriority::High);

        let report = Notification::new(AlertEvent::TrainingComplete(TrainingBatchReport::new()));
        assert_eq!(report.priority, NotificationPriority::Low);
        assert_eq!(report.event.symbol(), None);
        assert_eq!(
            report.with_priority(NotificationPriority::Normal).priority,
            NotificationPriority::Normal
        );
    }
}
