//! 기본 알림 전송기.
//!
//! - [`LogSink`]: 알림을 구조화 로그로 남깁니다.
//! - [`ChannelSink`]: 알림을 채널로 넘겨 다른 컴포넌트(또는 테스트)가 소비합니다.

use crate::types::{
    AlertEvent, Notification, NotificationError, NotificationResult, NotificationSender,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// tracing 로그 전송기.
#[derive(Debug, Clone)]
pub struct LogSink {
    enabled: bool,
}

impl Default for LogSink {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl LogSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl NotificationSender for LogSink {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        let payload = serde_json::to_string(&notification.event)?;

        match &notification.event {
            AlertEvent::Crossover(alert) => info!(
                id = %notification.id,
                symbol = %alert.symbol,
                direction = %alert.direction,
                price = %alert.price,
                indicator = %alert.indicator,
                difference_pct = %alert.difference_pct.round_dp(2),
                prediction = ?alert.prediction.as_ref().map(|p| p.value),
                "Crossover alert"
            ),
            AlertEvent::NewSymbol { symbol, volume, .. } => info!(
                id = %notification.id,
                symbol = %symbol,
                volume = %volume,
                "New symbol tracked"
            ),
            AlertEvent::TrainingComplete(report) => info!(
                id = %notification.id,
                success = report.success,
                failed = report.failed,
                skipped = report.skipped,
                deferred = report.deferred,
                "Training batch complete"
            ),
        }
        debug!(payload = %payload, "Notification payload");
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// mpsc 채널 전송기.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    /// 전송기와 수신 측을 함께 만듭니다.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// 기존 송신자로 전송기를 만듭니다.
    pub fn from_sender(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSender for ChannelSink {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        self.tx
            .send(notification.clone())
            .await
            .map_err(|_| NotificationError::ChannelClosed)
    }

    fn is_enabled(&self) -> bool {
        !self.tx.is_closed()
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosswatch_core::TrainingBatchReport;

    fn event() -> Notification {
        Notification::new(AlertEvent::TrainingComplete(TrainingBatchReport::new()))
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new(4);
        let notification = event();

        sink.send(&notification).await.unwrap();
        assert_eq!(rx.recv().await, Some(notification));
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);

        assert!(!sink.is_enabled());
        assert!(matches!(
            sink.send(&event()).await,
            Err(NotificationError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_log_sink_accepts_all_events() {
        let sink = LogSink::default();
        assert!(sink.is_enabled());
        assert!(sink.send(&event()).await.is_ok());
    }
}
