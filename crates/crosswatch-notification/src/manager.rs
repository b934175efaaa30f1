//! 여러 전송기로 알림을 나눠 보내는 관리자.

use crate::types::{AlertEvent, Notification, NotificationResult, NotificationSender};
use std::sync::Arc;
use tracing::{debug, error};

/// 알림 관리자.
///
/// 하나의 전송기가 실패해도 나머지로는 계속 보냅니다.
#[derive(Default)]
pub struct NotificationManager {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl NotificationManager {
    /// 새 알림 관리자를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 알림 전송기를 추가합니다.
    pub fn add_sender<S: NotificationSender + 'static>(&mut self, sender: S) {
        self.senders.push(Arc::new(sender));
    }

    /// 전송기를 추가한 관리자를 반환합니다.
    pub fn with_sender<S: NotificationSender + 'static>(mut self, sender: S) -> Self {
        self.add_sender(sender);
        self
    }

    /// 등록된 전송기 이름 목록.
    pub fn sender_names(&self) -> Vec<&str> {
        self.senders.iter().map(|s| s.name()).collect()
    }

    /// 활성화된 모든 전송기를 통해 알림을 전송합니다.
    ///
    /// # 에러
    /// 활성화된 전송기가 모두 실패하면 마지막 에러를 반환합니다.
    pub async fn notify(&self, notification: &Notification) -> NotificationResult<()> {
        let mut attempted = 0;
        let mut failed = 0;
        let mut last_error = None;

        for sender in self.senders.iter().filter(|s| s.is_enabled()) {
            attempted += 1;
            if let Err(e) = sender.send(notification).await {
                error!(
                    sender = sender.name(),
                    kind = notification.event.kind(),
                    error = %e,
                    "Failed to send notification"
                );
                failed += 1;
                last_error = Some(e);
            }
        }

        if attempted == 0 {
            debug!(kind = notification.event.kind(), "No enabled notification sender");
        }

        match last_error {
            Some(e) if failed == attempted => Err(e),
            _ => Ok(()),
        }
    }

    /// 이벤트를 알림으로 감싸 전송합니다.
    pub async fn emit(&self, event: AlertEvent) -> NotificationResult<()> {
        self.notify(&Notification::new(event)).await
    }
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("senders", &self.sender_names())
            .finish()
    }
}
