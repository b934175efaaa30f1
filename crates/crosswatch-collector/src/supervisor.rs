//! 스트림 감독자.
//!
//! 거래대금 기준으로 감시 대상 심볼을 주기적으로 다시 맞추고, 세션 생존을
//! 점검합니다. 심볼별 세션은 감독자가 소유한 레지스트리 하나에만 있으며,
//! 심볼당 열린 세션은 최대 하나입니다.

use crate::error::Result;
use crate::session::{SessionConfig, SessionEvent, SessionHandle, SessionState, SessionStatus, SymbolSession};
use crosswatch_core::AppConfig;
use crosswatch_exchange::{MarketDataProvider, SymbolStats};
use crosswatch_notification::{AlertEvent, NotificationManager};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 한 번의 재조정 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 새로 시작한 심볼
    pub added: Vec<String>,
    /// 닫은 심볼
    pub removed: Vec<String>,
    /// 새 심볼 알림을 보냈는지 (첫 재조정에서는 보내지 않음)
    pub announced: bool,
}

/// 한 번의 생존 점검 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// 태스크가 끝나 새로 띄운 심볼
    pub restarted: Vec<String>,
    /// 메시지가 끊겨 재연결을 요청한 심볼
    pub reconnected: Vec<String>,
}

/// 스트림 감독자.
pub struct StreamSupervisor {
    config: Arc<AppConfig>,
    provider: Arc<dyn MarketDataProvider>,
    notifier: Arc<NotificationManager>,
    events: mpsc::Sender<SessionEvent>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    initialized: AtomicBool,
    cancel: CancellationToken,
}

impl StreamSupervisor {
    /// # 인자
    /// * `events` - 모든 세션이 공유하는 출력 채널
    /// * `cancel` - 감독자와 모든 세션의 종료 신호
    pub fn new(
        config: Arc<AppConfig>,
        provider: Arc<dyn MarketDataProvider>,
        notifier: Arc<NotificationManager>,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            provider,
            notifier,
            events,
            sessions: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            cancel,
        }
    }

    /// 현재 감시 중인 심볼 (정렬됨).
    pub async fn tracked_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// 심볼 세션의 상태.
    pub async fn session_status(&self, symbol: &str) -> Option<SessionStatus> {
        self.sessions.lock().await.get(symbol).map(SessionHandle::status)
    }

    /// 감시 대상 심볼을 거래대금 기준으로 다시 맞춥니다.
    ///
    /// 첫 호출은 세션만 시작하고 새 심볼 알림은 보내지 않습니다.
    ///
    /// # 에러
    /// 심볼 목록 조회에 실패하면 감시 대상은 그대로 두고 에러를 반환합니다.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let eligible = self
            .provider
            .list_eligible_symbols(
                &self.config.stream.quote_asset,
                self.config.stream.volume_threshold,
            )
            .await?;

        let announce = self.initialized.swap(true, Ordering::SeqCst);
        let wanted: HashSet<&str> = eligible.iter().map(|s| s.symbol.as_str()).collect();

        let mut report = ReconcileReport {
            announced: announce,
            ..Default::default()
        };
        let mut closing = Vec::new();
        let mut new_symbols: Vec<&SymbolStats> = Vec::new();

        {
            let mut sessions = self.sessions.lock().await;

            let stale: Vec<String> = sessions
                .keys()
                .filter(|symbol| !wanted.contains(symbol.as_str()))
                .cloned()
                .collect();
            for symbol in stale {
                if let Some(handle) = sessions.remove(&symbol) {
                    closing.push(handle);
                    report.removed.push(symbol);
                }
            }

            for stats in &eligible {
                if sessions.contains_key(&stats.symbol) {
                    continue;
                }
                sessions.insert(stats.symbol.clone(), self.start_session(&stats.symbol));
                report.added.push(stats.symbol.clone());
                new_symbols.push(stats);
            }
        }

        for handle in closing {
            info!(symbol = %handle.symbol(), "Symbol no longer eligible; closing session");
            handle.close().await;
        }

        if announce {
            for stats in new_symbols {
                let event = AlertEvent::NewSymbol {
                    symbol: stats.symbol.clone(),
                    volume: stats.volume,
                    price: stats.price,
                    change_pct: stats.change_pct,
                };
                if let Err(e) = self.notifier.emit(event).await {
                    warn!(symbol = %stats.symbol, error = %e, "New symbol notification failed");
                }
            }
        }

        info!(
            eligible = eligible.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            announced = announce,
            "Tracked symbols reconciled"
        );
        Ok(report)
    }

    /// 세션 생존을 점검합니다.
    ///
    /// 태스크가 끝난 세션은 새로 띄우고, Live인데 `stale_after` 동안 메시지가
    /// 없는 세션은 지표 상태를 유지한 채 재연결시킵니다.
    pub async fn heartbeat(&self) -> HeartbeatReport {
        let stale_after = self.config.stream.stale_after();
        let mut report = HeartbeatReport::default();
        let mut sessions = self.sessions.lock().await;

        let symbols: Vec<String> = sessions.keys().cloned().collect();
        for symbol in symbols {
            let Some(handle) = sessions.get(&symbol) else {
                continue;
            };

            if handle.is_finished() {
                warn!(symbol = %symbol, "Session task ended; restarting");
                let replacement = self.start_session(&symbol);
                sessions.insert(symbol.clone(), replacement);
                report.restarted.push(symbol);
            } else if handle.status().is_stale(stale_after) {
                warn!(symbol = %symbol, "No stream messages; forcing reconnect");
                if handle.request_reconnect() {
                    report.reconnected.push(symbol);
                }
            }
        }

        let live = sessions
            .values()
            .filter(|h| h.state() == SessionState::Live)
            .count();
        info!(
            sessions = sessions.len(),
            live,
            restarted = report.restarted.len(),
            reconnected = report.reconnected.len(),
            "Heartbeat"
        );
        report
    }

    /// 재조정/생존 점검 루프를 취소될 때까지 실행합니다.
    pub async fn run(self: Arc<Self>) {
        let mut check = tokio::time::interval(self.config.stream.check_interval());
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let heartbeat_period = self.config.stream.heartbeat_interval();
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = check.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "Reconciliation failed; keeping tracked set");
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// 모든 세션을 닫습니다.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.sessions.lock().await.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        for handle in handles {
            handle.close().await;
        }
        info!(sessions = count, "Supervisor stopped");
    }

    fn start_session(&self, symbol: &str) -> SessionHandle {
        info!(symbol = %symbol, "Starting session");
        SymbolSession::spawn(
            SessionConfig::from_app(symbol, &self.config),
            Arc::clone(&self.provider),
            self.events.clone(),
            &self.cancel,
        )
    }
}
