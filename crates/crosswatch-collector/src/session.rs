//! 심볼 스트림 세션.
//!
//! 심볼 하나의 연결 수명주기와 지표/알림 상태를 소유하는 액터입니다.
//!
//! ```text
//! Disconnected → Connecting → Live ⇄ Reconnecting
//!                                │
//!                                ▼
//!                             Closed
//! ```
//!
//! 같은 세션의 이벤트는 순서대로 하나씩 처리되므로 내부 상태에는 잠금이 없습니다.
//! 결과는 [`SessionEvent`] 채널로만 밖에 나갑니다.

use crate::error::Result;
use chrono::{DateTime, Utc};
use crosswatch_analytics::ml::{FeatureExtractor, FeaturePoint, FeatureSet};
use crosswatch_analytics::{IndicatorEngine, IndicatorSettings, IndicatorSnapshot};
use crosswatch_core::{
    session_span, AlertState, AppConfig, Candle, Crossover, CrossoverDecision, CrossoverPolicy,
    Observation, Timeframe,
};
use crosswatch_exchange::{CandleStream, MarketDataProvider, StreamEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// 명령 채널 크기.
const COMMAND_BUFFER: usize = 8;

// ============================================================================
// 상태 / 이벤트
// ============================================================================

/// 세션 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
    Closed,
}

/// 감독자가 읽는 세션 상태 요약.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// 마지막으로 스트림 메시지를 받은 시각
    pub last_message_at: Option<Instant>,
    /// 재연결 횟수
    pub reconnects: u32,
    /// 버퍼에 있는 마감 캔들 수
    pub buffered: usize,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            last_message_at: None,
            reconnects: 0,
            buffered: 0,
        }
    }
}

impl SessionStatus {
    /// Live 상태인데 `stale_after` 동안 메시지가 없었는지.
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.state == SessionState::Live
            && self
                .last_message_at
                .map_or(true, |at| at.elapsed() >= stale_after)
    }
}

/// 세션에 보내는 명령.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// 전송 계층만 다시 연결 (지표 상태 유지)
    Reconnect,
    /// 세션 종료
    Close,
}

/// 세션이 내보내는 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 마감 캔들의 학습 포인트 (레이블 없음)
    FeaturePoint(FeaturePoint),
    /// 알림 정책을 통과한 크로스오버
    Crossover {
        symbol: String,
        crossover: Crossover,
        features: Option<FeatureSet>,
    },
}

// ============================================================================
// 설정
// ============================================================================

/// 세션 설정.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub indicators: IndicatorSettings,
    /// 유지할 마감 캔들 수
    pub retention: usize,
    /// 시작/재연결 시 조회할 캔들 수
    pub backfill_limit: usize,
    /// 재연결 대기 시간
    pub reconnect_delay: Duration,
    /// 알림 쿨다운
    pub cooldown: chrono::Duration,
}

impl SessionConfig {
    pub fn from_app(symbol: impl Into<String>, config: &AppConfig) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: config.stream.timeframe,
            indicators: IndicatorSettings::with_ema_period(config.stream.ema_period),
            retention: config.stream.retention(),
            backfill_limit: config.stream.backfill_limit(),
            reconnect_delay: config.stream.reconnect_delay(),
            cooldown: config.alert.cooldown(),
        }
    }

    fn ema_period(&self) -> usize {
        self.indicators.ema.period
    }
}

// ============================================================================
// 핸들
// ============================================================================

/// 실행 중인 세션에 대한 핸들.
#[derive(Debug)]
pub struct SessionHandle {
    symbol: String,
    status: watch::Receiver<SessionStatus>,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// 세션 태스크가 끝났는지.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 상태 변경을 구독합니다.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// 전송 계층 재연결을 요청합니다.
    pub fn request_reconnect(&self) -> bool {
        self.commands.try_send(SessionCommand::Reconnect).is_ok()
    }

    /// 세션을 닫고 태스크 종료를 기다립니다.
    pub async fn close(self) {
        if self.commands.send(SessionCommand::Close).await.is_err() {
            self.cancel.cancel();
        }
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(symbol = %self.symbol, error = %e, "Session task ended abnormally");
            }
        }
    }
}

// ============================================================================
// 세션 액터
// ============================================================================

/// 스트림 소비가 끝난 이유.
enum StreamExit {
    /// 전송 계층 종료 또는 재연결 요청
    Disconnected,
    /// 세션 종료
    Closed,
}

/// 심볼 스트림 세션.
pub struct SymbolSession {
    config: SessionConfig,
    provider: Arc<dyn MarketDataProvider>,
    engine: IndicatorEngine,
    extractor: FeatureExtractor,
    policy: CrossoverPolicy,
    candles: VecDeque<Candle>,
    snapshot: Option<IndicatorSnapshot>,
    alert_state: AlertState,
    events: mpsc::Sender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    commands: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
}

impl SymbolSession {
    /// 세션을 생성하고 태스크로 실행합니다.
    ///
    /// # 인자
    /// * `events` - 학습 포인트와 크로스오버를 받을 채널
    /// * `parent` - 취소되면 세션도 종료
    pub fn spawn(
        config: SessionConfig,
        provider: Arc<dyn MarketDataProvider>,
        events: mpsc::Sender<SessionEvent>,
        parent: &CancellationToken,
    ) -> SessionHandle {
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = parent.child_token();
        let symbol = config.symbol.clone();

        let session = Self {
            policy: CrossoverPolicy::new(config.cooldown),
            candles: VecDeque::with_capacity(config.retention + 1),
            config,
            provider,
            engine: IndicatorEngine::new(),
            extractor: FeatureExtractor::new(),
            snapshot: None,
            alert_state: AlertState::default(),
            events,
            status: status_tx,
            commands: command_rx,
            cancel: cancel.clone(),
        };

        let span = session_span!("session", symbol, session.config.timeframe);
        let task = tokio::spawn(session.run().instrument(span));

        SessionHandle {
            symbol,
            status: status_rx,
            commands: command_tx,
            cancel,
            task,
        }
    }

    async fn run(mut self) {
        self.set_state(SessionState::Connecting);

        if !self.seed_history().await {
            self.set_state(SessionState::Closed);
            return;
        }

        loop {
            match self.provider.open_candle_stream(&self.config.symbol, self.config.timeframe).await {
                Ok(stream) => {
                    self.mark_live();
                    info!(buffered = self.candles.len(), "Session live");
                    if let StreamExit::Closed = self.consume(stream).await {
                        break;
                    }
                    warn!("Stream disconnected");
                }
                Err(e) => warn!(error = %e, "Failed to open candle stream"),
            }

            self.status.send_modify(|s| {
                s.state = SessionState::Reconnecting;
                s.reconnects += 1;
            });

            if !self.wait(self.config.reconnect_delay).await {
                break;
            }
            self.fill_gap().await;
        }

        self.set_state(SessionState::Closed);
        info!("Session closed");
    }

    // ==================== 연결 수명주기 ====================

    /// 지표 시드용 과거 캔들을 받아옵니다. 세션이 닫히면 `false`.
    async fn seed_history(&mut self) -> bool {
        loop {
            match self.fetch_closed_candles().await {
                Ok(candles) => {
                    for candle in candles {
                        self.push_candle(candle);
                    }
                    if let Err(e) = self.recompute() {
                        warn!(error = %e, "Initial indicator computation failed");
                    }
                    self.alert_state.side = self.observation().map(|o| o.side());
                    debug!(candles = self.candles.len(), "History seeded");
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, "Backfill failed; retrying");
                    if !self.wait(self.config.reconnect_delay).await {
                        return false;
                    }
                }
            }
        }
    }

    /// 끊긴 동안 마감된 캔들을 버퍼 뒤에 이어 붙입니다.
    ///
    /// 지표 상태는 유지하며, 알림과 학습 포인트는 만들지 않습니다.
    async fn fill_gap(&mut self) {
        let candles = match self.fetch_closed_candles().await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(error = %e, "Gap fill failed");
                return;
            }
        };

        let tail = self.candles.back().map(|c| c.open_time);
        let mut merged = 0;
        for candle in candles {
            if tail.map_or(true, |t| candle.open_time > t) {
                self.push_candle(candle);
                merged += 1;
            }
        }

        if merged > 0 {
            if let Err(e) = self.recompute() {
                warn!(error = %e, "Indicator recomputation after gap fill failed");
            }
            if let Some(observation) = self.observation() {
                self.alert_state.side = Some(observation.side());
            }
            info!(merged, "Gap filled after reconnect");
        }
    }

    async fn fetch_closed_candles(&self) -> Result<Vec<Candle>> {
        let now = Utc::now();
        let candles = self
            .provider
            .fetch_candles(
                &self.config.symbol,
                self.config.timeframe,
                self.config.backfill_limit,
            )
            .await?;
        // 마지막 캔들은 아직 진행 중일 수 있음
        Ok(candles.into_iter().filter(|c| c.close_time <= now).collect())
    }

    /// 스트림을 소비합니다.
    async fn consume(&mut self, mut stream: CandleStream) -> StreamExit {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamExit::Closed,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Reconnect) => {
                        info!("Reconnect requested");
                        return StreamExit::Disconnected;
                    }
                    Some(SessionCommand::Close) | None => return StreamExit::Closed,
                },
                event = stream.next() => match event {
                    Some(StreamEvent::Update(update)) => {
                        self.touch();
                        if update.closed {
                            self.on_close(update.candle).await;
                        } else {
                            self.on_tick(&update.candle);
                        }
                    }
                    Some(StreamEvent::Error(e)) => {
                        warn!(error = %e, "Stream error");
                        return StreamExit::Disconnected;
                    }
                    Some(StreamEvent::Disconnected) | None => return StreamExit::Disconnected,
                },
            }
        }
    }

    /// `delay`만큼 기다립니다. 그 사이 세션이 닫히면 `false`.
    async fn wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            command = self.commands.recv() => !matches!(command, Some(SessionCommand::Close) | None),
            _ = tokio::time::sleep(delay) => true,
        }
    }

    // ==================== 캔들 처리 ====================

    /// 진행 중 틱: 마지막 지표 값만 잠정 계산하고 기록은 바꾸지 않습니다.
    fn on_tick(&self, candle: &Candle) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let Some(provisional) = snapshot.provisional_ema(candle.close, self.config.ema_period())
        else {
            return;
        };

        if let Some(prev) = self.observation() {
            let curr = Observation::new(candle.close, provisional);
            if let Some(side) = CrossoverPolicy::detect(prev, curr) {
                debug!(
                    direction = %side,
                    price = %candle.close,
                    ema = %provisional,
                    "Provisional crossover"
                );
            }
        }
    }

    /// 마감 캔들: 버퍼 갱신, 지표 재계산, 학습 포인트 기록, 알림 정책 평가.
    async fn on_close(&mut self, candle: Candle) {
        if let Some(last) = self.candles.back() {
            if candle.open_time <= last.open_time {
                debug!(open_time = %candle.open_time, "Stale or duplicate close ignored");
                return;
            }
        }

        let prev = self.observation();
        let closed_at = candle.close_time;
        self.push_candle(candle);

        if let Err(e) = self.recompute() {
            warn!(error = %e, "Indicator computation failed; candle kept");
            return;
        }

        let features = self.emit_feature_point(closed_at).await;

        let Some(curr) = self.observation() else {
            return;
        };
        let Some(prev) = prev else {
            self.alert_state.side = Some(curr.side());
            return;
        };

        match self.policy.evaluate(&mut self.alert_state, prev, curr, closed_at) {
            CrossoverDecision::Alert(crossover) => {
                info!(
                    direction = %crossover.direction,
                    price = %crossover.price,
                    ema = %crossover.indicator,
                    difference_pct = %crossover.difference_pct.round_dp(3),
                    "Crossover detected"
                );
                self.send(SessionEvent::Crossover {
                    symbol: self.config.symbol.clone(),
                    crossover,
                    features,
                })
                .await;
            }
            CrossoverDecision::Suppressed {
                direction,
                remaining,
            } => {
                info!(
                    direction = %direction,
                    remaining_secs = remaining.num_seconds(),
                    "Crossover suppressed by cooldown"
                );
            }
            CrossoverDecision::Unchanged(_) => {}
        }
    }

    async fn emit_feature_point(&mut self, closed_at: DateTime<Utc>) -> Option<FeatureSet> {
        let snapshot = self.snapshot.as_ref()?;
        let (ohlcv, features) = self
            .extractor
            .extract(self.candles.make_contiguous(), snapshot)?;

        let point = FeaturePoint::new(self.config.symbol.clone(), closed_at, ohlcv, features);
        self.send(SessionEvent::FeaturePoint(point)).await;
        Some(features)
    }

    fn push_candle(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > self.config.retention {
            self.candles.pop_front();
        }
        let buffered = self.candles.len();
        self.status.send_modify(|s| s.buffered = buffered);
    }

    fn recompute(&mut self) -> Result<()> {
        if self.candles.is_empty() {
            self.snapshot = None;
            return Ok(());
        }
        let snapshot = self
            .engine
            .snapshot(self.candles.make_contiguous(), &self.config.indicators)?;
        self.snapshot = Some(snapshot);
        Ok(())
    }

    /// 마지막 마감 캔들의 (가격, EMA).
    fn observation(&self) -> Option<Observation> {
        let price = self.candles.back()?.close;
        let ema = self.snapshot.as_ref()?.last_ema()?;
        Some(Observation::new(price, ema))
    }

    async fn send(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Event channel closed; event dropped");
        }
    }

    // ==================== 상태 ====================

    fn set_state(&self, state: SessionState) {
        self.status.send_modify(|s| s.state = state);
    }

    fn mark_live(&self) {
        self.status.send_modify(|s| {
            s.state = SessionState::Live;
            s.last_message_at = Some(Instant::now());
        });
    }

    fn touch(&self) {
        self.status
            .send_modify(|s| s.last_message_at = Some(Instant::now()));
    }
}
