//! 세션/감독자 시나리오 테스트.
//!
//! 스크립트 시장 데이터와 정지된 tokio 시계로 재연결, 쿨다운, 생존 점검을 검증합니다.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use crosswatch_analytics::IndicatorSettings;
use crosswatch_collector::{
    SessionConfig, SessionEvent, SessionHandle, SessionState, StreamSupervisor, SymbolSession,
};
use crosswatch_core::{AppConfig, Candle, CandleUpdate, Side, Timeframe};
use crosswatch_exchange::{ScriptedMarketData, StreamEvent, SymbolStats};
use crosswatch_notification::NotificationManager;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SYMBOL: &str = "BTCUSDT";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn candle_at(index: i64, price: Decimal) -> Candle {
    let open = start() + ChronoDuration::minutes(15 * index);
    Candle::flat(
        open,
        open + ChronoDuration::minutes(15) - ChronoDuration::milliseconds(1),
        price,
        dec!(100),
    )
}

fn session_config(period: usize) -> SessionConfig {
    SessionConfig {
        symbol: SYMBOL.to_string(),
        timeframe: Timeframe::M15,
        indicators: IndicatorSettings::with_ema_period(period),
        retention: period * 4,
        backfill_limit: period * 4,
        reconnect_delay: Duration::from_secs(5),
        cooldown: ChronoDuration::hours(1),
    }
}

async fn wait_until(handle: &SessionHandle, predicate: impl Fn(SessionState, u32) -> bool) {
    let mut rx = handle.subscribe();
    rx.wait_for(|s| predicate(s.state, s.reconnects))
        .await
        .unwrap();
}

async fn close(data: &ScriptedMarketData, index: i64, price: Decimal) {
    assert!(
        data.push(SYMBOL, StreamEvent::Update(CandleUpdate::closed(candle_at(index, price))))
            .await
    );
}

fn next_crossover(rx: &mut mpsc::Receiver<SessionEvent>) -> Option<(Side, DateTime<Utc>)> {
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::Crossover { crossover, .. } = event {
            return Some((crossover.direction, crossover.at));
        }
    }
    None
}

/// 이벤트가 `count`개 쌓일 때까지 기다린 뒤 모두 꺼냅니다.
async fn drain(rx: &mut mpsc::Receiver<SessionEvent>, count: usize) -> Vec<SessionEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        events.push(rx.recv().await.unwrap());
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_suppresses_flip_flop_crossovers() {
    let data = Arc::new(ScriptedMarketData::new());
    data.set_candles(SYMBOL, (0..15).map(|i| candle_at(i, dec!(10))).collect())
        .await;

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let handle = SymbolSession::spawn(session_config(10), data.clone(), tx, &cancel);
    wait_until(&handle, |state, _| state == SessionState::Live).await;

    // 위 → 아래 → 위 → 아래 → 위, 15분 간격
    for (index, price) in [(15, dec!(11)), (16, dec!(9)), (17, dec!(11)), (18, dec!(9)), (19, dec!(11))] {
        close(&data, index, price).await;
    }

    let events = drain(&mut rx, 7).await;
    let crossovers: Vec<(Side, DateTime<Utc>)> = events
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Crossover { crossover, .. } => Some((crossover.direction, crossover.at)),
            _ => None,
        })
        .collect();

    // 첫 알림 뒤 1시간 안의 교차는 억제되고, 정확히 1시간 뒤 교차는 다시 알림
    assert_eq!(
        crossovers,
        vec![
            (Side::Above, candle_at(15, dec!(11)).close_time),
            (Side::Above, candle_at(19, dec!(11)).close_time),
        ]
    );

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_preserves_buffer_and_fills_gap() {
    let data = Arc::new(ScriptedMarketData::new());
    data.set_candles(SYMBOL, (0..15).map(|i| candle_at(i, dec!(10))).collect())
        .await;

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let handle = SymbolSession::spawn(session_config(10), data.clone(), tx, &cancel);
    wait_until(&handle, |state, _| state == SessionState::Live).await;
    assert_eq!(handle.status().buffered, 15);

    // 끊긴 동안 마감된 두 캔들
    data.push_candle(SYMBOL, candle_at(15, dec!(10))).await;
    data.push_candle(SYMBOL, candle_at(16, dec!(10))).await;
    assert!(data.drop_stream(SYMBOL).await);

    wait_until(&handle, |state, reconnects| {
        state == SessionState::Live && reconnects == 1
    })
    .await;

    let status = handle.status();
    assert_eq!(status.buffered, 17);
    assert_eq!(data.open_count(SYMBOL).await, 2);
    // 공백 메우기는 이벤트를 만들지 않음
    assert!(rx.try_recv().is_err());

    // 이어지는 마감 캔들은 정상 처리
    close(&data, 17, dec!(11)).await;
    let events = drain(&mut rx, 2).await;
    match &events[0] {
        SessionEvent::FeaturePoint(point) => {
            assert_eq!(point.timestamp, candle_at(17, dec!(11)).close_time)
        }
        other => panic!("expected feature point, got {:?}", other),
    }
    assert!(matches!(
        &events[1],
        SessionEvent::Crossover { crossover, .. } if crossover.direction == Side::Above
    ));

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_candle_after_reconnect_is_ignored() {
    let data = Arc::new(ScriptedMarketData::new());
    data.set_candles(SYMBOL, (0..15).map(|i| candle_at(i, dec!(10))).collect())
        .await;

    let (tx, mut rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let handle = SymbolSession::spawn(session_config(10), data.clone(), tx, &cancel);
    wait_until(&handle, |state, _| state == SessionState::Live).await;

    data.push_candle(SYMBOL, candle_at(15, dec!(10))).await;
    data.drop_stream(SYMBOL).await;
    wait_until(&handle, |state, reconnects| {
        state == SessionState::Live && reconnects == 1
    })
    .await;

    // 공백 메우기로 이미 반영된 캔들이 스트림으로 다시 도착
    close(&data, 15, dec!(12)).await;
    close(&data, 16, dec!(10)).await;

    match rx.recv().await {
        Some(SessionEvent::FeaturePoint(point)) => {
            assert_eq!(point.timestamp, candle_at(16, dec!(10)).close_time);
            assert_eq!(point.ohlcv.close, dec!(10));
        }
        other => panic!("expected feature point, got {:?}", other),
    }

    handle.close().await;
    assert!(next_crossover(&mut rx).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_retry_until_live() {
    let data = Arc::new(ScriptedMarketData::new());
    data.set_candles(SYMBOL, (0..15).map(|i| candle_at(i, dec!(10))).collect())
        .await;
    data.fail_next_connects(SYMBOL, 2).await;

    let (tx, _rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let handle = SymbolSession::spawn(session_config(10), data.clone(), tx, &cancel);

    wait_until(&handle, |state, _| state == SessionState::Live).await;
    assert_eq!(handle.status().reconnects, 2);
    assert_eq!(data.open_count(SYMBOL).await, 3);

    cancel.cancel();
    handle.close().await;
}

// ============================================================================
// 감독자
// ============================================================================

fn stats(symbol: &str, volume: Decimal) -> SymbolStats {
    SymbolStats {
        symbol: symbol.to_string(),
        volume,
        price: dec!(10),
        change_pct: dec!(1.5),
    }
}

fn supervisor(data: Arc<ScriptedMarketData>) -> (StreamSupervisor, mpsc::Receiver<SessionEvent>) {
    let mut config = AppConfig::default();
    config.stream.volume_threshold = dec!(1000);
    config.stream.ema_period = 10;
    config.stream.stale_after_secs = 120;

    let (tx, events) = mpsc::channel(64);
    let supervisor = StreamSupervisor::new(
        Arc::new(config),
        data,
        Arc::new(NotificationManager::new()),
        tx,
        CancellationToken::new(),
    );
    (supervisor, events)
}

async fn wait_for_state(supervisor: &StreamSupervisor, symbol: &str, reconnects: u32) {
    loop {
        if let Some(status) = supervisor.session_status(symbol).await {
            if status.state == SessionState::Live && status.reconnects == reconnects {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_reconnects_silent_session() {
    let data = Arc::new(ScriptedMarketData::new());
    data.set_symbols(vec![stats(SYMBOL, dec!(5000))]).await;
    data.set_candles(SYMBOL, (0..15).map(|i| candle_at(i, dec!(10))).collect())
        .await;

    let (supervisor, _events) = supervisor(data.clone());
    supervisor.reconcile().await.unwrap();
    wait_for_state(&supervisor, SYMBOL, 0).await;

    // 아직 조용하지 않음
    let report = supervisor.heartbeat().await;
    assert!(report.reconnected.is_empty());

    tokio::time::advance(Duration::from_secs(121)).await;
    let report = supervisor.heartbeat().await;
    assert_eq!(report.reconnected, vec![SYMBOL]);
    assert!(report.restarted.is_empty());

    wait_for_state(&supervisor, SYMBOL, 1).await;
    assert_eq!(data.open_count(SYMBOL).await, 2);
    // 재연결 후에도 버퍼 유지
    assert_eq!(supervisor.session_status(SYMBOL).await.unwrap().buffered, 15);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_keeps_existing_sessions() {
    let data = Arc::new(ScriptedMarketData::new());
    data.set_symbols(vec![stats(SYMBOL, dec!(5000))]).await;
    data.set_candles(SYMBOL, (0..15).map(|i| candle_at(i, dec!(10))).collect())
        .await;

    let (supervisor, _events) = supervisor(data.clone());
    supervisor.reconcile().await.unwrap();
    wait_for_state(&supervisor, SYMBOL, 0).await;

    let report = supervisor.reconcile().await.unwrap();
    assert!(report.added.is_empty());
    assert!(report.removed.is_empty());
    // 심볼당 세션 하나, 스트림도 한 번만 열림
    assert_eq!(data.open_count(SYMBOL).await, 1);

    supervisor.shutdown().await;
}
