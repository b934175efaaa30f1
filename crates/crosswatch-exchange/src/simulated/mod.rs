//! 스크립트 기반 시장 데이터.
//!
//! 네트워크 없이 세션/감독자를 구동하기 위한 제공자입니다. 테스트는 심볼 목록,
//! 과거 캔들, 현재가를 미리 설정하고, 열린 스트림에 이벤트를 밀어 넣거나
//! 스트림을 끊어 재연결을 유도할 수 있습니다.

use crate::traits::{CandleStream, ExchangeResult, MarketDataProvider, StreamEvent, SymbolStats};
use crate::ExchangeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crosswatch_core::{Candle, Timeframe};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Default)]
struct ScriptState {
    symbols: Vec<SymbolStats>,
    candles: HashMap<String, Vec<Candle>>,
    prices: HashMap<String, Decimal>,
    streams: HashMap<String, mpsc::Sender<StreamEvent>>,
    opens: HashMap<String, usize>,
    connect_failures: HashMap<String, usize>,
    symbol_failure: bool,
}

/// 스크립트 기반 시장 데이터 제공자.
#[derive(Debug, Default)]
pub struct ScriptedMarketData {
    state: Mutex<ScriptState>,
}

impl ScriptedMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// 적격 심볼 목록을 교체합니다.
    pub async fn set_symbols(&self, symbols: Vec<SymbolStats>) {
        self.state.lock().await.symbols = symbols;
    }

    /// 다음 심볼 조회를 실패시킬지 설정합니다.
    pub async fn fail_symbol_listing(&self, fail: bool) {
        self.state.lock().await.symbol_failure = fail;
    }

    /// 과거 캔들을 설정합니다.
    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state
            .lock()
            .await
            .candles
            .insert(symbol.to_string(), candles);
    }

    /// 과거 캔들 뒤에 하나를 추가합니다.
    pub async fn push_candle(&self, symbol: &str, candle: Candle) {
        self.state
            .lock()
            .await
            .candles
            .entry(symbol.to_string())
            .or_default()
            .push(candle);
    }

    /// 현재가를 설정합니다.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state
            .lock()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// 다음 `count`번의 스트림 연결을 실패시킵니다.
    pub async fn fail_next_connects(&self, symbol: &str, count: usize) {
        self.state
            .lock()
            .await
            .connect_failures
            .insert(symbol.to_string(), count);
    }

    /// 열린 스트림으로 이벤트를 보냅니다. 열린 스트림이 없으면 `false`.
    pub async fn push(&self, symbol: &str, event: StreamEvent) -> bool {
        let sender = self.state.lock().await.streams.get(symbol).cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// 열린 스트림을 끊습니다 (채널 종료).
    pub async fn drop_stream(&self, symbol: &str) -> bool {
        self.state.lock().await.streams.remove(symbol).is_some()
    }

    /// 스트림이 열린 횟수.
    pub async fn open_count(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .await
            .opens
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    /// 현재 스트림이 열려 있고 수신 측이 살아 있는지.
    pub async fn is_streaming(&self, symbol: &str) -> bool {
        self.state
            .lock()
            .await
            .streams
            .get(symbol)
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedMarketData {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_eligible_symbols(
        &self,
        quote_asset: &str,
        min_quote_volume: Decimal,
    ) -> ExchangeResult<Vec<SymbolStats>> {
        let state = self.state.lock().await;
        if state.symbol_failure {
            return Err(ExchangeError::NetworkError("scripted failure".to_string()));
        }

        let mut symbols: Vec<SymbolStats> = state
            .symbols
            .iter()
            .filter(|s| s.symbol.ends_with(quote_asset) && s.volume >= min_quote_volume)
            .cloned()
            .collect();
        symbols.sort_by(|a, b| b.volume.cmp(&a.volume));
        Ok(symbols)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        let state = self.state.lock().await;
        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn fetch_candle_at(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        at: DateTime<Utc>,
    ) -> ExchangeResult<Option<Candle>> {
        let state = self.state.lock().await;
        Ok(state
            .candles
            .get(symbol)
            .and_then(|candles| {
                candles
                    .iter()
                    .find(|c| c.open_time <= at && at <= c.close_time)
            })
            .cloned())
    }

    async fn open_candle_stream(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
    ) -> ExchangeResult<CandleStream> {
        let mut state = self.state.lock().await;
        *state.opens.entry(symbol.to_string()).or_default() += 1;

        if let Some(remaining) = state.connect_failures.get_mut(symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ExchangeError::WebSocket("scripted connect failure".to_string()));
            }
        }

        let (tx, rx) = mpsc::channel(1000);
        state.streams.insert(symbol.to_string(), tx);
        debug!(symbol = %symbol, "Scripted stream opened");
        Ok(CandleStream::new(rx))
    }

    async fn fetch_latest_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.state
            .lock()
            .await
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }
}
