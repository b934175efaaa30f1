//! 시장 데이터 제공자 trait 정의.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crosswatch_core::{Candle, CandleUpdate, Timeframe};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 24시간 통계 기반 심볼 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    /// 심볼 (예: "BTCUSDT")
    pub symbol: String,
    /// 24시간 호가 자산 거래대금
    pub volume: Decimal,
    /// 최종 체결가
    pub price: Decimal,
    /// 24시간 가격 변화율 (%)
    pub change_pct: Decimal,
}

/// 캔들 스트림 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 캔들 업데이트 (진행 중 또는 마감)
    Update(CandleUpdate),
    /// 서버가 연결을 닫음
    Disconnected,
    /// 전송 계층 에러
    Error(String),
}

/// 한 심볼의 실시간 캔들 스트림.
///
/// 채널이 닫히면 `next()`가 `None`을 반환하며, 전송이 끝났다는 뜻입니다.
/// 드롭하면 수신 태스크를 중단합니다.
#[derive(Debug)]
pub struct CandleStream {
    rx: mpsc::Receiver<StreamEvent>,
    task: Option<JoinHandle<()>>,
}

impl CandleStream {
    /// 채널 수신기만으로 스트림을 만듭니다.
    pub fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx, task: None }
    }

    /// 수신 태스크를 함께 소유하는 스트림.
    pub fn with_task(rx: mpsc::Receiver<StreamEvent>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// 다음 이벤트를 기다립니다.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Drop for CandleStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 세션/감독자가 의존하는 시장 데이터 인터페이스.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// 제공자 이름 반환.
    fn name(&self) -> &str;

    /// 호가 자산이 `quote_asset`이고 24시간 거래대금이 `min_quote_volume` 이상인 심볼.
    ///
    /// 거래대금 내림차순으로 정렬됩니다.
    async fn list_eligible_symbols(
        &self,
        quote_asset: &str,
        min_quote_volume: Decimal,
    ) -> ExchangeResult<Vec<SymbolStats>>;

    /// 과거 캔들을 `open_time` 오름차순으로 조회.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>>;

    /// `at` 시각을 포함하는 과거 캔들 하나를 조회.
    ///
    /// # 반환
    /// `open_time <= at <= close_time`인 캔들. 거래소에 없으면 `None`
    async fn fetch_candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        at: DateTime<Utc>,
    ) -> ExchangeResult<Option<Candle>>;

    /// 실시간 캔들 스트림 열기.
    async fn open_candle_stream(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> ExchangeResult<CandleStream>;

    /// 현재가 조회.
    async fn fetch_latest_price(&self, symbol: &str) -> ExchangeResult<Decimal>;
}
