//! OHLCV 캔들 데이터.

use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV 캔들.
///
/// 마감된 캔들은 불변이며 `open_time` 순으로 정렬됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시간
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량 (기준 자산 단위)
    pub volume: Quantity,
    /// 캔들 종료 시간
    pub close_time: DateTime<Utc>,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    pub fn new(
        open_time: DateTime<Utc>,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Quantity,
        close_time: DateTime<Utc>,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
        }
    }

    /// 시가/고가/저가/종가가 모두 같은 캔들을 생성합니다.
    pub fn flat(
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
        price: Price,
        volume: Quantity,
    ) -> Self {
        Self::new(open_time, price, price, price, price, volume, close_time)
    }

    /// 캔들 범위(고가 - 저가)를 반환합니다.
    pub fn range(&self) -> Price {
        self.high - self.low
    }
}

/// 스트림으로 수신한 캔들 갱신.
///
/// `closed`가 false면 진행 중인 캔들의 중간 틱입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleUpdate {
    pub candle: Candle,
    pub closed: bool,
}

impl CandleUpdate {
    /// 마감 캔들 갱신.
    pub fn closed(candle: Candle) -> Self {
        Self {
            candle,
            closed: true,
        }
    }

    /// 진행 중 틱 갱신.
    pub fn tick(candle: Candle) -> Self {
        Self {
            candle,
            closed: false,
        }
    }
}
