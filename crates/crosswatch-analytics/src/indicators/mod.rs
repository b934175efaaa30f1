//! 기술적 지표 모듈.
//!
//! 가격/거래량 시계열을 받아 같은 길이의 결과(또는 ATR의 경우 스칼라)를 반환하는
//! 순수 함수들입니다. 기록이 부족한 것은 에러가 아니며 중립값으로 채웁니다.
//! 잘못된 파라미터와 길이가 맞지 않는 입력만 에러입니다.
//!
//! # 지원 지표
//!
//! ## 추세 지표
//! - **EMA**: 지수 이동평균
//! - **MACD**: 이동평균 수렴/확산
//!
//! ## 모멘텀 지표
//! - **RSI**: 상대강도지수 (Wilder)
//!
//! ## 변동성 지표
//! - **Bollinger Bands**: 볼린저 밴드
//! - **ATR**: 평균 실제 범위
//!
//! # 사용 예시
//!
//! ```ignore
//! use crosswatch_analytics::indicators::{IndicatorEngine, IndicatorSettings};
//!
//! let engine = IndicatorEngine::new();
//! let snapshot = engine.snapshot(&candles, &IndicatorSettings::with_ema_period(200))?;
//! println!("EMA: {:?}", snapshot.last_ema());
//! ```

pub mod momentum;
pub mod trend;
pub mod volatility;

use crosswatch_core::Candle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use momentum::{MomentumCalculator, RsiParams, RSI_NEUTRAL};
pub use trend::{EmaParams, MacdParams, MacdResult, TrendIndicators};
pub use volatility::{AtrParams, BollingerBandsParams, BollingerBandsResult, VolatilityIndicators};

/// 지표 계산 오류.
#[derive(Debug, Error)]
pub enum IndicatorError {
    /// 잘못된 파라미터
    #[error("잘못된 파라미터: {0}")]
    InvalidParameter(String),

    /// 고가/저가/종가 길이 불일치
    #[error("입력 길이가 다릅니다: high {high}, low {low}, close {close}")]
    LengthMismatch { high: usize, low: usize, close: usize },

    /// 캔들 없음
    #[error("캔들이 없습니다")]
    EmptyInput,
}

/// 지표 계산 결과 타입.
pub type IndicatorResult<T> = Result<T, IndicatorError>;

/// 스냅샷 계산에 쓰는 지표 파라미터 묶음.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub ema: EmaParams,
    pub rsi: RsiParams,
    pub macd: MacdParams,
    pub bollinger: BollingerBandsParams,
    pub atr: AtrParams,
}

impl IndicatorSettings {
    /// EMA 기간만 지정하고 나머지는 기본값.
    pub fn with_ema_period(period: usize) -> Self {
        Self {
            ema: EmaParams { period },
            ..Default::default()
        }
    }
}

/// 한 심볼의 최신 지표 상태.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// 캔들 버퍼와 같은 길이의 EMA 기록
    pub ema: Vec<Decimal>,
    /// 최신 RSI
    pub rsi: Decimal,
    /// 최신 MACD
    pub macd: MacdResult,
    /// 최신 볼린저 밴드
    pub bollinger: BollingerBandsResult,
    /// 최신 ATR
    pub atr: Decimal,
}

impl IndicatorSnapshot {
    /// 마지막 마감 캔들의 EMA.
    pub fn last_ema(&self) -> Option<Decimal> {
        self.ema.last().copied()
    }

    /// 진행 중인 캔들의 가격을 반영한 잠정 EMA. 기록은 바꾸지 않습니다.
    pub fn provisional_ema(&self, price: Decimal, period: usize) -> Option<Decimal> {
        self.last_ema()
            .map(|prev| TrendIndicators::ema_step(prev, price, period))
    }
}

/// 통합 지표 엔진.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndicatorEngine {
    trend: TrendIndicators,
    momentum: MomentumCalculator,
    volatility: VolatilityIndicators,
}

impl IndicatorEngine {
    /// 새로운 지표 엔진 생성.
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 추세 지표 ====================

    /// 지수 이동평균 (EMA) 계산.
    pub fn ema(&self, prices: &[Decimal], params: EmaParams) -> IndicatorResult<Vec<Decimal>> {
        self.trend.ema(prices, params)
    }

    /// MACD 계산.
    pub fn macd(&self, prices: &[Decimal], params: MacdParams) -> IndicatorResult<Vec<MacdResult>> {
        self.trend.macd(prices, params)
    }

    // ==================== 모멘텀 지표 ====================

    /// RSI 계산.
    pub fn rsi(&self, prices: &[Decimal], params: RsiParams) -> IndicatorResult<Vec<Decimal>> {
        self.momentum.rsi(prices, params)
    }

    // ==================== 변동성 지표 ====================

    /// 볼린저 밴드 계산.
    pub fn bollinger_bands(
        &self,
        prices: &[Decimal],
        params: BollingerBandsParams,
    ) -> IndicatorResult<Vec<BollingerBandsResult>> {
        self.volatility.bollinger_bands(prices, params)
    }

    /// ATR 계산.
    pub fn atr(
        &self,
        high: &[Decimal],
        low: &[Decimal],
        close: &[Decimal],
        params: AtrParams,
    ) -> IndicatorResult<Decimal> {
        self.volatility.atr(high, low, close, params)
    }

    // ==================== 스냅샷 ====================

    /// 캔들 버퍼 전체로 최신 지표 상태를 다시 계산합니다.
    ///
    /// # 인자
    /// * `candles` - `open_time` 순으로 정렬된 마감 캔들
    /// * `settings` - 지표 파라미터
    pub fn snapshot(
        &self,
        candles: &[Candle],
        settings: &IndicatorSettings,
    ) -> IndicatorResult<IndicatorSnapshot> {
        if candles.is_empty() {
            return Err(IndicatorError::EmptyInput);
        }

        let close: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let high: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
        let low: Vec<Decimal> = candles.iter().map(|c| c.low).collect();

        let ema = self.ema(&close, settings.ema)?;
        let rsi = self.rsi(&close, settings.rsi)?;
        let macd = self.macd(&close, settings.macd)?;
        let bollinger = self.bollinger_bands(&close, settings.bollinger)?;
        let atr = self.atr(&high, &low, &close, settings.atr)?;

        Ok(IndicatorSnapshot {
            ema,
            rsi: rsi.last().copied().unwrap_or(RSI_NEUTRAL),
            macd: macd.last().copied().unwrap_or_default(),
            bollinger: bollinger.last().copied().unwrap_or_default(),
            atr,
        })
    }
}
