//! 변동성 지표 (Volatility Indicators).
//!
//! - Bollinger Bands (모표준편차)
//! - ATR (Average True Range)

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{IndicatorError, IndicatorResult};

/// 볼린저 밴드 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBandsParams {
    /// 이동평균 기간 (기본: 20).
    pub period: usize,
    /// 표준편차 배수 (기본: 2.0).
    pub std_dev_multiplier: Decimal,
}

impl Default for BollingerBandsParams {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev_multiplier: dec!(2.0),
        }
    }
}

/// 볼린저 밴드 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BollingerBandsResult {
    /// 상단 밴드.
    pub upper: Decimal,
    /// 중간 밴드 (이동평균).
    pub middle: Decimal,
    /// 하단 밴드.
    pub lower: Decimal,
}

impl BollingerBandsResult {
    /// 밴드 폭 (상단 - 하단) / 중간. 중간이 0이면 0.
    pub fn bandwidth(&self) -> Decimal {
        if self.middle.is_zero() {
            return Decimal::ZERO;
        }
        (self.upper - self.lower) / self.middle
    }
}

/// ATR 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtrParams {
    /// ATR 기간 (기본: 14).
    pub period: usize,
}

impl Default for AtrParams {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// 변동성 지표 계산기.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolatilityIndicators;

impl VolatilityIndicators {
    pub fn new() -> Self {
        Self
    }

    /// 볼린저 밴드 계산.
    ///
    /// 상단 밴드 = MA + (k × σ), 하단 밴드 = MA - (k × σ)
    ///
    /// 워밍업 구간과 입력이 기간보다 짧은 경우는 첫 가격 기준 ±10%로 채웁니다.
    pub fn bollinger_bands(
        &self,
        prices: &[Decimal],
        params: BollingerBandsParams,
    ) -> IndicatorResult<Vec<BollingerBandsResult>> {
        let period = params.period;
        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "기간은 0보다 커야 합니다".to_string(),
            ));
        }
        if params.std_dev_multiplier.is_sign_negative() {
            return Err(IndicatorError::InvalidParameter(format!(
                "표준편차 배수는 음수일 수 없습니다: {}",
                params.std_dev_multiplier
            )));
        }

        let Some(&first) = prices.first() else {
            return Ok(Vec::new());
        };

        let fallback = BollingerBandsResult {
            upper: first * dec!(1.1),
            middle: first,
            lower: first * dec!(0.9),
        };

        if prices.len() < period {
            return Ok(vec![fallback; prices.len()]);
        }

        let period_decimal = Decimal::from(period);
        let mut result = Vec::with_capacity(prices.len());
        result.extend(std::iter::repeat(fallback).take(period - 1));

        for window in prices.windows(period) {
            let ma = window.iter().sum::<Decimal>() / period_decimal;
            let variance = window
                .iter()
                .map(|&p| {
                    let diff = p - ma;
                    diff * diff
                })
                .sum::<Decimal>()
                / period_decimal;
            let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
            let deviation = params.std_dev_multiplier * std_dev;

            result.push(BollingerBandsResult {
                upper: ma + deviation,
                middle: ma,
                lower: ma - deviation,
            });
        }

        Ok(result)
    }

    /// ATR (Average True Range) 계산.
    ///
    /// True Range = max(고가 - 저가, |고가 - 전봉 종가|, |저가 - 전봉 종가|)
    /// ATR = 최근 `period`개 True Range의 단순 평균
    ///
    /// 데이터가 `period + 1`개보다 적으면 0입니다.
    pub fn atr(
        &self,
        high: &[Decimal],
        low: &[Decimal],
        close: &[Decimal],
        params: AtrParams,
    ) -> IndicatorResult<Decimal> {
        let period = params.period;
        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "기간은 0보다 커야 합니다".to_string(),
            ));
        }
        if high.len() != low.len() || high.len() != close.len() {
            return Err(IndicatorError::LengthMismatch {
                high: high.len(),
                low: low.len(),
                close: close.len(),
            });
        }

        let len = close.len();
        if len < period + 1 {
            return Ok(Decimal::ZERO);
        }

        let sum: Decimal = (len - period..len)
            .map(|i| {
                let hl = high[i] - low[i];
                let hc = (high[i] - close[i - 1]).abs();
                let lc = (low[i] - close[i - 1]).abs();
                hl.max(hc).max(lc)
            })
            .sum();

        Ok(sum / Decimal::from(period))
    }
}
