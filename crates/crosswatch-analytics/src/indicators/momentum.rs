//! 모멘텀 지표 (Momentum Indicators).
//!
//! - RSI (Relative Strength Index, Wilder 평활)

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{IndicatorError, IndicatorResult};

/// RSI 중립값.
pub const RSI_NEUTRAL: Decimal = dec!(50);

/// RSI 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsiParams {
    /// RSI 기간 (기본: 14).
    pub period: usize,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self { period: 14 }
    }
}

/// 모멘텀 지표 계산기.
#[derive(Debug, Default, Clone, Copy)]
pub struct MomentumCalculator;

impl MomentumCalculator {
    pub fn new() -> Self {
        Self
    }

    /// RSI (Relative Strength Index) 계산.
    ///
    /// RSI = 100 - (100 / (1 + RS)), RS = 평균 상승폭 / 평균 하락폭
    ///
    /// 인덱스 `period`에서 처음 `period`개 변화량의 단순 평균으로 시작하고,
    /// 이후 Wilder 평활 `avg = (prev × (period - 1) + x) / period`를 적용합니다.
    /// 그 이전 인덱스와 입력이 `period + 1`보다 짧은 경우는 50입니다.
    ///
    /// # 반환
    /// 입력과 같은 길이의 0-100 사이 RSI 값
    pub fn rsi(&self, prices: &[Decimal], params: RsiParams) -> IndicatorResult<Vec<Decimal>> {
        let period = params.period;
        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "기간은 0보다 커야 합니다".to_string(),
            ));
        }

        let mut result = vec![RSI_NEUTRAL; prices.len()];
        if prices.len() < period + 1 {
            return Ok(result);
        }

        let (gains, losses): (Vec<Decimal>, Vec<Decimal>) = prices
            .windows(2)
            .map(|w| {
                let delta = w[1] - w[0];
                if delta > Decimal::ZERO {
                    (delta, Decimal::ZERO)
                } else {
                    (Decimal::ZERO, -delta)
                }
            })
            .unzip();

        let period_decimal = Decimal::from(period);
        let mut avg_gain = gains[..period].iter().sum::<Decimal>() / period_decimal;
        let mut avg_loss = losses[..period].iter().sum::<Decimal>() / period_decimal;
        result[period] = Self::rsi_value(avg_gain, avg_loss);

        // gains[i]는 prices[i + 1]의 변화량
        for i in period..gains.len() {
            avg_gain = (avg_gain * (period_decimal - Decimal::ONE) + gains[i]) / period_decimal;
            avg_loss = (avg_loss * (period_decimal - Decimal::ONE) + losses[i]) / period_decimal;
            result[i + 1] = Self::rsi_value(avg_gain, avg_loss);
        }

        Ok(result)
    }

    fn rsi_value(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
        if avg_loss.is_zero() {
            if avg_gain.is_zero() {
                return RSI_NEUTRAL;
            }
            return dec!(100);
        }
        let rs = avg_gain / avg_loss;
        dec!(100) - (dec!(100) / (Decimal::ONE + rs))
    }
}
