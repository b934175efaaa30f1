//! 추세 지표 (Trend Indicators).
//!
//! - EMA (Exponential Moving Average)
//! - MACD (Moving Average Convergence Divergence)
//!
//! 입력이 기간보다 짧아도 에러 대신 중립값으로 채운 같은 길이의 결과를 반환합니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{IndicatorError, IndicatorResult};

/// EMA 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmaParams {
    /// 이동평균 기간.
    pub period: usize,
}

impl Default for EmaParams {
    fn default() -> Self {
        Self { period: 200 }
    }
}

/// MACD 파라미터.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdParams {
    /// 단기 EMA 기간 (기본: 12).
    pub fast_period: usize,
    /// 장기 EMA 기간 (기본: 26).
    pub slow_period: usize,
    /// 시그널 라인 기간 (기본: 9).
    pub signal_period: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

/// MACD 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdResult {
    /// MACD 라인 (단기 EMA - 장기 EMA).
    pub macd: Decimal,
    /// 시그널 라인 (MACD의 EMA).
    pub signal: Decimal,
    /// 히스토그램 (MACD - 시그널).
    pub histogram: Decimal,
}

/// 추세 지표 계산기.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrendIndicators;

impl TrendIndicators {
    pub fn new() -> Self {
        Self
    }

    /// EMA 평활 계수 k = 2 / (period + 1).
    pub fn smoothing(period: usize) -> Decimal {
        dec!(2) / Decimal::from(period + 1)
    }

    /// 이전 EMA에 새 가격 하나를 반영합니다.
    ///
    /// `prev + k × (price - prev)` 형태로 계산하므로 가격이 같으면 값이 그대로 유지됩니다.
    pub fn ema_step(prev_ema: Decimal, price: Decimal, period: usize) -> Decimal {
        prev_ema + Self::smoothing(period) * (price - prev_ema)
    }

    /// 지수 이동평균 (EMA) 계산.
    ///
    /// EMA = (현재가 × k) + (이전 EMA × (1 - k))
    ///
    /// 첫 EMA는 처음 `period`개의 단순 평균입니다. 그 이전 인덱스와 입력이
    /// 기간보다 짧은 경우는 첫 가격으로 채웁니다.
    ///
    /// # 인자
    /// * `prices` - 가격 데이터
    /// * `params` - EMA 파라미터
    ///
    /// # 반환
    /// 입력과 같은 길이의 EMA 값
    pub fn ema(&self, prices: &[Decimal], params: EmaParams) -> IndicatorResult<Vec<Decimal>> {
        let period = params.period;
        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "기간은 0보다 커야 합니다".to_string(),
            ));
        }

        let Some(&first) = prices.first() else {
            return Ok(Vec::new());
        };

        if prices.len() < period {
            return Ok(vec![first; prices.len()]);
        }

        let mut result = Vec::with_capacity(prices.len());
        result.extend(std::iter::repeat(first).take(period - 1));

        let seed: Decimal = prices[..period].iter().sum::<Decimal>() / Decimal::from(period);
        result.push(seed);

        let mut prev_ema = seed;
        for &price in &prices[period..] {
            prev_ema = Self::ema_step(prev_ema, price, period);
            result.push(prev_ema);
        }

        Ok(result)
    }

    /// MACD 계산.
    ///
    /// MACD 라인 = 단기 EMA - 장기 EMA
    /// 시그널 라인 = MACD 라인의 EMA
    /// 히스토그램 = MACD 라인 - 시그널 라인
    ///
    /// 입력이 장기 기간보다 짧으면 모두 0입니다.
    pub fn macd(&self, prices: &[Decimal], params: MacdParams) -> IndicatorResult<Vec<MacdResult>> {
        if params.fast_period == 0 || params.slow_period == 0 || params.signal_period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "MACD 기간은 0보다 커야 합니다".to_string(),
            ));
        }
        if params.fast_period >= params.slow_period {
            return Err(IndicatorError::InvalidParameter(format!(
                "단기 기간({})은 장기 기간({})보다 짧아야 합니다",
                params.fast_period, params.slow_period
            )));
        }

        if prices.len() < params.slow_period {
            return Ok(vec![MacdResult::default(); prices.len()]);
        }

        let fast = self.ema(prices, EmaParams { period: params.fast_period })?;
        let slow = self.ema(prices, EmaParams { period: params.slow_period })?;

        let macd_line: Vec<Decimal> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal_line = self.ema(&macd_line, EmaParams { period: params.signal_period })?;

        Ok(macd_line
            .into_iter()
            .zip(signal_line)
            .map(|(macd, signal)| MacdResult {
                macd,
                signal,
                histogram: macd - signal,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_prices() -> Vec<Decimal> {
        vec![
            dec!(100.0),
            dec!(102.0),
            dec!(101.0),
            dec!(103.0),
            dec!(105.0),
            dec!(104.0),
            dec!(106.0),
            dec!(108.0),
            dec!(107.0),
            dec!(109.0),
        ]
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let trend = TrendIndicators::new();
        let ema = trend.ema(&sample_prices(), EmaParams { period: 3 }).unwrap();

        assert_eq!(ema.len(), 10);
        // 워밍업 구간은 첫 가격
        assert_eq!(ema[0], dec!(100));
        assert_eq!(ema[1], dec!(100));
        // (100 + 102 + 101) / 3
        assert_eq!(ema[2], dec!(101));
        // 101 + (103 - 101) × 0.5
        assert_eq!(ema[3], dec!(102));
    }

    #[test]
    fn test_ema_constant_sequence() {
        let trend = TrendIndicators::new();
        let prices = vec![dec!(42.5); 30];
        let ema = trend.ema(&prices, EmaParams { period: 10 }).unwrap();

        for value in &ema[9..] {
            assert_eq!(*value, dec!(42.5));
        }
    }

    #[test]
    fn test_ema_short_input_pads_with_first() {
        let trend = TrendIndicators::new();
        let ema = trend
            .ema(&[dec!(5), dec!(6), dec!(7)], EmaParams { period: 10 })
            .unwrap();
        assert_eq!(ema, vec![dec!(5); 3]);
    }

    #[test]
    fn test_ema_zero_period_rejected() {
        let trend = TrendIndicators::new();
        assert!(trend.ema(&sample_prices(), EmaParams { period: 0 }).is_err());
    }

    #[test]
    fn test_ema_step_matches_series() {
        let trend = TrendIndicators::new();
        let prices = sample_prices();
        let ema = trend.ema(&prices, EmaParams { period: 3 }).unwrap();
        assert_eq!(TrendIndicators::ema_step(ema[8], prices[9], 3), ema[9]);
    }

    #[test]
    fn test_macd_histogram_identity() {
        let trend = TrendIndicators::new();
        let prices: Vec<Decimal> = (0..60).map(|i| Decimal::from(100 + (i * 7) % 13)).collect();
        let macd = trend.macd(&prices, MacdParams::default()).unwrap();

        assert_eq!(macd.len(), prices.len());
        for point in &macd {
            assert_eq!(point.histogram, point.macd - point.signal);
        }
    }

    #[test]
    fn test_macd_short_input_is_zero() {
        let trend = TrendIndicators::new();
        let macd = trend.macd(&sample_prices(), MacdParams::default()).unwrap();
        assert_eq!(macd.len(), 10);
        assert!(macd.iter().all(|m| *m == MacdResult::default()));
    }

    #[test]
    fn test_macd_rising_prices_positive() {
        let trend = TrendIndicators::new();
        let prices: Vec<Decimal> = (0..50).map(|i| Decimal::from(100 + i)).collect();
        let macd = trend.macd(&prices, MacdParams::default()).unwrap();
        assert!(macd[49].macd > Decimal::ZERO);
    }
}
