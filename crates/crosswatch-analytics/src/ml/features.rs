//! feature 추출과 고정 범위 정규화.
//!
//! 정규화 범위는 상수로 고정되어 학습과 예측이 같은 스케일을 공유합니다.
//! 범위를 벗어난 값은 잘라내고, NaN은 중간값 0.5로 대체합니다.

use crate::indicators::IndicatorSnapshot;
use crate::ml::types::{FeatureSet, RawOhlcv, FEATURE_COUNT};
use crosswatch_core::Candle;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 이름 있는 (min, max) 정규화 범위.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRange {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    pub const fn new(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, min, max }
    }

    /// 값을 [0, 1]로 정규화합니다.
    pub fn normalize(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return 0.5;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// 정규화된 값을 원래 단위로 되돌립니다.
    pub fn denormalize(&self, normalized: f64) -> f64 {
        self.min + normalized * (self.max - self.min)
    }
}

/// EMA 대비 가격 차이 (%).
pub const EMA_DIFF_RANGE: FeatureRange = FeatureRange::new("ema_diff", -10.0, 10.0);
/// RSI.
pub const RSI_RANGE: FeatureRange = FeatureRange::new("rsi", 0.0, 100.0);
/// MACD 히스토그램 (종가 대비 %).
pub const MACD_HIST_RANGE: FeatureRange = FeatureRange::new("macd_hist", -2.0, 2.0);
/// 볼린저 밴드 폭 (%).
pub const BB_WIDTH_RANGE: FeatureRange = FeatureRange::new("bb_width", 0.0, 20.0);
/// ATR (종가 대비 %).
pub const ATR_RANGE: FeatureRange = FeatureRange::new("atr", 0.0, 10.0);
/// 거래량 변화율 (%).
pub const VOLUME_CHANGE_RANGE: FeatureRange = FeatureRange::new("volume_change", -100.0, 500.0);

/// feature 순서대로의 정규화 범위.
pub const FEATURE_RANGES: [FeatureRange; FEATURE_COUNT] = [
    EMA_DIFF_RANGE,
    RSI_RANGE,
    MACD_HIST_RANGE,
    BB_WIDTH_RANGE,
    ATR_RANGE,
    VOLUME_CHANGE_RANGE,
];

/// 레이블(향후 가격 변화율 %) 범위.
pub const LABEL_RANGE: FeatureRange = FeatureRange::new("future_change", -20.0, 20.0);

/// feature 집합을 모델 입력으로 정규화합니다.
pub fn normalize_features(features: &FeatureSet) -> [f64; FEATURE_COUNT] {
    let raw = features.to_array();
    let mut normalized = [0.5; FEATURE_COUNT];
    for (i, range) in FEATURE_RANGES.iter().enumerate() {
        normalized[i] = range.normalize(raw[i]);
    }
    normalized
}

/// 캔들 버퍼와 지표 스냅샷에서 feature를 추출합니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 마지막 캔들 기준 feature와 원시 OHLCV를 반환합니다.
    ///
    /// 버퍼가 비어 있으면 `None`.
    pub fn extract(
        &self,
        candles: &[Candle],
        snapshot: &IndicatorSnapshot,
    ) -> Option<(RawOhlcv, FeatureSet)> {
        let last = candles.last()?;
        let close = last.close;
        let ema = snapshot.last_ema()?;

        let volume_change = match candles.len().checked_sub(2).map(|i| candles[i].volume) {
            Some(prev) if !prev.is_zero() => pct(last.volume - prev, prev),
            _ => 0.0,
        };

        let features = FeatureSet {
            ema_diff: pct(close - ema, ema),
            rsi: to_f64(snapshot.rsi),
            macd_hist: pct(snapshot.macd.histogram, close),
            bb_width: to_f64(snapshot.bollinger.bandwidth() * Decimal::ONE_HUNDRED),
            atr: pct(snapshot.atr, close),
            volume_change,
        };

        let ohlcv = RawOhlcv {
            open: last.open,
            high: last.high,
            low: last.low,
            close,
            volume: last.volume,
        };

        Some((ohlcv, features))
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// numerator / denominator × 100. 분모가 0이면 0.
fn pct(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    to_f64(numerator / denominator * Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{IndicatorEngine, IndicatorSettings};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_clamps_and_handles_nan() {
        assert_eq!(RSI_RANGE.normalize(50.0), 0.5);
        assert_eq!(RSI_RANGE.normalize(150.0), 1.0);
        assert_eq!(RSI_RANGE.normalize(-3.0), 0.0);
        assert_eq!(RSI_RANGE.normalize(f64::NAN), 0.5);
    }

    #[test]
    fn test_label_denormalize_inverts_normalize() {
        let value = 4.2;
        let back = LABEL_RANGE.denormalize(LABEL_RANGE.normalize(value));
        assert!((back - value).abs() < 1e-9);
    }

    #[test]
    fn test_extract_features() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut candles: Vec<Candle> = (0..30)
            .map(|i| {
                let t = start + Duration::minutes(15 * i);
                Candle::flat(t, t + Duration::minutes(15), dec!(10), dec!(100))
            })
            .collect();
        let t = start + Duration::minutes(15 * 30);
        candles.push(Candle::flat(t, t + Duration::minutes(15), dec!(10.5), dec!(150)));

        let snapshot = IndicatorEngine::new()
            .snapshot(&candles, &IndicatorSettings::with_ema_period(20))
            .unwrap();
        let (ohlcv, features) = FeatureExtractor::new().extract(&candles, &snapshot).unwrap();

        assert_eq!(ohlcv.close, dec!(10.5));
        assert!(features.ema_diff > 0.0);
        assert!((features.volume_change - 50.0).abs() < 1e-9);
        assert!(features.validate().is_ok());
    }
}
