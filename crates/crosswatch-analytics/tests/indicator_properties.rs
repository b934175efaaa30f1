//! 지표 불변식 속성 테스트.

use proptest::prelude::*;
use rust_decimal::Decimal;
use crosswatch_analytics::indicators::{
    BollingerBandsParams, EmaParams, IndicatorEngine, MacdParams, RsiParams,
};

fn prices() -> impl Strategy<Value = Vec<Decimal>> {
    prop::collection::vec(1u32..100_000, 0..120)
        .prop_map(|v| v.into_iter().map(Decimal::from).collect())
}

proptest! {
    #[test]
    fn outputs_match_input_length(prices in prices(), period in 1usize..50) {
        let engine = IndicatorEngine::new();
        let n = prices.len();

        prop_assert_eq!(engine.ema(&prices, EmaParams { period }).unwrap().len(), n);
        prop_assert_eq!(engine.rsi(&prices, RsiParams { period }).unwrap().len(), n);
        prop_assert_eq!(engine.macd(&prices, MacdParams::default()).unwrap().len(), n);
        let bb = BollingerBandsParams { period, ..Default::default() };
        prop_assert_eq!(engine.bollinger_bands(&prices, bb).unwrap().len(), n);
    }

    #[test]
    fn rsi_is_bounded(prices in prices(), period in 1usize..30) {
        let rsi = IndicatorEngine::new().rsi(&prices, RsiParams { period }).unwrap();
        for value in rsi {
            prop_assert!(value >= Decimal::ZERO && value <= Decimal::ONE_HUNDRED);
        }
    }

    #[test]
    fn bollinger_bands_are_ordered(prices in prices(), period in 1usize..30) {
        let params = BollingerBandsParams { period, ..Default::default() };
        let bands = IndicatorEngine::new().bollinger_bands(&prices, params).unwrap();
        for band in bands {
            prop_assert!(band.upper >= band.middle);
            prop_assert!(band.middle >= band.lower);
        }
    }

    #[test]
    fn macd_histogram_is_macd_minus_signal(prices in prices()) {
        let macd = IndicatorEngine::new().macd(&prices, MacdParams::default()).unwrap();
        for m in macd {
            prop_assert_eq!(m.histogram, m.macd - m.signal);
        }
    }

    #[test]
    fn ema_of_constant_series_is_constant(price in 1u32..100_000, len in 1usize..300, period in 1usize..250) {
        let price = Decimal::from(price);
        let prices = vec![price; len];
        let ema = IndicatorEngine::new().ema(&prices, EmaParams { period }).unwrap();
        prop_assert!(ema.iter().all(|v| *v == price));
    }
}
