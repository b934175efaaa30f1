//! # Crosswatch Analytics
//!
//! 지표 계산과 모델 수명주기를 담당합니다.
//!
//! - [`indicators`]: EMA, RSI, MACD, 볼린저 밴드, ATR
//! - [`ml`]: 학습 데이터 저장소, 모델 레지스트리, 예측 서비스

pub mod indicators;
pub mod ml;

pub use indicators::{IndicatorEngine, IndicatorError, IndicatorResult, IndicatorSettings, IndicatorSnapshot};
