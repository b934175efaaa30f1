//! 도메인 모델.

mod candle;
mod crossover;
mod prediction;
mod report;

pub use candle::*;
pub use crossover::*;
pub use prediction::*;
pub use report::*;
