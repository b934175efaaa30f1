//! 거래소 시장 데이터 연결.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `MarketDataProvider` trait: 심볼 탐색, 과거 캔들, 실시간 캔들 스트림, 현재가
//! - Binance 커넥터 (REST + kline WebSocket)
//! - 스크립트 기반 시장 데이터 (세션/감독자 테스트용)

pub mod connector;
pub mod error;
pub mod simulated;
pub mod traits;
pub mod websocket;

pub use connector::{BinanceClient, BinanceConfig};
pub use error::*;
pub use simulated::ScriptedMarketData;
pub use traits::*;
