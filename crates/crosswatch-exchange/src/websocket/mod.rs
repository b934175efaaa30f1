//! WebSocket 스트림 구현.

pub mod stream;

pub use stream::BinanceKlineStream;
