//! # Crosswatch Notification
//!
//! 크로스오버 감시 시스템의 알림 출구.
//!
//! 코어는 문장을 만들지 않고 구조화된 [`AlertEvent`]만 넘깁니다:
//! - `crossover` - 가격/지표 크로스오버 (예측 첨부 가능)
//! - `new_symbol` - 새로 감시 대상이 된 심볼
//! - `training_complete` - 학습 배치 통계
//!
//! 지원 전송기:
//! - [`LogSink`] - 구조화 로그
//! - [`ChannelSink`] - mpsc 채널

pub mod manager;
pub mod sinks;
pub mod types;

pub use manager::*;
pub use sinks::*;
pub use types::*;
