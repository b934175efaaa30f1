//! 실시간 크로스오버 감시 서비스.
//!
//! 이 crate는 다음을 제공합니다:
//! - 심볼별 스트림 세션 (과거 캔들 시드, 재연결, 공백 메우기)
//! - 거래대금 기준 감시 대상 재조정과 생존 점검 (감독자)
//! - 이벤트 분배 (학습 데이터 기록, 예측 첨부, 알림)
//! - 레이블 백필과 주기적 재학습 작업

pub mod backfill;
pub mod dispatcher;
pub mod error;
pub mod jobs;
pub mod session;
pub mod supervisor;

pub use backfill::LabelScheduler;
pub use dispatcher::{Dispatcher, MlServices};
pub use error::{CollectorError, Result};
pub use jobs::TrainingJob;
pub use session::{
    SessionCommand, SessionConfig, SessionEvent, SessionHandle, SessionState, SessionStatus,
    SymbolSession,
};
pub use supervisor::{HeartbeatReport, ReconcileReport, StreamSupervisor};
