//! 알림에 첨부되는 예측 결과.

use serde::{Deserialize, Serialize};

/// 모델 예측 요약.
///
/// 값은 모두 향후 가격 변화율(%) 단위입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    /// 예측 변화율
    pub value: f64,
    /// 95% 하한
    pub lower: f64,
    /// 95% 상한
    pub upper: f64,
    /// 신뢰도 점수 (0~100)
    pub confidence: f64,
    /// 표준편차
    pub std_dev: f64,
    /// 사용된 모델 버전 (앙상블이면 가장 최근 버전)
    pub version: String,
    /// 앙상블에 사용된 모델 수 (단일 모델이면 1)
    pub models_used: usize,
}
