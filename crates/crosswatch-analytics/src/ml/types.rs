//! ML 모듈의 공통 타입.

use crate::ml::error::{MlError, MlResult};
use crate::ml::network::Activation;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// feature 이름 (저장되는 feature 목록 순서).
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "ema_diff",
    "rsi",
    "macd_hist",
    "bb_width",
    "atr",
    "volume_change",
];

/// feature 개수.
pub const FEATURE_COUNT: usize = 6;

/// 캔들 마감 시점에 계산한 파생 지표.
///
/// 가격 규모가 다른 심볼끼리 비교할 수 있도록 `rsi`를 제외한 값은 종가 대비 %입니다.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// (종가 - EMA) / EMA × 100
    pub ema_diff: f64,
    /// RSI (0~100)
    pub rsi: f64,
    /// MACD 히스토그램 / 종가 × 100
    pub macd_hist: f64,
    /// 볼린저 밴드 폭 × 100
    pub bb_width: f64,
    /// ATR / 종가 × 100
    pub atr: f64,
    /// 직전 캔들 대비 거래량 변화율
    pub volume_change: f64,
}

impl FeatureSet {
    /// [`FEATURE_NAMES`] 순서의 배열.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.ema_diff,
            self.rsi,
            self.macd_hist,
            self.bb_width,
            self.atr,
            self.volume_change,
        ]
    }

    /// 모든 feature가 유한한 숫자인지 검증합니다.
    pub fn validate(&self) -> MlResult<()> {
        for (name, value) in FEATURE_NAMES.iter().zip(self.to_array()) {
            if !value.is_finite() {
                return Err(MlError::InvalidInput(format!(
                    "feature '{}' is not finite: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// 원시 OHLCV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOhlcv {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// 학습 데이터 포인트.
///
/// 식별자는 (symbol, timestamp)이며 레이블은 한 번만 기록됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePoint {
    pub symbol: String,
    /// 캔들 마감 시각
    pub timestamp: DateTime<Utc>,
    pub ohlcv: RawOhlcv,
    pub features: FeatureSet,
    /// 레이블 시점의 가격 변화율 (%)
    pub label: Option<f64>,
}

impl FeaturePoint {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        ohlcv: RawOhlcv,
        features: FeatureSet,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            ohlcv,
            features,
            label: None,
        }
    }

    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }
}

/// 레이블이 있는 학습 샘플 (정규화 전 값).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: FeatureSet,
    pub label: f64,
}

impl TrainingSample {
    /// 레이블된 포인트에서 생성합니다. 레이블이 없으면 `None`.
    pub fn from_point(point: &FeaturePoint) -> Option<Self> {
        point.label.map(|label| Self {
            features: point.features,
            label,
        })
    }
}

/// 모델 하이퍼파라미터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// 은닉층 크기
    pub hidden_layers: Vec<usize>,
    /// 학습률
    pub learning_rate: f64,
    /// 은닉층 활성화 함수
    pub activation: Activation,
    /// 최대 반복 횟수
    pub iterations: usize,
    /// 조기 종료 기준 MSE
    pub error_threshold: f64,
}

impl Hyperparameters {
    /// 탐색이 모두 실패했을 때 사용하는 보수적 설정.
    pub fn degraded() -> Self {
        Self {
            hidden_layers: vec![8],
            learning_rate: 0.01,
            activation: Activation::Sigmoid,
            iterations: 200,
            error_threshold: 0.02,
        }
    }
}

/// 95% 신뢰 구간.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// 모델 성능 지표.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// 평균 절대 오차 (변화율 % 단위)
    pub mean_absolute_error: f64,
    /// 방향 적중률 (0~1)
    pub direction_accuracy: f64,
    /// 오차 평균의 95% 신뢰 구간
    pub confidence_interval_95: ConfidenceInterval,
    /// 예측 오차의 표준편차
    pub std_dev: f64,
    /// 평가 샘플 수
    pub sample_count: usize,
}

impl PerformanceMetrics {
    /// 탐색/비교 점수: 방향 적중률 - 0.1 × MAE.
    pub fn score(&self) -> f64 {
        self.direction_accuracy - 0.1 * self.mean_absolute_error
    }
}

/// 두 모델 버전의 비교 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub symbol: String,
    pub version_a: String,
    pub version_b: String,
    pub metrics_a: PerformanceMetrics,
    pub metrics_b: PerformanceMetrics,
    /// 점수가 높은 버전 (같으면 A)
    pub winner: String,
    /// 패자 점수 대비 승자 점수의 상대 개선율 (%)
    pub improvement_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> FeatureSet {
        FeatureSet {
            ema_diff: 1.0,
            rsi: 55.0,
            macd_hist: 0.1,
            bb_width: 3.0,
            atr: 0.8,
            volume_change: 12.0,
        }
    }

    #[test]
    fn test_feature_validation() {
        assert!(features().validate().is_ok());

        let mut bad = features();
        bad.rsi = f64::NAN;
        assert!(matches!(bad.validate(), Err(MlError::InvalidInput(_))));

        bad = features();
        bad.atr = f64::INFINITY;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_metrics_score() {
        let metrics = PerformanceMetrics {
            mean_absolute_error: 2.0,
            direction_accuracy: 0.6,
            confidence_interval_95: ConfidenceInterval { lower: 1.5, upper: 2.5 },
            std_dev: 1.0,
            sample_count: 20,
        };
        assert!((metrics.score() - 0.4).abs() < 1e-12);
    }
}
