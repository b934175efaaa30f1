//! 학습 배치 통계.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 심볼 하나의 학습 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingStatus {
    /// 새 버전 저장
    Trained { version: String },
    /// 데이터 부족으로 수행하지 않음
    Skipped { reason: String },
    /// 메모리 상한으로 다음 배치로 미룸
    Deferred,
    /// 실패
    Failed { reason: String },
}

/// 배치 안의 개별 항목.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolTrainingResult {
    pub symbol: String,
    #[serde(flatten)]
    pub status: TrainingStatus,
}

/// 학습 배치 통계.
///
/// 한 심볼의 실패가 배치를 중단시키지 않으므로 항목별 결과를 모두 기록합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingBatchReport {
    /// 총 대상 심볼 수
    pub total: usize,
    /// 새 버전이 저장된 수
    pub success: usize,
    /// 실패 수
    pub failed: usize,
    /// 데이터 부족으로 건너뛴 수
    pub skipped: usize,
    /// 메모리 상한으로 미룬 수
    pub deferred: usize,
    /// 항목별 결과
    pub items: Vec<SymbolTrainingResult>,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl TrainingBatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 항목 결과를 집계에 반영합니다.
    pub fn record(&mut self, symbol: impl Into<String>, status: TrainingStatus) {
        self.total += 1;
        match &status {
            TrainingStatus::Trained { .. } => self.success += 1,
            TrainingStatus::Skipped { .. } => self.skipped += 1,
            TrainingStatus::Deferred => self.deferred += 1,
            TrainingStatus::Failed { .. } => self.failed += 1,
        }
        self.items.push(SymbolTrainingResult {
            symbol: symbol.into(),
            status,
        });
    }

    /// 새로 저장된 (심볼, 버전) 목록.
    pub fn trained(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|item| match &item.status {
            TrainingStatus::Trained { version } => Some((item.symbol.as_str(), version.as_str())),
            _ => None,
        })
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.success as f64 / self.total as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            success = self.success,
            failed = self.failed,
            skipped = self.skipped,
            deferred = self.deferred,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "학습 배치 완료"
        );
    }
}
