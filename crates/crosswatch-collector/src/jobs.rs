//! 예약 작업: 주기적 재학습과 버전 정리.
//!
//! 학습은 CPU/메모리를 많이 쓰므로 한 번에 한 심볼씩만 진행합니다.
//! 메모리 가드가 걸리면 남은 심볼은 다음 배치로 미룹니다.

use crate::error::Result;
use crosswatch_analytics::ml::{
    ComparisonReport, MlError, ModelRegistry, PredictionService, Trainer, TrainingStore,
};
use crosswatch_core::{TrainingBatchReport, TrainingStatus};
use crosswatch_notification::{AlertEvent, NotificationManager};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 재학습/정리 작업.
pub struct TrainingJob {
    store: Arc<TrainingStore>,
    registry: Arc<ModelRegistry>,
    trainer: Arc<Trainer>,
    predictor: Option<Arc<PredictionService>>,
    keep_versions: usize,
    /// 배치 직렬화
    running: Mutex<()>,
}

impl TrainingJob {
    pub fn new(
        store: Arc<TrainingStore>,
        registry: Arc<ModelRegistry>,
        trainer: Trainer,
        keep_versions: usize,
    ) -> Self {
        Self {
            store,
            registry,
            trainer: Arc::new(trainer),
            predictor: None,
            keep_versions,
            running: Mutex::new(()),
        }
    }

    /// 새 버전 저장 후 캐시를 비울 예측 서비스를 지정합니다.
    pub fn with_predictor(mut self, predictor: Arc<PredictionService>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// 학습 배치를 실행합니다.
    ///
    /// 한 심볼의 실패는 배치를 중단시키지 않으며, 결과는 항목별로 집계됩니다.
    ///
    /// # 인자
    /// * `only` - 지정하면 해당 심볼만 학습
    pub async fn run_batch(&self, only: Option<&str>) -> TrainingBatchReport {
        let _running = self.running.lock().await;
        let start = Instant::now();
        let mut report = TrainingBatchReport::new();

        let symbols = match only {
            Some(symbol) => vec![symbol.to_string()],
            None => self.store.symbols().await,
        };
        let min_points = self.trainer.config().min_points;
        let mut deferred = false;

        for symbol in symbols {
            if deferred {
                report.record(symbol, TrainingStatus::Deferred);
                continue;
            }

            let samples = self.store.labeled_samples(&symbol).await;
            if samples.len() < min_points {
                info!(symbol = %symbol, labeled = samples.len(), required = min_points, "Not enough labeled points; skipping");
                report.record(
                    symbol,
                    TrainingStatus::Skipped {
                        reason: format!("{} of {} labeled points", samples.len(), min_points),
                    },
                );
                continue;
            }

            let status = match self.train_symbol(&symbol, samples).await {
                Ok(version) => TrainingStatus::Trained { version },
                Err(crate::CollectorError::Ml(e)) if e.is_deferral() => {
                    warn!(symbol = %symbol, error = %e, "Memory guard tripped; deferring remaining symbols");
                    deferred = true;
                    TrainingStatus::Deferred
                }
                Err(crate::CollectorError::Ml(e)) if e.is_not_performed() => {
                    TrainingStatus::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "Training failed");
                    TrainingStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.record(symbol, status);
        }

        report.elapsed = start.elapsed();
        report
    }

    /// 한 심볼을 학습하고 저장한 뒤 오래된 버전을 정리합니다.
    async fn train_symbol(
        &self,
        symbol: &str,
        samples: Vec<crosswatch_analytics::ml::TrainingSample>,
    ) -> Result<String> {
        let trainer = Arc::clone(&self.trainer);
        let registry = Arc::clone(&self.registry);
        let owned = symbol.to_string();
        let keep = self.keep_versions;

        let version = tokio::task::spawn_blocking(move || -> std::result::Result<String, MlError> {
            let model = trainer.train(&samples)?;
            let version = registry.persist(&owned, &model)?;
            let removed = registry.prune(&owned, keep)?;
            if !removed.is_empty() {
                info!(symbol = %owned, removed = removed.len(), "Old model versions pruned");
            }
            Ok(version)
        })
        .await??;

        if let Some(predictor) = &self.predictor {
            predictor.invalidate(symbol);
        }
        info!(symbol = %symbol, version = %version, "Model version stored");
        Ok(version)
    }

    /// 모든 심볼의 오래된 버전을 정리합니다.
    ///
    /// # 반환
    /// (심볼, 삭제된 버전 목록). 실패한 심볼은 경고 후 건너뜁니다.
    pub async fn prune_all(&self) -> Result<Vec<(String, Vec<String>)>> {
        let registry = Arc::clone(&self.registry);
        let keep = self.keep_versions;

        let pruned = tokio::task::spawn_blocking(move || -> std::result::Result<_, MlError> {
            let mut pruned = Vec::new();
            for symbol in registry.symbols()? {
                match registry.prune(&symbol, keep) {
                    Ok(removed) => pruned.push((symbol, removed)),
                    Err(e) => warn!(symbol = %symbol, error = %e, "Prune failed"),
                }
            }
            Ok(pruned)
        })
        .await??;

        if let Some(predictor) = &self.predictor {
            for (symbol, removed) in &pruned {
                if !removed.is_empty() {
                    predictor.invalidate(symbol);
                }
            }
        }
        Ok(pruned)
    }

    /// 두 버전을 최근 레이블 데이터로 비교합니다.
    pub async fn compare(
        &self,
        symbol: &str,
        version_a: &str,
        version_b: &str,
    ) -> Result<ComparisonReport> {
        let samples = self.store.labeled_samples(symbol).await;
        let registry = Arc::clone(&self.registry);
        let (symbol, a, b) = (symbol.to_string(), version_a.to_string(), version_b.to_string());

        let report = tokio::task::spawn_blocking(move || registry.compare(&symbol, &a, &b, &samples))
            .await??;
        Ok(report)
    }

    /// `interval`마다 재학습 배치를 실행하고 결과를 알립니다.
    pub async fn run_periodic(
        self: Arc<Self>,
        interval: Duration,
        notifier: Arc<NotificationManager>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_batch(None).await;
                    report.log_summary("재학습");
                    if let Err(e) = notifier.emit(AlertEvent::TrainingComplete(report)).await {
                        warn!(error = %e, "Training report notification failed");
                    }
                }
            }
        }
        info!("Training job stopped");
    }
}
