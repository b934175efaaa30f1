//! 세션 이벤트 분배.
//!
//! - 학습 포인트 → 학습 데이터 저장소 + 레이블 백필 예약
//! - 크로스오버 → (예측 첨부) → 알림 관리자

use crate::backfill::LabelScheduler;
use crate::session::SessionEvent;
use crosswatch_analytics::ml::{FeaturePoint, FeatureSet, MlError, PredictionService, TrainingStore};
use crosswatch_core::{Crossover, PredictionOutcome};
use crosswatch_notification::{AlertEvent, CrossoverAlert, NotificationManager};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 모델 관련 협력자 묶음.
pub struct MlServices {
    pub store: Arc<TrainingStore>,
    pub labels: Arc<LabelScheduler>,
    pub predictor: Arc<PredictionService>,
    /// 앙상블 예측 사용 여부
    pub use_ensemble: bool,
    /// 앙상블 크기
    pub ensemble_size: usize,
}

/// 세션 이벤트 분배기.
pub struct Dispatcher {
    notifier: Arc<NotificationManager>,
    ml: Option<MlServices>,
}

impl Dispatcher {
    /// 모델 없이 알림만 보내는 분배기.
    pub fn new(notifier: Arc<NotificationManager>) -> Self {
        Self { notifier, ml: None }
    }

    /// 학습 데이터 기록과 예측을 활성화합니다.
    pub fn with_ml(mut self, ml: MlServices) -> Self {
        self.ml = Some(ml);
        self
    }

    /// 채널이 닫히거나 취소될 때까지 이벤트를 처리합니다.
    ///
    /// 취소된 뒤에도 이미 채널에 들어온 이벤트는 모두 처리합니다.
    pub async fn run(self, mut events: mpsc::Receiver<SessionEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    events.close();
                    while let Some(event) = events.recv().await {
                        self.handle(event).await;
                    }
                    break;
                }
            }
        }
        info!("Dispatcher stopped");
    }

    /// 이벤트 하나를 처리합니다.
    pub async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::FeaturePoint(point) => self.record(point).await,
            SessionEvent::Crossover {
                symbol,
                crossover,
                features,
            } => self.alert(symbol, crossover, features).await,
        }
    }

    async fn record(&self, point: FeaturePoint) {
        let Some(ml) = &self.ml else {
            return;
        };

        match ml.store.append(point.clone()).await {
            Ok(true) => ml.labels.schedule(&point),
            Ok(false) => debug!(symbol = %point.symbol, timestamp = %point.timestamp, "Duplicate feature point"),
            Err(e) => warn!(symbol = %point.symbol, error = %e, "Feature point rejected"),
        }
    }

    async fn alert(&self, symbol: String, crossover: Crossover, features: Option<FeatureSet>) {
        let prediction = match features {
            Some(features) => self.predict(&symbol, features).await,
            None => None,
        };

        let alert = CrossoverAlert::from_crossover(symbol, &crossover).with_prediction(prediction);
        let symbol = alert.symbol.clone();
        if let Err(e) = self.notifier.emit(AlertEvent::Crossover(alert)).await {
            warn!(symbol = %symbol, error = %e, "Crossover notification failed");
        }
    }

    /// 예측 실패는 알림을 막지 않습니다.
    async fn predict(&self, symbol: &str, features: FeatureSet) -> Option<PredictionOutcome> {
        let ml = self.ml.as_ref()?;
        let predictor = Arc::clone(&ml.predictor);
        let owned = symbol.to_string();
        let (use_ensemble, size) = (ml.use_ensemble, ml.ensemble_size);

        let result = tokio::task::spawn_blocking(move || {
            if use_ensemble {
                predictor.predict_ensemble(&owned, &features, size)
            } else {
                predictor.predict(&owned, &features, None)
            }
        })
        .await;

        match result {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(MlError::NoModel(_))) => {
                debug!(symbol = %symbol, "No model yet; alert sent without prediction");
                None
            }
            Ok(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "Prediction failed");
                None
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Prediction task panicked");
                None
            }
        }
    }
}
