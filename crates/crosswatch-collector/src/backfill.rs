//! 레이블 백필 스케줄러.
//!
//! 학습 포인트마다 생성 시각 + horizon에 한 번 그 시각의 가격을 조회해
//! 가격 변화율(%)을 레이블로 기록합니다. 세션이 닫혀도 예약된 백필은 끝까지
//! 실행됩니다.
//!
//! 기한을 캔들 한 개 간격 넘게 지난 포인트(재시작 후 재예약 등)는 현재가 대신
//! 기한 시각을 포함하는 과거 캔들의 종가를 씁니다. 그런 캔들이 없으면 레이블을
//! 남기지 않습니다.

use chrono::{DateTime, Utc};
use crosswatch_analytics::ml::{FeaturePoint, LabelOutcome, TrainingStore};
use crosswatch_core::{percent_change, Timeframe};
use crosswatch_exchange::{ExchangeError, MarketDataProvider};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 현재가 조회 최대 시도 횟수.
const MAX_PRICE_ATTEMPTS: u32 = 3;

/// 레이블 백필 스케줄러.
pub struct LabelScheduler {
    store: Arc<TrainingStore>,
    provider: Arc<dyn MarketDataProvider>,
    horizon: chrono::Duration,
    timeframe: Timeframe,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl LabelScheduler {
    /// # 인자
    /// * `horizon` - 포인트 생성 후 레이블 가격을 볼 시점까지의 간격
    /// * `timeframe` - 과거 가격 조회에 쓸 캔들 간격 (지연 허용치이기도 함)
    pub fn new(
        store: Arc<TrainingStore>,
        provider: Arc<dyn MarketDataProvider>,
        horizon: chrono::Duration,
        timeframe: Timeframe,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            provider,
            horizon,
            timeframe,
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// 대기 중인 백필 수.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// 포인트의 레이블 백필을 예약합니다.
    ///
    /// 이미 기한이 지났으면 바로 실행합니다.
    pub fn schedule(self: &Arc<Self>, point: &FeaturePoint) {
        let due = point.timestamp + self.horizon;
        let delay = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let symbol = point.symbol.clone();
        let timestamp = point.timestamp;
        let base = point.ohlcv.close;
        let this = Arc::clone(self);

        debug!(symbol = %symbol, due = %due, "Label backfill scheduled");
        self.tracker.spawn(async move {
            tokio::select! {
                _ = this.cancel.cancelled() => {
                    debug!(symbol = %symbol, "Label backfill cancelled by shutdown");
                }
                _ = tokio::time::sleep(delay) => {
                    this.backfill(&symbol, timestamp, base).await;
                }
            }
        });
    }

    /// 시작 시 레이블이 없는 포인트를 다시 예약합니다.
    pub async fn reschedule_pending(self: &Arc<Self>) -> usize {
        let points = self.store.unlabeled_points().await;
        for point in &points {
            self.schedule(point);
        }
        if !points.is_empty() {
            info!(count = points.len(), "Pending label backfills rescheduled");
        }
        points.len()
    }

    /// 기한 시각의 가격을 조회해 레이블을 기록합니다.
    ///
    /// 같은 포인트에 두 번째 기록은 경고만 남기고 무시됩니다.
    pub async fn backfill(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        base: Decimal,
    ) -> Option<LabelOutcome> {
        let due = timestamp + self.horizon;
        let price = match self.realized_price(symbol, due).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                warn!(symbol = %symbol, timestamp = %timestamp, due = %due, "No candle covers label due time; leaving point unlabeled");
                return None;
            }
            Err(e) => {
                warn!(symbol = %symbol, timestamp = %timestamp, error = %e, "Label price unavailable");
                return None;
            }
        };

        let Some(label) = percent_change(base, price).and_then(|c| c.to_f64()) else {
            warn!(symbol = %symbol, base = %base, "Cannot compute label from zero base price");
            return None;
        };

        match self.store.set_label(symbol, timestamp, label).await {
            Ok(outcome) => {
                if outcome == LabelOutcome::Recorded {
                    debug!(symbol = %symbol, timestamp = %timestamp, label, "Label recorded");
                }
                Some(outcome)
            }
            Err(e) => {
                warn!(symbol = %symbol, timestamp = %timestamp, error = %e, "Label write failed");
                None
            }
        }
    }

    /// `due` 시각의 가격.
    ///
    /// 기한이 캔들 한 개 간격 안이면 현재가, 그보다 늦었으면 `due`를 포함하는
    /// 캔들의 종가입니다.
    async fn realized_price(
        &self,
        symbol: &str,
        due: DateTime<Utc>,
    ) -> Result<Option<Decimal>, ExchangeError> {
        let lateness = Utc::now() - due;
        let tolerance = chrono::Duration::seconds(self.timeframe.as_secs() as i64);
        if lateness <= tolerance {
            return self
                .with_retry(symbol, || self.provider.fetch_latest_price(symbol))
                .await
                .map(Some);
        }

        debug!(symbol = %symbol, due = %due, "Label overdue; using historical candle");
        let candle = self
            .with_retry(symbol, || {
                self.provider.fetch_candle_at(symbol, self.timeframe, due)
            })
            .await?;
        Ok(candle.map(|c| c.close))
    }

    async fn with_retry<T, F, Fut>(&self, symbol: &str, mut call: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_PRICE_ATTEMPTS => {
                    let delay = Duration::from_millis(e.retry_delay_ms().unwrap_or(1000));
                    debug!(symbol = %symbol, attempt, error = %e, "Retrying price lookup");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 새 예약을 막고 진행 중인 백필이 끝나기를 기다립니다.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosswatch_analytics::ml::{FeatureSet, RawOhlcv};
    use crosswatch_core::Candle;
    use crosswatch_exchange::ScriptedMarketData;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn point(symbol: &str, timestamp: DateTime<Utc>, close: Decimal) -> FeaturePoint {
        FeaturePoint::new(
            symbol,
            timestamp,
            RawOhlcv {
                open: close,
                high: close,
                low: close,
                close,
                volume: dec!(10),
            },
            FeatureSet {
                ema_diff: 0.5,
                rsi: 55.0,
                macd_hist: 0.01,
                bb_width: 2.0,
                atr: 0.8,
                volume_change: 5.0,
            },
        )
    }

    async fn setup(dir: &TempDir) -> (Arc<TrainingStore>, Arc<ScriptedMarketData>, Arc<LabelScheduler>) {
        let store = Arc::new(TrainingStore::open(dir.path(), 100).await.unwrap());
        let data = Arc::new(ScriptedMarketData::new());
        let scheduler = Arc::new(LabelScheduler::new(
            store.clone(),
            data.clone(),
            chrono::Duration::hours(24),
            Timeframe::M15,
            CancellationToken::new(),
        ));
        (store, data, scheduler)
    }

    /// `at`을 포함하는 15분봉.
    fn candle_covering(at: DateTime<Utc>, close: Decimal) -> Candle {
        let open = at - chrono::Duration::minutes(5);
        Candle::flat(
            open,
            open + chrono::Duration::minutes(15) - chrono::Duration::milliseconds(1),
            close,
            dec!(10),
        )
    }

    #[tokio::test]
    async fn test_backfill_records_once() {
        let dir = TempDir::new().unwrap();
        let (store, data, scheduler) = setup(&dir).await;
        let ts = Utc::now() - chrono::Duration::hours(24);
        store.append(point("BTCUSDT", ts, dec!(100))).await.unwrap();
        data.set_price("BTCUSDT", dec!(103)).await;

        let first = scheduler.backfill("BTCUSDT", ts, dec!(100)).await;
        assert_eq!(first, Some(LabelOutcome::Recorded));

        data.set_price("BTCUSDT", dec!(90)).await;
        let second = scheduler.backfill("BTCUSDT", ts, dec!(100)).await;
        assert_eq!(second, Some(LabelOutcome::AlreadyLabeled));

        let samples = store.labeled_samples("BTCUSDT").await;
        assert_eq!(samples.len(), 1);
        assert!((samples[0].label - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_price_leaves_point_unlabeled() {
        let dir = TempDir::new().unwrap();
        let (store, _data, scheduler) = setup(&dir).await;
        let ts = Utc::now() - chrono::Duration::hours(24);
        store.append(point("ETHUSDT", ts, dec!(100))).await.unwrap();

        assert_eq!(scheduler.backfill("ETHUSDT", ts, dec!(100)).await, None);
        assert_eq!(store.unlabeled_points().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_points_rescheduled_at_startup() {
        let dir = TempDir::new().unwrap();
        let (store, data, scheduler) = setup(&dir).await;
        let ts = Utc::now() - chrono::Duration::hours(30);
        store.append(point("BTCUSDT", ts, dec!(200))).await.unwrap();
        let due = ts + chrono::Duration::hours(24);
        data.set_candles("BTCUSDT", vec![candle_covering(due, dec!(190))])
            .await;
        data.set_price("BTCUSDT", dec!(250)).await;

        assert_eq!(scheduler.reschedule_pending().await, 1);
        scheduler.shutdown().await;

        assert_eq!(scheduler.pending(), 0);
        let samples = store.labeled_samples("BTCUSDT").await;
        assert_eq!(samples.len(), 1);
        assert!((samples[0].label + 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_label_uses_price_at_due_time() {
        let dir = TempDir::new().unwrap();
        let (store, data, scheduler) = setup(&dir).await;
        let ts = Utc::now() - chrono::Duration::hours(72);
        store.append(point("SOLUSDT", ts, dec!(100))).await.unwrap();

        let due = ts + chrono::Duration::hours(24);
        data.set_candles(
            "SOLUSDT",
            vec![
                candle_covering(due - chrono::Duration::minutes(15), dec!(95)),
                candle_covering(due, dec!(110)),
            ],
        )
        .await;
        // 3일 뒤 현재가는 레이블에 쓰이지 않음
        data.set_price("SOLUSDT", dec!(160)).await;

        let outcome = scheduler.backfill("SOLUSDT", ts, dec!(100)).await;
        assert_eq!(outcome, Some(LabelOutcome::Recorded));

        let samples = store.labeled_samples("SOLUSDT").await;
        assert_eq!(samples.len(), 1);
        assert!((samples[0].label - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_overdue_without_history_stays_unlabeled() {
        let dir = TempDir::new().unwrap();
        let (store, data, scheduler) = setup(&dir).await;
        let ts = Utc::now() - chrono::Duration::hours(72);
        store.append(point("SOLUSDT", ts, dec!(100))).await.unwrap();
        data.set_price("SOLUSDT", dec!(160)).await;

        assert_eq!(scheduler.backfill("SOLUSDT", ts, dec!(100)).await, None);
        assert_eq!(store.unlabeled_points().await.len(), 1);
    }
}
