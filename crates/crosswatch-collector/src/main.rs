//! Crosswatch CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crosswatch_analytics::ml::{
    MemoryGuard, ModelRegistry, PredictionService, Trainer, TrainerConfig, TrainingStore,
};
use crosswatch_collector::{Dispatcher, LabelScheduler, MlServices, StreamSupervisor, TrainingJob};
use crosswatch_core::{init_logging, AppConfig, LogConfig, DEFAULT_CONFIG_PATH};
use crosswatch_exchange::{BinanceClient, BinanceConfig, MarketDataProvider};
use crosswatch_notification::{LogSink, NotificationManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 세션 → 분배기 이벤트 채널 크기
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "crosswatch")]
#[command(about = "EMA crossover watcher with per-symbol prediction models", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 로그 레벨 (trace, debug, info, warn, error). 설정 파일 값보다 우선
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 스트림 감시 + 알림 + 주기적 재학습
    Run,

    /// 학습 배치 한 번 실행
    Train {
        /// 특정 심볼만 학습
        #[arg(long)]
        symbol: Option<String>,
    },

    /// 심볼별로 최근 N개 버전만 남기고 삭제
    Prune,

    /// 두 모델 버전을 최근 데이터로 비교
    Compare {
        symbol: String,
        version_a: String,
        version_b: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("설정 로드 실패: {}", cli.config.display()))?;

    let mut log_config = LogConfig::from_settings(&config.logging);
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    init_logging(log_config).map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    tracing::info!(config = %cli.config.display(), "Crosswatch 시작");
    let config = Arc::new(config);

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Train { symbol } => {
            let job = training_job(&config, open_store(&config).await?, open_registry(&config));
            let report = job.run_batch(symbol.as_deref()).await;
            report.log_summary("학습");
            for item in &report.items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        Commands::Prune => {
            let job = training_job(&config, open_store(&config).await?, open_registry(&config));
            for (symbol, removed) in job.prune_all().await? {
                tracing::info!(symbol = %symbol, removed = removed.len(), "버전 정리 완료");
            }
        }
        Commands::Compare {
            symbol,
            version_a,
            version_b,
        } => {
            let job = training_job(&config, open_store(&config).await?, open_registry(&config));
            let report = job.compare(&symbol, &version_a, &version_b).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    tracing::info!("Crosswatch 종료");
    Ok(())
}

/// 학습 데이터 저장소를 엽니다.
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<TrainingStore>> {
    let store = TrainingStore::open(&config.ml.data_dir, config.ml.buffer_cap)
        .await
        .with_context(|| format!("학습 데이터 저장소 열기 실패: {}", config.ml.data_dir.display()))?;
    Ok(Arc::new(store))
}

/// 학습 작업을 구성합니다.
fn training_job(
    config: &AppConfig,
    store: Arc<TrainingStore>,
    registry: Arc<ModelRegistry>,
) -> TrainingJob {
    let trainer = Trainer::new(
        TrainerConfig::from(&config.ml),
        MemoryGuard::for_process(config.ml.memory_high_water_bytes()),
    );
    TrainingJob::new(store, registry, trainer, config.ml.keep_versions)
}

fn open_registry(config: &AppConfig) -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::new(&config.ml.models_dir))
}

/// 감시 모드.
///
/// 첫 재조정이 실패하면 시작하지 않고 에러로 종료합니다.
async fn run(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let provider: Arc<dyn MarketDataProvider> =
        Arc::new(BinanceClient::new(BinanceConfig::from(&config.exchange))?);
    let notifier = Arc::new(NotificationManager::new().with_sender(LogSink::default()));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let mut dispatcher = Dispatcher::new(Arc::clone(&notifier));
    let mut labels = None;
    let mut job = None;

    if config.ml.enabled {
        let store = open_store(&config).await?;
        let registry = open_registry(&config);
        let predictor = Arc::new(PredictionService::new(
            Arc::clone(&registry),
            config.ml.cache_capacity,
        ));
        let scheduler = Arc::new(LabelScheduler::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            config.ml.label_horizon(),
            config.stream.timeframe,
            cancel.child_token(),
        ));
        scheduler.reschedule_pending().await;

        job = Some(Arc::new(
            training_job(&config, Arc::clone(&store), registry).with_predictor(Arc::clone(&predictor)),
        ));
        dispatcher = dispatcher.with_ml(MlServices {
            store,
            labels: Arc::clone(&scheduler),
            predictor,
            use_ensemble: config.ml.use_ensemble,
            ensemble_size: config.ml.ensemble_size,
        });
        labels = Some(scheduler);
    }

    let dispatcher_task = tokio::spawn(dispatcher.run(events_rx, cancel.child_token()));

    let supervisor = Arc::new(StreamSupervisor::new(
        Arc::clone(&config),
        provider,
        Arc::clone(&notifier),
        events_tx,
        cancel.child_token(),
    ));
    supervisor
        .reconcile()
        .await
        .context("초기 심볼 목록 조회 실패")?;

    let supervisor_task = tokio::spawn(Arc::clone(&supervisor).run());
    let job_task = job.map(|job| {
        tokio::spawn(job.run_periodic(
            config.ml.retrain_interval(),
            Arc::clone(&notifier),
            cancel.child_token(),
        ))
    });

    tracing::info!(
        symbols = supervisor.tracked_symbols().await.len(),
        ml = config.ml.enabled,
        "감시 시작"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("종료 신호 수신, 종료 중...");
    cancel.cancel();

    supervisor_task.await?;
    if let Some(task) = job_task {
        task.await?;
    }
    if let Some(labels) = labels {
        labels.shutdown().await;
    }
    dispatcher_task.await?;

    Ok(())
}
