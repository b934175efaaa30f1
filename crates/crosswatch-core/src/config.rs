//! 설정 관리.
//!
//! 기본값 → 설정 파일(TOML, 선택) → 환경 변수(`CROSSWATCH__SECTION__KEY`)
//! 순서로 병합합니다.

use crate::error::{CrosswatchError, CrosswatchResult};
use crate::types::Timeframe;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 환경 변수 접두사.
pub const ENV_PREFIX: &str = "CROSSWATCH";

/// 기본 설정 파일 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// 재연결 대기 시간 하한 (초).
pub const MIN_RECONNECT_DELAY_SECS: u64 = 5;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 스트림/감시 대상 설정
    pub stream: StreamConfig,
    /// 알림 정책 설정
    pub alert: AlertConfig,
    /// 모델 수명주기 설정
    pub ml: MlConfig,
    /// 거래소 접속 설정
    pub exchange: ExchangeSettings,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 스트림 및 심볼 감시 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 캔들 간격
    pub timeframe: Timeframe,
    /// 크로스오버 판단에 사용하는 EMA 기간
    pub ema_period: usize,
    /// 감시 대상이 되기 위한 24시간 최소 거래대금 (호가 자산 기준)
    pub volume_threshold: Decimal,
    /// 대상 심볼의 호가 자산 (예: USDT)
    pub quote_asset: String,
    /// 대상 심볼 재조정 주기 (초)
    pub check_interval_secs: u64,
    /// 세션 생존 점검 주기 (초)
    pub heartbeat_interval_secs: u64,
    /// 재연결 대기 시간 (초, 최소 5)
    pub reconnect_delay_secs: u64,
    /// 지표 시드용 추가 백필 캔들 수
    pub backfill_buffer: usize,
    /// 이 시간 동안 메시지가 없으면 연결을 비정상으로 간주 (초)
    pub stale_after_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M15,
            ema_period: 200,
            volume_threshold: dec!(50_000_000),
            quote_asset: "USDT".to_string(),
            check_interval_secs: 300,
            heartbeat_interval_secs: 60,
            reconnect_delay_secs: MIN_RECONNECT_DELAY_SECS,
            backfill_buffer: 50,
            stale_after_secs: 180,
        }
    }
}

impl StreamConfig {
    /// 세션이 유지하는 캔들 수 (EMA 기간의 2배).
    pub fn retention(&self) -> usize {
        self.ema_period * 2
    }

    /// 세션 시작 시 백필할 캔들 수.
    pub fn backfill_limit(&self) -> usize {
        self.ema_period + self.backfill_buffer
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs.max(MIN_RECONNECT_DELAY_SECS))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// 알림 정책 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// 같은 심볼에 대한 알림 최소 간격 (초)
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { cooldown_secs: 3600 }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}

/// 모델 수명주기 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MlConfig {
    /// 예측/학습 활성화 여부
    pub enabled: bool,
    /// 모델 버전 저장 디렉토리
    pub models_dir: PathBuf,
    /// 학습 데이터 저장 디렉토리
    pub data_dir: PathBuf,
    /// 심볼당 보존할 모델 버전 수
    pub keep_versions: usize,
    /// 레이블 백필까지의 시간 (초)
    pub label_horizon_secs: u64,
    /// 심볼당 메모리 버퍼 최대 포인트 수
    pub buffer_cap: usize,
    /// 학습에 필요한 최소 레이블 포인트 수
    pub min_training_points: usize,
    /// 하이퍼파라미터 탐색 시도 횟수
    pub trials: usize,
    /// 탐색 재현용 시드 (없으면 비결정적)
    pub search_seed: Option<u64>,
    /// 학습 중단 기준 프로세스 메모리 (MB)
    pub memory_high_water_mb: u64,
    /// 주기적 재학습 간격 (초)
    pub retrain_interval_secs: u64,
    /// 메모리에 유지할 최대 모델 수
    pub cache_capacity: usize,
    /// 앙상블에 사용할 최근 버전 수
    pub ensemble_size: usize,
    /// 크로스오버 알림에 앙상블 예측 사용 여부
    pub use_ensemble: bool,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            models_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data/training"),
            keep_versions: 5,
            label_horizon_secs: 24 * 60 * 60,
            buffer_cap: 1000,
            min_training_points: 100,
            trials: 5,
            search_seed: None,
            memory_high_water_mb: 1024,
            retrain_interval_secs: 6 * 60 * 60,
            cache_capacity: 50,
            ensemble_size: 5,
            use_ensemble: false,
        }
    }
}

impl MlConfig {
    pub fn label_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.label_horizon_secs as i64)
    }

    pub fn retrain_interval(&self) -> Duration {
        Duration::from_secs(self.retrain_interval_secs)
    }

    /// 메모리 상한 (바이트).
    pub fn memory_high_water_bytes(&self) -> u64 {
        self.memory_high_water_mb * 1024 * 1024
    }
}

/// 거래소 접속 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket 기본 URL
    pub ws_base_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rest_base_url: "https://api.binance.com".to_string(),
            ws_base_url: "wss://stream.binance.com:9443/ws".to_string(),
            timeout_secs: 30,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> CrosswatchResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> CrosswatchResult<Self> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// 값의 범위를 검증합니다.
    pub fn validate(&self) -> CrosswatchResult<()> {
        if self.stream.ema_period == 0 {
            return Err(CrosswatchError::Config("stream.ema_period must be > 0".into()));
        }
        if self.stream.volume_threshold.is_sign_negative() {
            return Err(CrosswatchError::Config(
                "stream.volume_threshold must not be negative".into(),
            ));
        }
        if self.stream.reconnect_delay_secs < MIN_RECONNECT_DELAY_SECS {
            return Err(CrosswatchError::Config(format!(
                "stream.reconnect_delay_secs must be >= {}",
                MIN_RECONNECT_DELAY_SECS
            )));
        }
        if self.stream.check_interval_secs == 0 || self.stream.heartbeat_interval_secs == 0 {
            return Err(CrosswatchError::Config(
                "stream intervals must be > 0".into(),
            ));
        }
        if self.ml.keep_versions == 0 {
            return Err(CrosswatchError::Config("ml.keep_versions must be > 0".into()));
        }
        if self.ml.cache_capacity == 0 || self.ml.buffer_cap == 0 {
            return Err(CrosswatchError::Config(
                "ml.cache_capacity and ml.buffer_cap must be > 0".into(),
            ));
        }
        if self.ml.ensemble_size == 0 {
            return Err(CrosswatchError::Config("ml.ensemble_size must be > 0".into()));
        }
        Ok(())
    }
}
