//! Binance 시장 데이터 커넥터.
//!
//! Binance Spot 공개 REST API(24시간 통계, 캔들, 현재가)와
//! kline WebSocket 스트림을 사용합니다. 인증이 필요한 엔드포인트는 쓰지 않습니다.

use crate::traits::{CandleStream, ExchangeResult, MarketDataProvider, SymbolStats};
use crate::websocket::BinanceKlineStream;
use crate::ExchangeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crosswatch_core::{Candle, ExchangeSettings, Timeframe};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Binance 요청 한 번의 최대 캔들 수.
pub const MAX_KLINE_LIMIT: usize = 1000;

// ============================================================================
// 설정
// ============================================================================

/// Binance 클라이언트 설정.
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket 기본 URL (`/ws` 경로 포함)
    pub ws_base_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self::from(&ExchangeSettings::default())
    }
}

impl From<&ExchangeSettings> for BinanceConfig {
    fn from(settings: &ExchangeSettings) -> Self {
        Self {
            rest_base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            ws_base_url: settings.ws_base_url.trim_end_matches('/').to_string(),
            timeout_secs: settings.timeout_secs,
        }
    }
}

impl BinanceConfig {
    /// REST 기본 URL만 바꾼 설정 (테스트 서버 등).
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker24h {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct BinancePrice {
    price: String,
}

/// 배열 형식 kline. 앞의 7개 필드만 사용합니다.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

// ============================================================================
// Binance 클라이언트
// ============================================================================

/// Binance 시장 데이터 클라이언트.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    config: BinanceConfig,
    client: Client,
}

impl BinanceClient {
    /// 새 Binance 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: BinanceConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e))
            })?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    /// 공개 API 요청.
    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.config.rest_base_url, endpoint);
        debug!("GET {} {:?}", url, params);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(ExchangeError::from)?;

        self.handle_response(response).await
    }

    /// API 응답 처리.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse response: {} - Body: {}", e, body);
                ExchangeError::ParseError(e.to_string())
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited);
        }

        // 에러 응답 파싱 시도
        if let Ok(error) = serde_json::from_str::<BinanceError>(&body) {
            Err(Self::map_error_code(error.code, &error.msg))
        } else {
            Err(ExchangeError::ApiError {
                code: status.as_u16() as i32,
                message: body,
            })
        }
    }

    fn map_error_code(code: i32, msg: &str) -> ExchangeError {
        match code {
            -1001 => ExchangeError::Disconnected(msg.to_string()),
            -1003 => ExchangeError::RateLimited,
            -1121 => ExchangeError::SymbolNotFound(msg.to_string()),
            _ => ExchangeError::ApiError {
                code,
                message: msg.to_string(),
            },
        }
    }

    /// 문자열에서 Decimal 파싱.
    fn parse_decimal(field: &str, s: &str) -> ExchangeResult<Decimal> {
        s.parse()
            .map_err(|_| ExchangeError::ParseError(format!("invalid {}: {:?}", field, s)))
    }

    fn parse_ticker(t: &BinanceTicker24h) -> ExchangeResult<SymbolStats> {
        Ok(SymbolStats {
            symbol: t.symbol.clone(),
            volume: Self::parse_decimal("quoteVolume", &t.quote_volume)?,
            price: Self::parse_decimal("lastPrice", &t.last_price)?,
            change_pct: Self::parse_decimal("priceChangePercent", &t.price_change_percent)?,
        })
    }

    fn parse_kline(k: &BinanceKline) -> ExchangeResult<Candle> {
        let open_time = DateTime::from_timestamp_millis(k.0)
            .ok_or_else(|| ExchangeError::ParseError(format!("invalid open time {}", k.0)))?;
        let close_time = DateTime::from_timestamp_millis(k.6)
            .ok_or_else(|| ExchangeError::ParseError(format!("invalid close time {}", k.6)))?;

        Ok(Candle::new(
            open_time,
            Self::parse_decimal("open", &k.1)?,
            Self::parse_decimal("high", &k.2)?,
            Self::parse_decimal("low", &k.3)?,
            Self::parse_decimal("close", &k.4)?,
            Self::parse_decimal("volume", &k.5)?,
            close_time,
        ))
    }
}

#[async_trait]
impl MarketDataProvider for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn list_eligible_symbols(
        &self,
        quote_asset: &str,
        min_quote_volume: Decimal,
    ) -> ExchangeResult<Vec<SymbolStats>> {
        let tickers: Vec<BinanceTicker24h> = self.public_get("/api/v3/ticker/24hr", &[]).await?;
        let total = tickers.len();

        let mut eligible: Vec<SymbolStats> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with(quote_asset) && t.symbol.len() > quote_asset.len())
            .filter_map(|t| match Self::parse_ticker(&t) {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(symbol = %t.symbol, error = %e, "Skipping malformed ticker");
                    None
                }
            })
            .filter(|s| s.volume >= min_quote_volume)
            .collect();

        eligible.sort_by(|a, b| b.volume.cmp(&a.volume));
        info!(
            total,
            eligible = eligible.len(),
            %min_quote_volume,
            "Fetched eligible symbols"
        );
        Ok(eligible)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        let resp: Vec<BinanceKline> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("interval", timeframe.to_binance_interval().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut candles = Vec::with_capacity(resp.len());
        for k in &resp {
            match Self::parse_kline(k) {
                Ok(candle) => candles.push(candle),
                Err(e) => warn!(symbol = %symbol, error = %e, "Skipping malformed kline"),
            }
        }
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    async fn fetch_candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        at: DateTime<Utc>,
    ) -> ExchangeResult<Option<Candle>> {
        // endTime 이하로 열린 캔들 중 마지막 하나
        let resp: Vec<BinanceKline> = self
            .public_get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("interval", timeframe.to_binance_interval().to_string()),
                    ("endTime", at.timestamp_millis().to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let candle = resp
            .iter()
            .filter_map(|k| match Self::parse_kline(k) {
                Ok(candle) => Some(candle),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping malformed kline");
                    None
                }
            })
            .find(|c| c.open_time <= at && at <= c.close_time);
        Ok(candle)
    }

    async fn open_candle_stream(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> ExchangeResult<CandleStream> {
        BinanceKlineStream::connect(&self.config.ws_base_url, symbol, timeframe).await
    }

    async fn fetch_latest_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let resp: BinancePrice = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_uppercase())])
            .await?;
        Self::parse_decimal("price", &resp.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings_trims_slash() {
        let settings = ExchangeSettings {
            rest_base_url: "https://api.binance.com/".to_string(),
            ..Default::default()
        };
        let config = BinanceConfig::from(&settings);
        assert_eq!(config.rest_base_url, "https://api.binance.com");
    }

    #[test]
    fn test_error_code_mapping() {
        assert!(matches!(
            BinanceClient::map_error_code(-1121, "Invalid symbol."),
            ExchangeError::SymbolNotFound(_)
        ));
        assert!(matches!(
            BinanceClient::map_error_code(-1003, "Too many requests"),
            ExchangeError::RateLimited
        ));
        assert!(matches!(
            BinanceClient::map_error_code(-9999, "?"),
            ExchangeError::ApiError { code: -9999, .. }
        ));
    }

    #[test]
    fn test_parse_kline_rejects_bad_price() {
        let raw = r#"[1700000000000,"1.0","x","0.9","1.05","10",1700000899999,"0",1,"0","0","0"]"#;
        let kline: BinanceKline = serde_json::from_str(raw).unwrap();
        assert!(BinanceClient::parse_kline(&kline).is_err());
    }
}
