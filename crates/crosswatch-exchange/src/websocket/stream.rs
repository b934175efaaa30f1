//! Binance kline WebSocket 스트림.
//!
//! 심볼 하나, 타임프레임 하나에 대한 raw 스트림(`<ws>/<symbol>@kline_<interval>`)에
//! 연결하고, 수신 태스크가 파싱한 캔들 갱신을 채널로 전달합니다.

use crate::traits::{CandleStream, ExchangeResult, StreamEvent};
use chrono::DateTime;
use crosswatch_core::{Candle, CandleUpdate, Timeframe};
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

/// 스트림 채널 버퍼 크기.
const CHANNEL_CAPACITY: usize = 1000;

// ============================================================================
// WebSocket 메시지 타입
// ============================================================================

/// Binance 캔들(kline) 스트림 이벤트.
#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

// ============================================================================
// Binance kline 스트림
// ============================================================================

/// Binance kline 스트림 연결기.
pub struct BinanceKlineStream;

impl BinanceKlineStream {
    /// 스트림 이름 (`btcusdt@kline_15m`).
    pub fn stream_name(symbol: &str, timeframe: Timeframe) -> String {
        format!(
            "{}@kline_{}",
            symbol.to_lowercase(),
            timeframe.to_binance_interval()
        )
    }

    /// WebSocket에 연결하고 수신 태스크를 시작합니다.
    pub async fn connect(
        ws_base_url: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> ExchangeResult<CandleStream> {
        let url = format!("{}/{}", ws_base_url, Self::stream_name(symbol, timeframe));
        info!(symbol = %symbol, "Connecting to Binance WebSocket: {}", url);

        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws.split();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let symbol = symbol.to_uppercase();

        // 수신 메시지를 처리하는 태스크 생성
        let task = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Self::parse_message(&text, &symbol) {
                        Some(update) => {
                            if tx.send(StreamEvent::Update(update)).await.is_err() {
                                debug!(symbol = %symbol, "Stream receiver dropped");
                                break;
                            }
                        }
                        None => debug!(symbol = %symbol, "Ignoring non-kline message"),
                    },
                    Ok(Message::Ping(_)) => {
                        // Pong은 tungstenite에서 자동으로 처리됨
                        debug!(symbol = %symbol, "Received ping");
                    }
                    Ok(Message::Close(_)) => {
                        info!(symbol = %symbol, "WebSocket closed by server");
                        let _ = tx.send(StreamEvent::Disconnected).await;
                        break;
                    }
                    Err(e) => {
                        error!(symbol = %symbol, "WebSocket error: {}", e);
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        break;
                    }
                    _ => {}
                }
            }
            let _ = write.close().await;
        });

        Ok(CandleStream::with_task(rx, task))
    }

    /// kline 메시지를 캔들 갱신으로 변환합니다.
    ///
    /// 다른 심볼이거나 해석할 수 없는 메시지는 `None`.
    pub fn parse_message(text: &str, symbol: &str) -> Option<CandleUpdate> {
        let event: WsKlineEvent = serde_json::from_str(text).ok()?;
        if event.event_type != "kline" || !event.symbol.eq_ignore_ascii_case(symbol) {
            return None;
        }

        let k = &event.kline;
        if Timeframe::from_binance_interval(&k.interval).is_none() {
            warn!(interval = %k.interval, "Unknown kline interval");
            return None;
        }

        let parse = |s: &str| s.parse::<Decimal>().ok();
        let candle = Candle::new(
            DateTime::from_timestamp_millis(k.open_time)?,
            parse(&k.open)?,
            parse(&k.high)?,
            parse(&k.low)?,
            parse(&k.close)?,
            parse(&k.volume)?,
            DateTime::from_timestamp_millis(k.close_time)?,
        );

        Some(CandleUpdate {
            candle,
            closed: k.is_closed,
        })
    }
}
