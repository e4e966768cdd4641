//! OHLCV price feeds for the live chart source

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Supported timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::Minute1 => "1m",
            TimeFrame::Minute5 => "5m",
            TimeFrame::Minute15 => "15m",
            TimeFrame::Minute30 => "30m",
            TimeFrame::Hour1 => "1h",
            TimeFrame::Hour4 => "4h",
            TimeFrame::Day1 => "1d",
        }
    }

    pub fn to_seconds(&self) -> i64 {
        match self {
            TimeFrame::Minute1 => 60,
            TimeFrame::Minute5 => 300,
            TimeFrame::Minute15 => 900,
            TimeFrame::Minute30 => 1800,
            TimeFrame::Hour1 => 3600,
            TimeFrame::Hour4 => 14400,
            TimeFrame::Day1 => 86400,
        }
    }

    /// How often the live loop polls the feed
    pub fn poll_interval(&self) -> Duration {
        if self.to_seconds() <= 60 {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(60)
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of recent candles for one symbol
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    fn name(&self) -> &str;
}

/// Binance REST klines
pub struct BinanceKlinesFeed {
    client: Client,
    base_url: String,
}

impl BinanceKlinesFeed {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// One kline row: `[open_time, open, high, low, close, volume, ...]`
fn parse_kline(row: &[serde_json::Value]) -> anyhow::Result<Candle> {
    let decimal = |i: usize| -> anyhow::Result<Decimal> {
        let raw = row
            .get(i)
            .and_then(|v| v.as_str())
            .with_context(|| format!("kline field {} missing", i))?;
        Decimal::from_str(raw).with_context(|| format!("invalid decimal {}", raw))
    };
    let open_ms = row
        .first()
        .and_then(|v| v.as_i64())
        .context("kline open time missing")?;
    let timestamp = Utc
        .timestamp_millis_opt(open_ms)
        .single()
        .context("kline open time out of range")?;

    Ok(Candle {
        open: decimal(1)?,
        high: decimal(2)?,
        low: decimal(3)?,
        close: decimal(4)?,
        volume: decimal(5)?,
        timestamp,
    })
}

#[async_trait]
impl PriceFeed for BinanceKlinesFeed {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_uppercase()),
                ("interval", timeframe.as_str().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Klines request failed: {} - {}", status, text));
        }

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        let candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!("Fetched {} {} candles for {}", candles.len(), timeframe, symbol);
        Ok(candles)
    }

    fn name(&self) -> &str {
        "binance"
    }
}

/// Seeded random walk, for offline runs
pub struct SyntheticFeed {
    state: Mutex<SyntheticState>,
}

struct SyntheticState {
    rng: StdRng,
    candles: Vec<Candle>,
}

impl SyntheticFeed {
    pub fn new(seed: u64, start_price: Decimal) -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                rng: StdRng::seed_from_u64(seed),
                candles: vec![Candle {
                    open: start_price,
                    high: start_price,
                    low: start_price,
                    close: start_price,
                    volume: Decimal::ZERO,
                    timestamp: Utc::now(),
                }],
            }),
        }
    }
}

impl SyntheticState {
    fn step(&mut self, timeframe: TimeFrame) {
        let Some(last) = self.candles.last() else {
            return;
        };
        let open = last.close;
        let timestamp = last.timestamp + chrono::Duration::seconds(timeframe.to_seconds());

        // Moves in basis points
        let drift: i64 = self.rng.gen_range(-40..=40);
        let wick_up: i64 = self.rng.gen_range(0..=15);
        let wick_down: i64 = self.rng.gen_range(0..=15);
        let volume: i64 = self.rng.gen_range(10..=500);

        let bp = |n: i64| open * Decimal::new(n, 4);
        let close = (open + bp(drift)).max(Decimal::ONE);
        let high = open.max(close) + bp(wick_up);
        let low = (open.min(close) - bp(wick_down)).max(Decimal::ONE);

        self.candles.push(Candle {
            open,
            high,
            low,
            close,
            volume: Decimal::from(volume),
            timestamp,
        });
    }
}

#[async_trait]
impl PriceFeed for SyntheticFeed {
    async fn get_candles(
        &self,
        _symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let mut state = self.state.lock().await;
        // One new candle per poll, back-filled to the requested history
        loop {
            state.step(timeframe);
            if state.candles.len() >= limit {
                break;
            }
        }
        let start = state.candles.len().saturating_sub(limit);
        Ok(state.candles[start..].to_vec())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_poll_interval() {
        assert_eq!(TimeFrame::Minute1.poll_interval(), Duration::from_secs(5));
        assert_eq!(TimeFrame::Minute5.poll_interval(), Duration::from_secs(60));
        assert_eq!(TimeFrame::Day1.poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_timeframe_serde() {
        let tf: TimeFrame = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(tf, TimeFrame::Minute15);
        assert_eq!(serde_json::to_string(&TimeFrame::Hour4).unwrap(), "\"4h\"");
    }

    #[tokio::test]
    async fn test_synthetic_feed_is_seeded_and_bounded() {
        let a = SyntheticFeed::new(7, Decimal::from(50000));
        let b = SyntheticFeed::new(7, Decimal::from(50000));

        let ca = a.get_candles("BTCUSDT", TimeFrame::Minute1, 20).await.unwrap();
        let cb = b.get_candles("BTCUSDT", TimeFrame::Minute1, 20).await.unwrap();
        assert_eq!(ca.len(), 20);
        assert_eq!(
            ca.iter().map(|c| c.close).collect::<Vec<_>>(),
            cb.iter().map(|c| c.close).collect::<Vec<_>>()
        );
        for c in &ca {
            assert!(c.low <= c.open.min(c.close));
            assert!(c.high >= c.open.max(c.close));
        }

        // Each poll advances by one candle
        let next = a.get_candles("BTCUSDT", TimeFrame::Minute1, 20).await.unwrap();
        assert_eq!(next[18].timestamp, ca[19].timestamp);
    }

    #[tokio::test]
    async fn test_binance_klines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("interval", "1m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [
                    1700000000000i64, "50000.1", "50100.0", "49900.5", "50050.0", "12.5",
                    1700000059999i64
                ],
                [
                    1700000060000i64, "50050.0", "50060.0", "50000.0", "50010.0", "3.0",
                    1700000119999i64
                ]
            ])))
            .mount(&server)
            .await;

        let feed = BinanceKlinesFeed::new(&server.uri()).unwrap();
        let candles = feed.get_candles("btcusdt", TimeFrame::Minute1, 2).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, Decimal::from_str("50010.0").unwrap());
        assert_eq!(candles[0].timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_kline_rejects_bad_rows() {
        let row = vec![serde_json::json!(1), serde_json::json!("x")];
        assert!(parse_kline(&row).is_err());
    }
}
