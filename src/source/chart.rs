//! Live chart source: polls a price feed and renders candlestick frames

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

use super::feed::{Candle, PriceFeed, TimeFrame};
use super::{FrameSource, SourceFrame, SourceInfo};
use crate::config::AgentConfig;
use crate::error::SourceError;
use crate::frame::Frame;

const BACKGROUND: [u8; 3] = [20, 20, 20];
const BULL: [u8; 3] = [80, 200, 60];
const BEAR: [u8; 3] = [60, 60, 220];
const LAST_PRICE: [u8; 3] = [200, 200, 200];

/// Fixed-size BGR candlestick renderer
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    pub width: u32,
    pub height: u32,
    /// Vertical margin in pixels
    pub padding: u32,
}

impl ChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(8),
            height: height.max(8),
            padding: (height / 20).max(2),
        }
    }

    pub fn render(&self, candles: &[Candle]) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, BACKGROUND);
        if candles.is_empty() {
            return frame;
        }

        let low = candles.iter().map(|c| c.low).min().unwrap_or(Decimal::ZERO);
        let high = candles.iter().map(|c| c.high).max().unwrap_or(Decimal::ONE);
        let low = low.to_f64().unwrap_or(0.0);
        let span = (high.to_f64().unwrap_or(0.0) - low).max(f64::EPSILON);
        let plot_h = (self.height - 2 * self.padding) as f64;

        let y_of = |price: Decimal| -> u32 {
            let p = price.to_f64().unwrap_or(low);
            let rel = ((p - low) / span).clamp(0.0, 1.0);
            self.padding + ((1.0 - rel) * plot_h).round() as u32
        };

        let slot = (self.width / candles.len() as u32).max(1);
        let body_w = (slot * 2 / 3).max(1);

        for (i, c) in candles.iter().enumerate() {
            let x0 = i as u32 * slot;
            if x0 >= self.width {
                break;
            }
            let colour = if c.close >= c.open { BULL } else { BEAR };
            let center = x0 + body_w / 2;

            // Wick
            let (wick_top, wick_bottom) = (y_of(c.high), y_of(c.low));
            for y in wick_top..=wick_bottom {
                frame.set_pixel(center, y, colour);
            }

            // Body
            let (a, b) = (y_of(c.open), y_of(c.close));
            for y in a.min(b)..=a.max(b) {
                for x in x0..x0 + body_w {
                    frame.set_pixel(x, y, colour);
                }
            }
        }

        // Last close marker across the chart
        if let Some(last) = candles.last() {
            let y = y_of(last.close);
            for x in (0..self.width).step_by(4) {
                frame.set_pixel(x, y, LAST_PRICE);
            }
        }
        frame
    }
}

/// Unbounded source; frame `n` gets index `n * frame_step`
pub struct LiveChartSource {
    feed: Arc<dyn PriceFeed>,
    renderer: ChartRenderer,
    symbol: String,
    timeframe: TimeFrame,
    candle_limit: usize,
    frame_step: u64,
    poll: Duration,
    ticker: Option<Interval>,
    polls: u64,
    last_close: Option<Decimal>,
    info: SourceInfo,
}

impl LiveChartSource {
    pub fn new(feed: Arc<dyn PriceFeed>, config: &AgentConfig) -> Self {
        let live = &config.live;
        let renderer = ChartRenderer::new(live.chart_width, live.chart_height);
        let poll = live.timeframe.poll_interval();
        Self {
            info: SourceInfo {
                label: live.symbol.clone(),
                width: renderer.width,
                height: renderer.height,
                fps: 1.0 / poll.as_secs_f64(),
                total_frames: None,
                duration_secs: None,
                asset: Some(live.symbol.clone()),
            },
            feed,
            renderer,
            symbol: live.symbol.clone(),
            timeframe: live.timeframe,
            candle_limit: live.candle_limit.max(1),
            frame_step: config.frame_step.max(1),
            poll,
            ticker: None,
            polls: 0,
            last_close: None,
        }
    }

    /// Override the poll cadence (tests, replay)
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll = every;
        self.ticker = None;
        self
    }

    fn ticker(every: Duration) -> Interval {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[async_trait]
impl FrameSource for LiveChartSource {
    async fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        let poll = self.poll;
        self.ticker
            .get_or_insert_with(|| Self::ticker(poll))
            .tick()
            .await;

        let candles = self
            .feed
            .get_candles(&self.symbol, self.timeframe, self.candle_limit)
            .await
            .map_err(|e| SourceError::Feed(format!("{}: {}", self.feed.name(), e)))?;

        let last = candles
            .last()
            .ok_or_else(|| SourceError::Feed(format!("no candles for {}", self.symbol)))?;
        self.last_close = Some(last.close);

        let index = self.polls * self.frame_step;
        self.polls += 1;
        debug!("Live frame {} for {} @ {}", index, self.symbol, last.close);

        Ok(Some(SourceFrame {
            index,
            frame: self.renderer.render(&candles),
        }))
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn reference_price(&self) -> Option<Decimal> {
        self.last_close
    }

    fn is_live(&self) -> bool {
        true
    }
}
