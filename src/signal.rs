//! Trading signals - output from the decision engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action distribution order used by the sequence classifier
pub const ACTIONS: [Action; 3] = [Action::Ignore, Action::Enter, Action::Exit];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Ignore,
    Enter,
    Exit,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ignore => "IGNORE",
            Action::Enter => "ENTER",
            Action::Exit => "EXIT",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a signal's direction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionSource {
    /// Keyword override fixed the direction
    Override,
    /// Classifier said ENTER; direction chosen by the session's policy
    Policy,
    /// Direction is irrelevant (IGNORE / EXIT)
    Default,
}

/// Decision output. Built once per evaluated sequence, never mutated after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: Action,
    pub confidence: f64,
    pub direction: Direction,
    pub direction_source: DirectionSource,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reward: Option<Decimal>,
}

impl Signal {
    pub fn new(
        action: Action,
        confidence: f64,
        frame_index: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            direction: Direction::default(),
            direction_source: DirectionSource::Default,
            frame_index,
            timestamp: Utc::now(),
            reason: reason.into(),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            risk_reward: None,
        }
    }

    pub fn ignore(frame_index: u64, reason: impl Into<String>) -> Self {
        Self::new(Action::Ignore, 0.0, frame_index, reason)
    }

    pub fn with_direction(mut self, direction: Direction, source: DirectionSource) -> Self {
        self.direction = direction;
        self.direction_source = source;
        self
    }

    pub fn with_entry_price(mut self, entry_price: Decimal) -> Self {
        self.entry_price = Some(entry_price);
        self
    }

    pub fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_risk_reward(mut self, risk_reward: Decimal) -> Self {
        self.risk_reward = Some(risk_reward);
        self
    }

    /// Non-IGNORE and at or above the confidence threshold
    pub fn is_actionable(&self, min_confidence: f64) -> bool {
        self.action != Action::Ignore && self.confidence >= min_confidence
    }

    pub fn has_prices(&self) -> bool {
        self.entry_price.is_some()
    }
}
