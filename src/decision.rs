//! Signal decision engine
//!
//! Classifier output first, then the keyword override, then direction
//! policy and price levels. Gating is a separate check so that signals
//! below the threshold can still be logged.

use rust_decimal::Decimal;
use tracing::debug;

use crate::classifier::ActionProbabilities;
use crate::config::{AgentConfig, DirectionPolicy};
use crate::error::ConfigError;
use crate::features::FrameFeatures;
use crate::keywords::{KeywordHit, KeywordMatcher};
use crate::signal::{Action, Direction, DirectionSource, Signal};

pub struct DecisionEngine {
    keywords: KeywordMatcher,
    confidence_threshold: f64,
    override_confidence: f64,
    risk_reward: Decimal,
    stop_distance_pct: Decimal,
}

impl DecisionEngine {
    /// Rejects configs whose price parameters are unusable
    pub fn new(config: &AgentConfig) -> Result<Self, ConfigError> {
        config.validate_decision()?;
        let risk_reward = Decimal::try_from(config.risk_reward)
            .map_err(|_| ConfigError::InvalidRiskReward(config.risk_reward))?;
        let stop_distance_pct = Decimal::try_from(config.stop_distance_pct)
            .map_err(|_| ConfigError::InvalidStopDistance(config.stop_distance_pct))?;

        Ok(Self {
            keywords: KeywordMatcher::new(&config.keywords),
            confidence_threshold: config.confidence_threshold,
            override_confidence: config.override_confidence,
            risk_reward,
            stop_distance_pct,
        })
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Build the signal for the current window.
    ///
    /// `probabilities` is `None` when the classifier is unavailable or failed;
    /// the classifier branch then reads as `(IGNORE, 0.0)`.
    pub fn decide(
        &self,
        probabilities: Option<&ActionProbabilities>,
        features: &FrameFeatures,
        reference_price: Option<Decimal>,
        policy: DirectionPolicy,
    ) -> Signal {
        let frame_index = features.frame_index;
        let (action, confidence) = probabilities
            .map(ActionProbabilities::top)
            .unwrap_or((Action::Ignore, 0.0));

        let overridden = |action: Action, reason: &'static str| {
            Signal::new(action, self.override_confidence, frame_index, reason)
        };
        let classified = || Signal::new(action, confidence, frame_index, "classifier");

        let signal = match self.keywords.classify(&features.text.words) {
            Some(KeywordHit::Buy) => overridden(Action::Enter, "keyword: buy")
                .with_direction(Direction::Long, DirectionSource::Override),
            Some(KeywordHit::Sell) => overridden(Action::Enter, "keyword: sell")
                .with_direction(Direction::Short, DirectionSource::Override),
            Some(KeywordHit::Exit) => overridden(Action::Exit, "keyword: exit"),
            None => match action {
                Action::Enter => match policy {
                    DirectionPolicy::AssumeLong => {
                        classified().with_direction(Direction::Long, DirectionSource::Policy)
                    }
                    DirectionPolicy::AssumeShort => {
                        classified().with_direction(Direction::Short, DirectionSource::Policy)
                    }
                    DirectionPolicy::Suppress => {
                        debug!(
                            "Frame {}: classifier ENTER ({:.2}) without direction, suppressed",
                            frame_index, confidence
                        );
                        return Signal::ignore(frame_index, "enter without direction");
                    }
                },
                _ => classified(),
            },
        };

        if signal.action != Action::Enter {
            return signal;
        }
        match reference_price {
            Some(entry) if entry > Decimal::ZERO => self.with_price_levels(signal, entry),
            _ => {
                debug!("Frame {}: no reference price, entry without levels", frame_index);
                signal
            }
        }
    }

    /// Actionable and above the configured threshold
    pub fn passes_gate(&self, signal: &Signal) -> bool {
        signal.is_actionable(self.confidence_threshold)
    }

    /// Stop one risk unit away, target `risk_reward` units the other way
    fn with_price_levels(&self, signal: Signal, entry: Decimal) -> Signal {
        let stop_distance = entry * self.stop_distance_pct;
        let (stop_loss, take_profit) = match signal.direction {
            Direction::Long => (entry - stop_distance, entry + stop_distance * self.risk_reward),
            Direction::Short => (entry + stop_distance, entry - stop_distance * self.risk_reward),
        };
        signal
            .with_entry_price(entry)
            .with_stop_loss(stop_loss)
            .with_take_profit(take_profit)
            .with_risk_reward(self.risk_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::TextFeatures;
    use std::sync::Arc;

    fn features_with_text(text: &str) -> FrameFeatures {
        let mut features = FrameFeatures::empty(150);
        features.text = Arc::new(TextFeatures::from_text(text));
        features
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(&AgentConfig::default()).unwrap()
    }

    fn price() -> Option<Decimal> {
        Some(Decimal::from(50000))
    }

    #[test]
    fn test_long_price_levels() {
        let signal = engine().decide(
            None,
            &features_with_text("buy now"),
            price(),
            DirectionPolicy::Suppress,
        );

        assert_eq!(signal.action, Action::Enter);
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.confidence, 0.95);
        assert_eq!(signal.entry_price, Some(Decimal::from(50000)));
        assert_eq!(signal.stop_loss, Some(Decimal::from(49500)));
        assert_eq!(signal.take_profit, Some(Decimal::from(51000)));
        assert_eq!(signal.risk_reward, Some(Decimal::TWO));
    }

    #[test]
    fn test_short_price_levels() {
        let signal = engine().decide(
            None,
            &features_with_text("VENDA"),
            price(),
            DirectionPolicy::Suppress,
        );

        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.direction_source, DirectionSource::Override);
        assert_eq!(signal.stop_loss, Some(Decimal::from(50500)));
        assert_eq!(signal.take_profit, Some(Decimal::from(49000)));
    }

    #[test]
    fn test_exit_has_no_prices() {
        let signal = engine().decide(
            None,
            &features_with_text("fechar posição"),
            price(),
            DirectionPolicy::AssumeLong,
        );

        assert_eq!(signal.action, Action::Exit);
        assert!(signal.entry_price.is_none());
        assert!(signal.stop_loss.is_none());
        assert!(signal.take_profit.is_none());
        assert!(signal.risk_reward.is_none());
    }

    #[test]
    fn test_buy_wins_over_sell() {
        let signal = engine().decide(
            None,
            &features_with_text("sell or buy?"),
            price(),
            DirectionPolicy::Suppress,
        );
        assert_eq!(signal.action, Action::Enter);
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_override_beats_classifier() {
        let probs = ActionProbabilities::new(0.9, 0.05, 0.05);
        let signal = engine().decide(
            Some(&probs),
            &features_with_text("exit"),
            price(),
            DirectionPolicy::AssumeLong,
        );
        assert_eq!(signal.action, Action::Exit);
        assert_eq!(signal.confidence, 0.95);
    }

    #[test]
    fn test_below_threshold_is_not_actionable() {
        let engine = engine();
        let probs = ActionProbabilities::new(0.2, 0.65, 0.15);
        let signal = engine.decide(
            Some(&probs),
            &features_with_text(""),
            price(),
            DirectionPolicy::AssumeLong,
        );

        assert_eq!(signal.action, Action::Enter);
        assert!(!engine.passes_gate(&signal));
    }

    #[test]
    fn test_classifier_enter_uses_policy() {
        let engine = engine();
        let probs = ActionProbabilities::new(0.1, 0.8, 0.1);
        let features = features_with_text("");

        let long = engine.decide(Some(&probs), &features, price(), DirectionPolicy::AssumeLong);
        assert_eq!(long.direction, Direction::Long);
        assert_eq!(long.direction_source, DirectionSource::Policy);
        assert!(engine.passes_gate(&long));

        let short = engine.decide(Some(&probs), &features, price(), DirectionPolicy::AssumeShort);
        assert_eq!(short.direction, Direction::Short);
        assert_eq!(short.stop_loss, Some(Decimal::from(50500)));

        let suppressed = engine.decide(Some(&probs), &features, price(), DirectionPolicy::Suppress);
        assert_eq!(suppressed.action, Action::Ignore);
        assert!(!engine.passes_gate(&suppressed));
    }

    #[test]
    fn test_unavailable_classifier_defaults_to_ignore() {
        let signal = engine().decide(
            None,
            &features_with_text("just a chart"),
            price(),
            DirectionPolicy::AssumeLong,
        );
        assert_eq!(signal.action, Action::Ignore);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn test_rejects_inverted_stop_distance() {
        let config = AgentConfig {
            stop_distance_pct: -0.01,
            ..AgentConfig::default()
        };
        assert!(matches!(
            DecisionEngine::new(&config),
            Err(ConfigError::InvalidStopDistance(_))
        ));
    }

    #[test]
    fn test_rejects_override_below_gate() {
        let config = AgentConfig {
            override_confidence: 0.3,
            ..AgentConfig::default()
        };
        assert!(DecisionEngine::new(&config).is_err());
    }

    #[test]
    fn test_enter_without_reference_price() {
        let signal = engine().decide(
            None,
            &features_with_text("long"),
            None,
            DirectionPolicy::Suppress,
        );
        assert_eq!(signal.action, Action::Enter);
        assert!(!signal.has_prices());
    }
}
