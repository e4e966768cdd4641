//! Sequence classifier interface and HTTP client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ClassifierError;
use crate::features::FeatureVector;
use crate::signal::{Action, ACTIONS};

/// Probability distribution over {IGNORE, ENTER, EXIT}, in that order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionProbabilities([f64; 3]);

impl ActionProbabilities {
    pub fn new(ignore: f64, enter: f64, exit: f64) -> Self {
        Self([ignore, enter, exit])
    }

    /// Parse a model output row; exactly three finite, non-negative values
    pub fn from_slice(values: &[f64]) -> Result<Self, ClassifierError> {
        let row: [f64; 3] = values.try_into().map_err(|_| {
            ClassifierError::InvalidResponse(format!(
                "expected 3 probabilities, got {}",
                values.len()
            ))
        })?;
        if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ClassifierError::InvalidResponse(format!(
                "probabilities out of range: {:?}",
                row
            )));
        }
        Ok(Self(row))
    }

    pub fn get(&self, action: Action) -> f64 {
        match action {
            Action::Ignore => self.0[0],
            Action::Enter => self.0[1],
            Action::Exit => self.0[2],
        }
    }

    /// Highest-probability action; ties go to the earlier action
    pub fn top(&self) -> (Action, f64) {
        let mut best = (ACTIONS[0], self.0[0]);
        for (action, &p) in ACTIONS.iter().zip(self.0.iter()).skip(1) {
            if p > best.1 {
                best = (*action, p);
            }
        }
        best
    }

    pub fn as_array(&self) -> [f64; 3] {
        self.0
    }
}

/// Maps a full sequence window to an action distribution
#[async_trait]
pub trait SequenceClassifier: Send + Sync {
    async fn classify(
        &self,
        sequence: &[FeatureVector],
    ) -> Result<ActionProbabilities, ClassifierError>;

    fn model_version(&self) -> &str;
}

/// TensorFlow-Serving style `:predict` client
pub struct HttpClassifier {
    client: Client,
    url: String,
    model_version: String,
    sequence_length: usize,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: [Vec<&'a [f32]>; 1],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f64>>,
}

impl HttpClassifier {
    pub fn new(url: &str, model_version: &str, sequence_length: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            model_version: model_version.to_string(),
            sequence_length,
        })
    }
}

#[async_trait]
impl SequenceClassifier for HttpClassifier {
    async fn classify(
        &self,
        sequence: &[FeatureVector],
    ) -> Result<ActionProbabilities, ClassifierError> {
        if sequence.len() != self.sequence_length {
            return Err(ClassifierError::Shape {
                expected: self.sequence_length,
                got: sequence.len(),
            });
        }

        let req = PredictRequest {
            instances: [sequence.iter().map(|v| v.as_slice()).collect()],
        };

        let response = self.client.post(&self.url).json(&req).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status { status, body });
        }

        let resp: PredictResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        let row = resp
            .predictions
            .first()
            .ok_or_else(|| ClassifierError::InvalidResponse("empty predictions".to_string()))?;

        let probs = ActionProbabilities::from_slice(row)?;
        debug!("Classifier output: {:?}", probs.as_array());
        Ok(probs)
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn window(n: usize) -> Vec<FeatureVector> {
        (0..n).map(|_| FeatureVector::zeros()).collect()
    }

    #[test]
    fn test_top_action() {
        assert_eq!(
            ActionProbabilities::new(0.1, 0.7, 0.2).top(),
            (Action::Enter, 0.7)
        );
        assert_eq!(
            ActionProbabilities::new(0.4, 0.4, 0.2).top().0,
            Action::Ignore
        );
    }

    #[test]
    fn test_from_slice_rejects_bad_rows() {
        assert!(ActionProbabilities::from_slice(&[0.5, 0.5]).is_err());
        assert!(ActionProbabilities::from_slice(&[0.5, f64::NAN, 0.1]).is_err());
        assert!(ActionProbabilities::from_slice(&[0.2, 0.3, 0.5]).is_ok());
    }

    #[tokio::test]
    async fn test_http_classifier_parses_predictions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models/vision:predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "predictions": [[0.05, 0.15, 0.80]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/v1/models/vision:predict", server.uri());
        let classifier = HttpClassifier::new(&url, "model_test", 4).unwrap();

        let probs = classifier.classify(&window(4)).await.unwrap();
        assert_eq!(probs.top(), (Action::Exit, 0.80));
        assert_eq!(classifier.model_version(), "model_test");
    }

    #[tokio::test]
    async fn test_http_classifier_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
            .mount(&server)
            .await;

        let classifier = HttpClassifier::new(&server.uri(), "m", 2).unwrap();

        assert!(matches!(
            classifier.classify(&window(1)).await,
            Err(ClassifierError::Shape { expected: 2, got: 1 })
        ));
        assert!(matches!(
            classifier.classify(&window(2)).await,
            Err(ClassifierError::Status { status: 503, .. })
        ));
    }
}
