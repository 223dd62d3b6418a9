//! LLM classifier (tier 2) and conversational fallback (tier 3)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::Action;
use crate::cascade::{EngineId, RawRecognition, RawRecognizer, RawScore, RecognitionResult, Recognizer};
use crate::engines::LanguageModel;
use crate::Result;

/// Instructions prepended to the utterance for classification
const CLASSIFY_PROMPT: &str = "You control a Home Assistant installation. \
Classify the user's request. Reply with a single JSON object and nothing else: \
{\"domain\": \"light\", \"service\": \"turn_on\", \"target\": \"light.kitchen\", \"confidence\": 0.9}. \
Use \"all\" as target when no specific device is named. \
If the request is not a device command, reply {\"service\": \"none\", \"confidence\": 0.0}.\n\nRequest: ";

#[derive(Debug, Deserialize)]
struct Classification {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Asks the language model to resolve an action
pub struct LlmClassifier {
    llm: Arc<dyn LanguageModel>,
}

impl LlmClassifier {
    /// Create a classifier over a language model
    #[must_use]
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

/// Extract the action from a model reply; anything unparseable scores zero
fn parse_classification(reply: &str) -> (Option<Action>, RawScore) {
    let json = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            tracing::debug!(reply, "classifier reply has no JSON object");
            return (None, RawScore::Unscored);
        }
    };

    let parsed: Classification = match serde_json::from_str(json) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "classifier reply is not valid JSON");
            return (None, RawScore::Unscored);
        }
    };

    let score = parsed
        .confidence
        .map_or(RawScore::Unscored, RawScore::Probability);

    match (parsed.domain, parsed.service) {
        (Some(domain), Some(service))
            if !domain.is_empty() && !service.is_empty() && service != "none" =>
        {
            let target = parsed
                .target
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "all".to_string());
            let action = Action::new(domain, service, target);
            if !action.is_well_formed() {
                tracing::warn!(%action, "classifier proposed a malformed service, ignoring");
                return (None, RawScore::Unscored);
            }
            (Some(action), score)
        }
        _ => (None, RawScore::Unscored),
    }
}

#[async_trait]
impl RawRecognizer<str> for LlmClassifier {
    fn engine_id(&self) -> EngineId {
        EngineId::Llm
    }

    async fn recognize(&self, input: &str, timeout: Duration) -> Result<RawRecognition> {
        let prompt = format!("{CLASSIFY_PROMPT}{input}");
        let reply = self.llm.complete(&prompt, timeout).await?;
        let (action, score) = parse_classification(&reply);

        Ok(RawRecognition {
            text: input.to_string(),
            score,
            action,
        })
    }
}

/// Final tier: always accepts, carries no action
pub struct ConversationalFallback;

#[async_trait]
impl Recognizer<str> for ConversationalFallback {
    fn engine_id(&self) -> EngineId {
        EngineId::Conversational
    }

    async fn attempt(&self, input: &str, _timeout: Duration) -> Result<RecognitionResult> {
        Ok(RecognitionResult::new(input, 1.0, EngineId::Conversational))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::ConfidenceScorer;

    #[test]
    fn parses_clean_json() {
        let (action, score) = parse_classification(
            r#"{"domain":"light","service":"turn_on","target":"light.desk","confidence":0.92}"#,
        );
        assert_eq!(action, Some(Action::new("light", "turn_on", "light.desk")));
        assert!((ConfidenceScorer::score(&score) - 0.92).abs() < 1e-4);
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let (action, _) = parse_classification(
            "Sure! {\"domain\":\"cover\",\"service\":\"open_cover\",\"confidence\":0.7} hope that helps",
        );
        assert_eq!(action, Some(Action::new("cover", "open_cover", "all")));
    }

    #[test]
    fn path_like_domain_or_service_scores_zero() {
        for reply in [
            r#"{"domain":"../../config/core","service":"check_config","confidence":0.99}"#,
            r#"{"domain":"light","service":"turn_on/../../x","confidence":0.99}"#,
            r#"{"domain":"Light","service":"turn_on","confidence":0.99}"#,
            r#"{"domain":"light","service":"turn on?x=1","confidence":0.99}"#,
        ] {
            let (action, score) = parse_classification(reply);
            assert!(action.is_none(), "{reply}");
            assert_eq!(score, RawScore::Unscored);
        }
    }

    #[test]
    fn none_service_and_garbage_score_zero() {
        let (action, score) = parse_classification(r#"{"service":"none","confidence":0.0}"#);
        assert!(action.is_none());
        assert_eq!(score, RawScore::Unscored);

        let (action, score) = parse_classification("I think you want the lights on");
        assert!(action.is_none());
        assert_eq!(score, RawScore::Unscored);
    }

    #[tokio::test]
    async fn conversational_fallback_always_accepts() {
        let result = ConversationalFallback
            .attempt("tell me a joke", Duration::from_millis(10))
            .await
            .unwrap();
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
        assert!(result.action.is_none());
    }
}
