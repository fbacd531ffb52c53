//! Classifier client: one classification per message, never fails.
//!
//! Wraps a [`ClassificationService`] with the retry policy and validates the
//! JSON contract. Every failure path degrades to
//! [`Classification::default`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::llm::provider::{ClassificationService, CompletionRequest};
use crate::llm::retry::RetryPolicy;
use crate::pipeline::sanitize::truncate_chars;
use crate::pipeline::types::{Classification, Intent};

/// Longest body snippet sent for classification.
pub const MAX_SNIPPET_CHARS: usize = 4000;

/// Output is a three-field JSON object; 200 tokens is plenty.
const CLASSIFY_MAX_TOKENS: u32 = 200;

const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Why a raw response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response is not a JSON object")]
    NotObject,

    #[error("response is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Classifier with retry and contract validation.
pub struct ClassifierClient {
    service: Arc<dyn ClassificationService>,
    retry: RetryPolicy,
}

impl ClassifierClient {
    pub fn new(service: Arc<dyn ClassificationService>, retry: RetryPolicy) -> Self {
        Self { service, retry }
    }

    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    /// Classify one message. Returns the default classification on any failure.
    pub async fn classify(&self, sender: &str, subject: &str, body: &str) -> Classification {
        info!(subject = %subject, "Classifying message");

        let request = CompletionRequest {
            system: build_system_prompt(),
            user: build_user_prompt(sender, subject, body),
            temperature: CLASSIFY_TEMPERATURE,
            max_tokens: CLASSIFY_MAX_TOKENS,
            json_mode: true,
        };

        let raw = match self
            .retry
            .run("Classification", |_| self.service.complete(&request))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Classification call failed, using default classification");
                return Classification::default();
            }
        };

        info!(raw_response = %raw, "Classifier raw response");

        match parse_classification(&raw) {
            Ok(classification) => {
                info!(
                    intent = classification.intent.label(),
                    blocked = classification.is_blocked_region,
                    priority = classification.is_priority_region,
                    "Classification result"
                );
                classification
            }
            Err(e @ ContractError::NotJson(_)) => {
                error!(raw_response = %raw, error = %e, "Classifier returned invalid JSON");
                Classification::default()
            }
            Err(e) => {
                warn!(raw_response = %raw, error = %e, "Classifier JSON incomplete");
                Classification::default()
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Fixed instruction set: intent definitions and region keyword lists.
pub fn build_system_prompt() -> String {
    "You are an email classification assistant. Analyse the email and decide its intent \
     and where it comes from.\n\
     Respond with ONLY a JSON object, no other text:\n\
     {\"intent\": \"INQUIRY | SPAM | OTHER\", \"is_blocked_region\": true | false, \"is_priority_region\": true | false}\n\n\
     1. \"intent\":\n\
     - \"INQUIRY\": a clear business inquiry or cooperation request from a new customer.\n\
     - \"SPAM\": advertising, scams, junk mail, newsletters.\n\
     - \"OTHER\": anything else (notifications, support, bounces, empty messages).\n\n\
     2. \"is_blocked_region\": true if the body, subject or sender explicitly mentions any of \
     these keywords (case-insensitive):\n\
     - Regions: Africa, Middle East, Southeast Asia\n\
     - Countries/areas: Taiwan, Korea (South Korea)\n\
     - African countries: Nigeria, Ethiopia, Egypt, DRC, Congo, Tanzania, South Africa, Kenya, \
     Uganda, Algeria, Sudan, Morocco, Angola, Mozambique, Ghana, Madagascar, Cameroon, \
     Côte d'Ivoire, Niger, Burkina Faso, Mali, Malawi, Zambia, Senegal, Chad, Somalia, Zimbabwe, \
     Guinea, Rwanda, Benin, Burundi, Tunisia, Togo, Sierra Leone, Libya, Liberia, Mauritania, \
     Namibia, Botswana, Gabon, Lesotho, Swaziland, Djibouti\n\
     - Middle East countries: Bahrain, Cyprus, Egypt, Iran, Iraq, Israel, Jordan, Kuwait, Lebanon, \
     Oman, Qatar, Saudi Arabia, Syria, Turkey, United Arab Emirates (UAE), Yemen, Palestine\n\
     - Southeast Asian countries: Vietnam, Thailand, Malaysia, Indonesia, Philippines, Singapore, \
     Myanmar, Cambodia, Laos, Brunei, Timor-Leste\n\n\
     3. \"is_priority_region\": true if the body, subject or sender explicitly mentions any of \
     these keywords (case-insensitive):\n\
     - Regions: European Union (EU)\n\
     - Countries: Australia, New Zealand, USA (United States), Canada\n\
     - EU countries: Austria, Belgium, Bulgaria, Croatia, Republic of Cyprus, Czech Republic, \
     Denmark, Estonia, Finland, France, Germany, Greece, Hungary, Ireland, Italy, Latvia, \
     Lithuania, Luxembourg, Malta, Netherlands, Poland, Portugal, Romania, Slovakia, Slovenia, \
     Spain, Sweden\n\n\
     Rules:\n\
     - This is keyword matching. If the email mentions 'Nigeria', is_blocked_region must be true.\n\
     - is_blocked_region and is_priority_region may both be true (e.g. Germany and Taiwan).\n\
     - Judge intent independently of region."
        .to_string()
}

/// The message under review: sender, subject and a bounded body snippet.
pub fn build_user_prompt(sender: &str, subject: &str, body: &str) -> String {
    let snippet = truncate_chars(body, MAX_SNIPPET_CHARS);
    format!(
        "Classify the following email:\n\
         From: {sender}\n\
         Subject: {subject}\n\
         Body excerpt:\n\
         ---\n\
         {snippet}\n\
         ---\n\
         Return only the JSON object."
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Validate a raw response against the classification contract.
///
/// `intent` and `is_blocked_region` are required; a missing
/// `is_priority_region` reads as false. Unknown fields are ignored.
pub fn parse_classification(raw: &str) -> Result<Classification, ContractError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| ContractError::NotJson(e.to_string()))?;
    let object = value.as_object().ok_or(ContractError::NotObject)?;

    let intent_value = object
        .get("intent")
        .ok_or(ContractError::MissingField("intent"))?;
    let intent = match intent_value.as_str() {
        Some("INQUIRY") => Intent::Inquiry,
        Some("SPAM") => Intent::Spam,
        Some("OTHER") => Intent::Other,
        _ => {
            return Err(ContractError::InvalidField {
                field: "intent",
                value: intent_value.to_string(),
            });
        }
    };

    let is_blocked_region = bool_field(object, "is_blocked_region")?
        .ok_or(ContractError::MissingField("is_blocked_region"))?;
    let is_priority_region = bool_field(object, "is_priority_region")?.unwrap_or(false);

    Ok(Classification {
        intent,
        is_blocked_region,
        is_priority_region,
    })
}

fn bool_field(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<bool>, ContractError> {
    match object.get(field) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ContractError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::mock::MockClassificationService;

    fn client(service: &Arc<MockClassificationService>) -> ClassifierClient {
        ClassifierClient::new(service.clone(), RetryPolicy::immediate(3))
    }

    fn timeout() -> LlmError {
        LlmError::Timeout {
            provider: "mock".into(),
            timeout: Duration::from_secs(30),
        }
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_full_response() {
        let c = parse_classification(
            r#"{"intent": "INQUIRY", "is_blocked_region": false, "is_priority_region": true}"#,
        )
        .unwrap();
        assert_eq!(c.intent, Intent::Inquiry);
        assert!(!c.is_blocked_region);
        assert!(c.is_priority_region);
    }

    #[test]
    fn parse_missing_priority_defaults_false() {
        let c = parse_classification(r#"{"intent": "SPAM", "is_blocked_region": true}"#).unwrap();
        assert_eq!(c.intent, Intent::Spam);
        assert!(c.is_blocked_region);
        assert!(!c.is_priority_region);
    }

    #[test]
    fn parse_ignores_unknown_fields() {
        let c = parse_classification(
            r#"{"intent": "OTHER", "is_blocked_region": false, "is_priority_region": false, "confidence": 0.7, "notes": "x"}"#,
        )
        .unwrap();
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            parse_classification("Sure! Here is the answer."),
            Err(ContractError::NotJson(_))
        ));
    }

    #[test]
    fn parse_rejects_non_object() {
        assert_eq!(
            parse_classification("[1, 2]"),
            Err(ContractError::NotObject)
        );
    }

    #[test]
    fn parse_requires_intent_and_blocked() {
        assert_eq!(
            parse_classification(r#"{"is_blocked_region": false}"#),
            Err(ContractError::MissingField("intent"))
        );
        assert_eq!(
            parse_classification(r#"{"intent": "INQUIRY", "is_priority_region": true}"#),
            Err(ContractError::MissingField("is_blocked_region"))
        );
    }

    #[test]
    fn parse_rejects_unknown_intent_and_wrong_types() {
        assert!(matches!(
            parse_classification(r#"{"intent": "URGENT", "is_blocked_region": false}"#),
            Err(ContractError::InvalidField { field: "intent", .. })
        ));
        assert!(matches!(
            parse_classification(r#"{"intent": "SPAM", "is_blocked_region": "yes"}"#),
            Err(ContractError::InvalidField {
                field: "is_blocked_region",
                ..
            })
        ));
        assert!(matches!(
            parse_classification(
                r#"{"intent": "SPAM", "is_blocked_region": false, "is_priority_region": 1}"#
            ),
            Err(ContractError::InvalidField {
                field: "is_priority_region",
                ..
            })
        ));
    }

    // ── Prompts ─────────────────────────────────────────────────────

    #[test]
    fn system_prompt_names_contract_fields() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("\"intent\""));
        assert!(prompt.contains("is_blocked_region"));
        assert!(prompt.contains("is_priority_region"));
        assert!(prompt.contains("Nigeria"));
        assert!(prompt.contains("Germany"));
    }

    #[test]
    fn user_prompt_bounds_snippet() {
        let body = "y".repeat(6000);
        let prompt = build_user_prompt("a@b.c", "Quote", &body);
        assert!(prompt.contains("From: a@b.c"));
        assert!(prompt.contains("Subject: Quote"));
        assert_eq!(prompt.matches('y').count(), MAX_SNIPPET_CHARS);
    }

    // ── Client behaviour ────────────────────────────────────────────

    #[tokio::test]
    async fn valid_response_is_returned() {
        let service = Arc::new(MockClassificationService::new());
        service.enqueue_response(Ok(
            r#"{"intent":"INQUIRY","is_blocked_region":false,"is_priority_region":false}"#.into(),
        ));
        let c = client(&service).classify("a@b.c", "Quote", "Need 500 units").await;
        assert_eq!(c.intent, Intent::Inquiry);
        assert_eq!(service.call_count(), 1);

        let request = service.last_request().unwrap();
        assert!(request.json_mode);
        assert_eq!(request.max_tokens, 200);
        assert!(request.user.contains("Need 500 units"));
    }

    #[tokio::test]
    async fn three_timeouts_fall_back_after_three_attempts() {
        let service = Arc::new(MockClassificationService::new());
        for _ in 0..3 {
            service.enqueue_response(Err(timeout()));
        }
        let c = client(&service).classify("a@b.c", "s", "b").await;
        assert_eq!(c, Classification::default());
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_makes_one_attempt() {
        let service = Arc::new(MockClassificationService::new());
        service.enqueue_response(Err(LlmError::AuthFailed {
            provider: "mock".into(),
        }));
        let c = client(&service).classify("a@b.c", "s", "b").await;
        assert_eq!(c, Classification::default());
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let service = Arc::new(MockClassificationService::new());
        service.enqueue_response(Err(LlmError::RateLimited {
            provider: "mock".into(),
            retry_after: None,
        }));
        service.enqueue_response(Ok(
            r#"{"intent":"SPAM","is_blocked_region":true,"is_priority_region":false}"#.into(),
        ));
        let c = client(&service).classify("a@b.c", "s", "b").await;
        assert_eq!(c.intent, Intent::Spam);
        assert!(c.is_blocked_region);
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let service = Arc::new(MockClassificationService::new());
        service.enqueue_response(Ok("not json at all".into()));
        let c = client(&service).classify("a@b.c", "s", "b").await;
        assert_eq!(c, Classification::default());
        assert_eq!(service.call_count(), 1);
    }
}
