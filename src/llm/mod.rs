//! Message classification.
//!
//! - [`provider`]: the `ClassificationService` capability and its
//!   OpenAI-compatible HTTP implementation (DeepSeek by default)
//! - [`retry`]: bounded exponential backoff for transient failures
//! - [`classifier`]: prompt construction and response validation
//! - [`mock`]: scripted service for tests

pub mod classifier;
pub mod mock;
pub mod provider;
pub mod retry;

pub use classifier::{ClassifierClient, ContractError, parse_classification};
pub use mock::MockClassificationService;
pub use provider::{ClassificationService, CompletionRequest, OpenAiCompatibleService};
pub use retry::RetryPolicy;

use std::sync::Arc;

use crate::config::ClassifierConfig;
use crate::error::LlmError;

/// Create the classification service from configuration.
pub fn create_service(config: &ClassifierConfig) -> Result<Arc<dyn ClassificationService>, LlmError> {
    let service = OpenAiCompatibleService::new(config)?;
    tracing::info!("Using classifier at {} (model: {})", config.base_url, config.model);
    Ok(Arc::new(service))
}
