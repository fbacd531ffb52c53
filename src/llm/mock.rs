//! Scripted classification service for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{ClassificationService, CompletionRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns queued responses in order, then the fallback response once the queue is empty.
#[derive(Debug, Default)]
pub struct MockClassificationService {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Mutex<Option<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockClassificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that answers every call with `response`.
    pub fn always(response: impl Into<String>) -> Self {
        let service = Self::new();
        service.set_fallback(response);
        service
    }

    pub fn enqueue_response(&self, response: Result<String, LlmError>) {
        lock(&self.responses).push_back(response);
    }

    pub fn set_fallback(&self, response: impl Into<String>) {
        *lock(&self.fallback) = Some(response.into());
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl ClassificationService for MockClassificationService {
    fn model_name(&self) -> &str {
        "mock-classifier"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        if let Some(response) = lock(&self.responses).pop_front() {
            return response;
        }
        lock(&self.fallback)
            .clone()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "mock".into(),
                reason: "no mock response queued".into(),
            })
    }
}
