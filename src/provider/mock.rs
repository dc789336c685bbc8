//! Deterministic mock adapter for tests.
//!
//! Grounded in this codebase's pervasive `MockClient` test-double pattern:
//! a canned response plus configurable latency and failure injection, with
//! no network access. Used throughout the scheduler, executor, and facade
//! test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{CouncilError, ErrorKind};
use crate::model::{InvocationResult, InvocationStatus, ModelInvocation, Provider};
use crate::provider::ProviderAdapter;

/// What a `MockProviderAdapter` does on its next call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return this content as a successful completion.
    Respond(String),
    /// Fail immediately with this error kind.
    Fail(ErrorKind),
    /// Sleep past any reasonable deadline, forcing a timeout.
    HangForever,
}

/// A `ProviderAdapter` that never makes a network call.
///
/// Behaviors are consumed in order from a queue; once exhausted, the last
/// behavior repeats. `call_count` lets tests assert how many times the
/// adapter was invoked (e.g. to verify retry counts).
pub struct MockProviderAdapter {
    provider: Provider,
    behaviors: std::sync::Mutex<Vec<MockBehavior>>,
    call_count: AtomicUsize,
    latency: Duration,
}

impl MockProviderAdapter {
    pub fn new(provider: Provider, behavior: MockBehavior) -> Self {
        Self {
            provider,
            behaviors: std::sync::Mutex::new(vec![behavior]),
            call_count: AtomicUsize::new(0),
            latency: Duration::from_millis(0),
        }
    }

    pub fn with_sequence(provider: Provider, behaviors: Vec<MockBehavior>) -> Self {
        Self {
            provider,
            behaviors: std::sync::Mutex::new(behaviors),
            call_count: AtomicUsize::new(0),
            latency: Duration::from_millis(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockProviderAdapter {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<InvocationResult, CouncilError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let behavior = {
            let mut behaviors = self.behaviors.lock().unwrap();
            if behaviors.len() > 1 {
                behaviors.remove(0)
            } else {
                behaviors[0].clone()
            }
        };

        if !self.latency.is_zero() {
            let sleep_fut = sleep(self.latency);
            tokio::select! {
                _ = sleep_fut => {}
                _ = sleep(invocation.deadline) => {
                    return Err(CouncilError::new(ErrorKind::Timeout, "mock adapter exceeded deadline"));
                }
            }
        }

        match behavior {
            MockBehavior::Respond(content) => Ok(InvocationResult {
                content,
                provider_used: self.provider,
                model_used: invocation.model_name.clone(),
                input_tokens: (invocation.user_prompt.split_whitespace().count()) as u32,
                output_tokens: 32,
                latency_ms: self.latency.as_millis() as u64,
                status: InvocationStatus::Ok,
                error_kind: None,
            }),
            MockBehavior::Fail(kind) => Err(CouncilError::new(kind, "mock adapter injected failure")),
            MockBehavior::HangForever => {
                sleep(invocation.deadline + Duration::from_secs(1)).await;
                Err(CouncilError::new(ErrorKind::Timeout, "mock adapter hung past deadline"))
            }
        }
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use std::time::Duration as StdDuration;

    fn invocation() -> ModelInvocation {
        ModelInvocation {
            role: Role::Architect,
            provider: Provider::OpenAiFamily,
            model_name: "mock-model".into(),
            system_prompt: "system".into(),
            user_prompt: "hello world".into(),
            max_completion_tokens: 512,
            deadline: StdDuration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn responds_with_canned_content() {
        let adapter = MockProviderAdapter::new(
            Provider::OpenAiFamily,
            MockBehavior::Respond("canned".into()),
        );
        let result = adapter.invoke(&invocation()).await.unwrap();
        assert_eq!(result.content, "canned");
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn sequence_is_consumed_in_order() {
        let adapter = MockProviderAdapter::with_sequence(
            Provider::OpenAiFamily,
            vec![
                MockBehavior::Fail(ErrorKind::Unavailable),
                MockBehavior::Respond("second try".into()),
            ],
        );
        let first = adapter.invoke(&invocation()).await;
        assert!(first.is_err());
        let second = adapter.invoke(&invocation()).await.unwrap();
        assert_eq!(second.content, "second try");
    }
}
