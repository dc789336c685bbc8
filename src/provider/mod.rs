//! Provider Adapter: uniform request/response over heterogeneous LLM
//! backends.
//!
//! `ProviderAdapter` is a small async trait, one implementation per
//! [`Provider`] tag, dispatched through [`registry::default_table`]'s
//! closed table rather than open-ended duck typing. Adapters are stateless
//! across invocations; rate limiting and concurrency are imposed entirely
//! by the [`crate::pacer::ProviderPacer`] wrapping them.

pub mod http;
pub mod mock;
pub mod openai_compatible;
pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CouncilError;
use crate::model::{InvocationResult, ModelInvocation, Provider};

/// Translates one `ModelInvocation` into a call against a specific LLM
/// backend.
///
/// Implementations MUST NOT exceed `invocation.max_completion_tokens` and
/// MUST honour `invocation.deadline`, failing with
/// [`crate::error::ErrorKind::Timeout`] on expiry. Backend-specific error
/// codes SHOULD be normalised into the closed error taxonomy rather than
/// leaking transport-level detail.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn invoke(&self, invocation: &ModelInvocation) -> Result<InvocationResult, CouncilError>;

    /// The provider tag this adapter serves.
    fn provider(&self) -> Provider;
}

/// A closed dispatch table: one `Arc<dyn ProviderAdapter>` per registered
/// `Provider`. Looking up an unregistered provider is the caller's signal
/// to drop it from the candidate list (it has no credential, in practice,
/// since adapters are only registered for providers with a supplied
/// credential).
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn registered_providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.adapters.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
