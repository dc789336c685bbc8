//! Agent Executor: runs one role once, choosing a provider and model and
//! handling retry/fallback across candidates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::{CouncilError, ErrorKind};
use crate::event::{AgentEvent, EventHandler};
use crate::model::{CredentialMap, ModelInvocation, Provider, Role};
use crate::pacer::ProviderPacer;
use crate::provider::registry::defaults_for;
use crate::provider::ProviderRegistry;

/// Fixed priority order providers are tried in when a role has no explicit
/// preference and its canonical provider lacks a credential.
const FALLBACK_ORDER: [Provider; 4] = [
    Provider::OpenAiFamily,
    Provider::GeminiFamily,
    Provider::PerplexityFamily,
    Provider::KimiFamily,
];

/// Each role's canonical preferred provider, used before falling through
/// `FALLBACK_ORDER`.
fn canonical_provider_for(role: Role) -> Provider {
    match role {
        Role::Architect => Provider::OpenAiFamily,
        Role::Researcher => Provider::PerplexityFamily,
        Role::DataEngineer => Provider::GeminiFamily,
        Role::RedTeamer => Provider::OpenAiFamily,
        Role::Optimizer => Provider::KimiFamily,
        Role::Synthesizer => Provider::OpenAiFamily,
        Role::Judge => Provider::GeminiFamily,
    }
}

/// Delay before the Nth retry of a transient failure: 250ms, then 1s, then
/// capped at 1s for anything beyond (only one retry is allowed per
/// candidate, so `attempt` is always 0 or 1 in practice).
pub fn backoff_delay(attempt: u32) -> Duration {
    match attempt {
        0 => Duration::from_millis(250),
        _ => Duration::from_secs(1),
    }
}

/// Executes one role against the registered providers, applying the pacer,
/// retry, and fallback policy described in the component design.
pub struct AgentExecutor {
    pub registry: ProviderRegistry,
    pub pacer: ProviderPacer,
    pub event_handler: Arc<dyn EventHandler>,
}

impl AgentExecutor {
    pub fn new(registry: ProviderRegistry, pacer: ProviderPacer, event_handler: Arc<dyn EventHandler>) -> Self {
        Self {
            registry,
            pacer,
            event_handler,
        }
    }

    fn candidate_order(&self, role: Role, preferred: Option<Provider>, credentials: &CredentialMap) -> Vec<Provider> {
        let mut order = Vec::new();
        let mut push_if_credentialed = |p: Provider, order: &mut Vec<Provider>| {
            if credentials.contains(p.id()) && !order.contains(&p) {
                order.push(p);
            }
        };

        if let Some(preferred) = preferred {
            push_if_credentialed(preferred, &mut order);
        }
        push_if_credentialed(canonical_provider_for(role), &mut order);
        for provider in FALLBACK_ORDER {
            push_if_credentialed(provider, &mut order);
        }
        order
    }

    /// Run `role` to completion (or exhaustion of candidates), returning
    /// the successful `InvocationResult` or a `CouncilError`.
    pub async fn execute(
        &self,
        role: Role,
        system_prompt: String,
        user_prompt: String,
        max_completion_tokens: u32,
        preferred: Option<Provider>,
        credentials: &CredentialMap,
        deadline: Duration,
        mut cancel_rx: Option<&mut watch::Receiver<bool>>,
    ) -> Result<crate::model::InvocationResult, CouncilError> {
        let started = Instant::now();
        self.event_handler
            .on_agent_event(&AgentEvent::StageStart { role })
            .await;

        let mut candidates = self.candidate_order(role, preferred, credentials);
        let mut last_error: Option<CouncilError> = None;

        while !candidates.is_empty() {
            let provider = candidates.remove(0);
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                let err = CouncilError::new(ErrorKind::Timeout, "deadline exhausted before trying next candidate");
                self.emit_stage_end(role, started, false, Some(err.kind)).await;
                return Err(err);
            }

            let Some(adapter) = self.registry.get(provider) else {
                continue;
            };
            let credential = credentials.get(provider.id());
            if credential.is_none() {
                continue;
            }

            let defaults = defaults_for(provider);

            for attempt in 0..2u32 {
                let remaining = deadline.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    let err = CouncilError::new(ErrorKind::Timeout, "deadline exhausted mid-retry");
                    self.emit_stage_end(role, started, false, Some(err.kind)).await;
                    return Err(err);
                }

                let lease = match cancel_rx.as_deref_mut() {
                    Some(cancel_rx) => self.pacer.acquire_cancellable(provider, remaining, cancel_rx).await,
                    None => self.pacer.acquire(provider, remaining).await,
                };
                let lease = match lease {
                    Ok(lease) => lease,
                    Err(err) => {
                        last_error = Some(err);
                        break;
                    }
                };

                let remaining = deadline.saturating_sub(started.elapsed());
                let invocation = ModelInvocation {
                    role,
                    provider,
                    model_name: defaults.default_model.to_string(),
                    system_prompt: system_prompt.clone(),
                    user_prompt: user_prompt.clone(),
                    max_completion_tokens,
                    deadline: remaining,
                };

                let result = adapter.invoke(&invocation).await;
                drop(lease);

                match result {
                    Ok(result) => {
                        self.event_handler
                            .on_agent_event(&AgentEvent::StageDelta {
                                role,
                                delta_text: result.content.clone(),
                            })
                            .await;
                        self.emit_stage_end(role, started, true, None).await;
                        return Ok(result);
                    }
                    Err(err) if err.kind == ErrorKind::Unauthorized => {
                        last_error = Some(err);
                        break;
                    }
                    Err(err) if err.kind.is_transient() => {
                        log::warn!("{role} on {provider}: transient failure ({}), retrying", err.kind);
                        last_error = Some(err);
                        if attempt == 0 {
                            tokio::time::sleep(backoff_delay(attempt)).await;
                            continue;
                        } else {
                            break;
                        }
                    }
                    Err(err) if err.kind == ErrorKind::Timeout => {
                        self.emit_stage_end(role, started, false, Some(ErrorKind::Timeout)).await;
                        return Err(err);
                    }
                    Err(err) => {
                        last_error = Some(err);
                        break;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| {
            CouncilError::new(ErrorKind::NoProvider, format!("no credentialed provider available for role {role}"))
        });
        let kind = if matches!(err.kind, ErrorKind::Unauthorized) {
            ErrorKind::NoProvider
        } else {
            err.kind
        };
        self.emit_stage_end(role, started, false, Some(kind)).await;
        log::error!("{role}: exhausted all candidates: {err}");
        Err(CouncilError::new(ErrorKind::NoProvider, format!("exhausted all candidates for role {role}: {err}")))
    }

    async fn emit_stage_end(&self, role: Role, started: Instant, succeeded: bool, error_kind: Option<ErrorKind>) {
        self.event_handler
            .on_agent_event(&AgentEvent::StageEnd {
                role,
                latency_ms: started.elapsed().as_millis() as u64,
                succeeded,
                error_kind,
            })
            .await;
    }
}
