//! Orchestrator Facade: the single public entry point tying every component
//! together into one `run` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::classifier;
use crate::config::CouncilConfig;
use crate::context_pack;
use crate::error::CouncilError;
use crate::event::{CompositeEventHandler, EventHandler, NoopEventHandler, PhaseEvent};
use crate::model::{
    ContextPack, CouncilErrorSummary, CredentialMap, Role, RunInput, RunResult, SessionStatus,
};
use crate::pacer::ProviderPacer;
use crate::prompts::{DefaultPromptProvider, PromptProvider};
use crate::provider::ProviderRegistry;
use crate::scheduler::{PartialSpecialistPolicy, PhaseScheduler, RunContext};
use crate::session::{SessionManager, SessionPhaseRecorder};
use crate::validator;

/// The orchestrator's single public entry point. Owns the provider
/// registry, the shared pacers, the session table, and the (possibly
/// caller-supplied) prompt table and event handler.
pub struct CouncilOrchestrator {
    config: CouncilConfig,
    registry: ProviderRegistry,
    pacer: ProviderPacer,
    sessions: SessionManager,
    prompts: Arc<dyn PromptProvider>,
    event_handler: Arc<dyn EventHandler>,
    partial_policy: PartialSpecialistPolicy,
    /// Global cap on runs executing concurrently, acquired once per run and
    /// held for its whole duration.
    run_semaphore: Arc<tokio::sync::Semaphore>,
}

impl CouncilOrchestrator {
    pub fn builder() -> CouncilOrchestratorBuilder {
        CouncilOrchestratorBuilder::default()
    }

    /// Run one request end to end and block until it completes: classify,
    /// build the context pack, register a session, run the three-phase
    /// pipeline, validate, and return a `RunResult` — even on failure, the
    /// result is always returned rather than the error being propagated,
    /// matching the fire-and-report contract callers rely on.
    ///
    /// `event_handler` is this call's emit sink, composed alongside the
    /// builder-level handler (if any) so two concurrent `run` calls on the
    /// same orchestrator each see only their own per-call handler fire,
    /// while both still reach the shared builder-level one.
    pub async fn run(&self, input: RunInput, credentials: CredentialMap, event_handler: Arc<dyn EventHandler>) -> RunResult {
        let (session_id, cancel_rx) = self.sessions.create(None).await;
        self.run_to_completion(input, credentials, session_id, cancel_rx, event_handler).await
    }

    /// Register a session and launch its pipeline in the background,
    /// returning the session id immediately rather than waiting for
    /// completion. Callers poll [`Self::session_status`] or subscribe via
    /// [`Self::observe`] (or call [`Self::cancel`]) against the returned id;
    /// the final `RunResult` is reflected into the session record when the
    /// background task finishes.
    ///
    /// Unlike [`Self::run`], there's no per-call `event_handler` here — this
    /// path's subscriber attaches afterward via `observe(session_id)`, which
    /// the returned id is for.
    ///
    /// Requires `self` behind an `Arc` since the pipeline outlives this
    /// call.
    pub async fn start_session(self: &Arc<Self>, input: RunInput, credentials: CredentialMap) -> uuid::Uuid {
        let (session_id, cancel_rx) = self.sessions.create(None).await;
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator
                .run_to_completion(input, credentials, session_id, cancel_rx, Arc::new(NoopEventHandler))
                .await;
        });
        session_id
    }

    async fn run_to_completion(
        &self,
        input: RunInput,
        mut credentials: CredentialMap,
        session_id: uuid::Uuid,
        cancel_rx: tokio::sync::watch::Receiver<bool>,
        event_handler: Arc<dyn EventHandler>,
    ) -> RunResult {
        let started = Instant::now();
        log::info!("session {session_id}: starting run ({} credentialed providers)", credentials.len());

        let _permit = self
            .run_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("run semaphore is never closed");

        let result = self.run_inner(&input, &credentials, session_id, cancel_rx, event_handler).await;
        credentials.clear();

        let execution_time_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok((output, phase_outputs, provider_used_per_role, context_pack)) => {
                let quality_scores = if input.enable_validation {
                    Some(validator::validate(&input.query, &context_pack, &output))
                } else {
                    None
                };
                self.sessions
                    .mark_terminal(session_id, SessionStatus::Success, Some(output.clone()), None, execution_time_ms)
                    .await;
                log::info!("session {session_id}: finished in {execution_time_ms}ms");
                RunResult {
                    status: SessionStatus::Success,
                    output: Some(output),
                    phase_outputs,
                    execution_time_ms,
                    provider_used_per_role,
                    quality_scores,
                    error: None,
                }
            }
            Err(err) => {
                let status = if err.kind == crate::error::ErrorKind::Cancelled {
                    SessionStatus::Cancelled
                } else {
                    SessionStatus::Error
                };
                self.sessions
                    .mark_terminal(session_id, status, None, Some(err.message.clone()), execution_time_ms)
                    .await;
                log::error!("session {session_id}: failed after {execution_time_ms}ms: {err}");
                RunResult {
                    status,
                    output: None,
                    phase_outputs: HashMap::new(),
                    execution_time_ms,
                    provider_used_per_role: HashMap::new(),
                    quality_scores: None,
                    error: Some(CouncilErrorSummary::from(err)),
                }
            }
        }
    }

    async fn run_inner(
        &self,
        input: &RunInput,
        credentials: &CredentialMap,
        session_id: uuid::Uuid,
        cancel_rx: tokio::sync::watch::Receiver<bool>,
        call_event_handler: Arc<dyn EventHandler>,
    ) -> Result<(String, HashMap<Role, String>, HashMap<Role, crate::model::Provider>, ContextPack), CouncilError> {
        if credentials.is_empty() {
            return Err(CouncilError::no_credentials());
        }

        self.sessions.mark_running(session_id, None).await;

        let recorder: Arc<dyn EventHandler> = Arc::new(SessionPhaseRecorder::new(self.sessions.clone(), session_id));
        let event_handler: Arc<dyn EventHandler> = Arc::new(CompositeEventHandler::new(vec![
            self.event_handler.clone(),
            call_event_handler,
            recorder,
        ]));

        let complexity = match input.complexity_override {
            Some(level) => level,
            None => {
                classifier::classify(
                    &input.query,
                    self.config.enable_llm_assisted_classification,
                    credentials,
                    &self.registry,
                )
                .await
            }
        };

        let context_pack = context_pack::build(
            &input.query,
            &input.context_pack_fragments,
            complexity,
            self.config.context_pack_token_budget,
        );

        let scheduler = PhaseScheduler {
            executor: Arc::new(crate::executor::AgentExecutor::new(
                self.registry.clone(),
                self.pacer.clone(),
                event_handler.clone(),
            )),
            prompts: self.prompts.clone(),
            event_handler,
            defaults: self.config.deadlines,
            partial_policy: self.partial_policy,
        };

        let ctx = RunContext {
            query: &input.query,
            context_pack: &context_pack,
            credentials,
            preferred_providers: &input.preferred_providers,
            deadlines: input.deadlines,
            output_mode: input.output_mode,
            enable_quality_directive: input.enable_quality_directive,
            cancel_rx,
        };

        let outcome = scheduler.run(ctx).await?;
        let output = outcome.final_artefact.clone();

        Ok((output, outcome.phase_outputs, outcome.provider_used_per_role, context_pack))
    }

    /// Snapshot a session's current state, for a caller polling instead of
    /// subscribing to the event stream.
    pub async fn session_status(&self, id: uuid::Uuid) -> Option<crate::model::Session> {
        self.sessions.get(id).await
    }

    /// Request cooperative cancellation of a running session.
    pub async fn cancel(&self, id: uuid::Uuid) -> Result<(), CouncilError> {
        self.sessions.cancel(id).await
    }

    /// Attach a subscriber to a session's phase-event stream. Pairs with
    /// [`Self::start_session`] for the asynchronous path; at most one
    /// subscriber may hold the receiver at a time, so a second call on the
    /// same session errors rather than silently fanning the same events out
    /// to two consumers.
    pub async fn observe(&self, id: uuid::Uuid) -> Result<tokio::sync::mpsc::Receiver<PhaseEvent>, CouncilError> {
        self.sessions.observe(id).await
    }
}

/// Builder for [`CouncilOrchestrator`]. Every provider the caller wants
/// available must be registered explicitly; an unregistered provider is
/// simply never a candidate, it isn't an error until every candidate for a
/// role is exhausted.
#[derive(Default)]
pub struct CouncilOrchestratorBuilder {
    config: Option<CouncilConfig>,
    registry: ProviderRegistry,
    prompts: Option<Arc<dyn PromptProvider>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    partial_policy: Option<PartialSpecialistPolicy>,
}

impl CouncilOrchestratorBuilder {
    pub fn with_config(mut self, config: CouncilConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_provider(mut self, adapter: Arc<dyn crate::provider::ProviderAdapter>) -> Self {
        self.registry.register(adapter);
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptProvider>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_partial_specialist_policy(mut self, policy: PartialSpecialistPolicy) -> Self {
        self.partial_policy = Some(policy);
        self
    }

    pub fn build(self) -> CouncilOrchestrator {
        let config = self.config.unwrap_or_default();
        let pacer = ProviderPacer::new(config.pacer_defaults);
        let run_semaphore = Arc::new(tokio::sync::Semaphore::new(config.max_in_flight_runs));
        CouncilOrchestrator {
            sessions: SessionManager::new(config.session_ttl, config.session_gc_interval),
            config,
            registry: self.registry,
            pacer,
            prompts: self.prompts.unwrap_or_else(|| Arc::new(DefaultPromptProvider)),
            event_handler: self.event_handler.unwrap_or_else(|| Arc::new(NoopEventHandler)),
            partial_policy: self.partial_policy.unwrap_or_default(),
            run_semaphore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::event::RecordingEventHandler;
    use crate::provider::mock::{MockBehavior, MockProviderAdapter};
    use crate::model::Provider;

    fn orchestrator_with_mocks(response: &str) -> CouncilOrchestrator {
        let mut builder = CouncilOrchestrator::builder();
        for provider in Provider::ALL {
            builder = builder.with_provider(Arc::new(MockProviderAdapter::new(
                provider,
                MockBehavior::Respond(response.to_string()),
            )));
        }
        builder.build()
    }

    fn full_credentials() -> CredentialMap {
        let mut creds = CredentialMap::new();
        for p in Provider::ALL {
            creds.insert(p.id(), "secret");
        }
        creds
    }

    #[tokio::test]
    async fn happy_path_returns_success_with_output() {
        let orchestrator = orchestrator_with_mocks("final artefact text");
        let input = RunInput::new("design an idempotent endpoint");
        let result = orchestrator.run(input, full_credentials(), Arc::new(NoopEventHandler)).await;
        assert_eq!(result.status, SessionStatus::Success);
        assert!(result.output.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn no_credentials_returns_error_result_not_panic() {
        let orchestrator = orchestrator_with_mocks("unused");
        let input = RunInput::new("anything");
        let result = orchestrator.run(input, CredentialMap::new(), Arc::new(NoopEventHandler)).await;
        assert_eq!(result.status, SessionStatus::Error);
        assert_eq!(result.error.unwrap().kind, ErrorKind::NoCredentials);
    }

    #[tokio::test]
    async fn session_status_reflects_terminal_outcome() {
        let orchestrator = orchestrator_with_mocks("output");
        let input = RunInput::new("q");
        let result = orchestrator.run(input, full_credentials(), Arc::new(NoopEventHandler)).await;
        assert_eq!(result.status, SessionStatus::Success);
    }

    #[tokio::test]
    async fn per_call_event_handler_only_sees_its_own_run() {
        let orchestrator = Arc::new(orchestrator_with_mocks("output"));
        let handler_a = Arc::new(RecordingEventHandler::new());
        let handler_b = Arc::new(RecordingEventHandler::new());

        let (result_a, result_b) = tokio::join!(
            orchestrator.run(RunInput::new("query a"), full_credentials(), handler_a.clone()),
            orchestrator.run(RunInput::new("query b"), full_credentials(), handler_b.clone()),
        );
        assert_eq!(result_a.status, SessionStatus::Success);
        assert_eq!(result_b.status, SessionStatus::Success);

        assert!(!handler_a.phase_events.lock().await.is_empty());
        assert!(!handler_b.phase_events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn observe_after_start_session_receives_events_for_that_session() {
        let orchestrator = Arc::new(orchestrator_with_mocks("output"));
        let input = RunInput::new("design something");
        let session_id = orchestrator.start_session(input, full_credentials()).await;

        let mut events = orchestrator.observe(session_id).await.unwrap();
        let first = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn start_session_returns_id_before_the_run_completes() {
        let mut builder = CouncilOrchestrator::builder();
        for provider in Provider::ALL {
            builder = builder.with_provider(Arc::new(
                MockProviderAdapter::new(provider, MockBehavior::Respond("slow output".into()))
                    .with_latency(std::time::Duration::from_millis(300)),
            ));
        }
        let orchestrator = Arc::new(builder.build());
        let input = RunInput::new("design something");

        let session_id = orchestrator.start_session(input, full_credentials()).await;

        // The background pipeline hasn't had time to reach a terminal state
        // yet, but the id is already usable against session_status/cancel.
        let snapshot = orchestrator.session_status(session_id).await;
        assert!(snapshot.is_some());

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let snapshot = orchestrator.session_status(session_id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Success);
    }

    #[tokio::test]
    async fn cancel_before_phase1_completes_yields_cancelled_session() {
        let mut builder = CouncilOrchestrator::builder();
        for provider in Provider::ALL {
            builder = builder.with_provider(Arc::new(
                MockProviderAdapter::new(provider, MockBehavior::Respond("slow output".into()))
                    .with_latency(std::time::Duration::from_millis(500)),
            ));
        }
        let orchestrator = Arc::new(builder.build());
        let input = RunInput::new("design something");

        let session_id = orchestrator.start_session(input, full_credentials()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        orchestrator.cancel(session_id).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(700)).await;
        let snapshot = orchestrator.session_status(session_id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Cancelled);
    }
}
