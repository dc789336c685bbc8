//! Phase Scheduler: the three-phase state machine (parallel specialists,
//! synthesis, judgement) projected into the public 5-phase event stream.
//!
//! This is the core of the core: it owns fan-out/fan-in for Phase 1, owns
//! phase ordering and task lifetimes, and is the only component that
//! mutates `PhaseRecord`s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::DeadlineConfig;
use crate::error::{CouncilError, ErrorKind};
use crate::event::{Confidence, EventHandler, PhaseEvent};
use crate::executor::AgentExecutor;
use crate::model::{
    AbstractPhase, ContextPack, CredentialMap, DeadlineOverrides, InvocationResult, InvocationStatus, OutputMode,
    Provider, Role,
};
use crate::prompts::PromptProvider;

/// Policy for Phase 1 when fewer than 5 of the 5 specialists succeed.
///
/// Defaults to `Proceed`, matching the explicit endorsement in the source
/// behaviour this was distilled from; `AbortBelow` is available for callers
/// operating under a stricter quality regime.
#[derive(Debug, Clone, Copy)]
pub enum PartialSpecialistPolicy {
    Proceed,
    AbortBelow(usize),
}

impl Default for PartialSpecialistPolicy {
    fn default() -> Self {
        PartialSpecialistPolicy::Proceed
    }
}

/// Internal state machine, matching the diagram in the component design
/// exactly. Transitions outside the ones `advance` permits are a scheduler
/// bug, not a possible external input, hence the `panic` rather than a
/// `Result` in `advance`'s callers within this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Init,
    P1Running,
    P1Done,
    P2Running,
    P2Done,
    P3Running,
    P3Done,
    Finalized,
    Aborted,
}

impl RunState {
    fn advance(self, to: RunState) -> RunState {
        use RunState::*;
        let legal = matches!(
            (self, to),
            (Init, P1Running)
                | (P1Running, P1Done)
                | (P1Done, P2Running)
                | (P2Running, P2Done)
                | (P2Done, P3Running)
                | (P3Running, P3Done)
                | (P3Done, Finalized)
                | (_, Aborted)
        );
        debug_assert!(legal, "illegal run state transition {self:?} -> {to:?}");
        to
    }
}

/// Per-run execution context threaded through all three phases.
pub struct RunContext<'a> {
    pub query: &'a str,
    pub context_pack: &'a ContextPack,
    pub credentials: &'a CredentialMap,
    pub preferred_providers: &'a HashMap<Role, Provider>,
    pub deadlines: DeadlineOverrides,
    pub output_mode: OutputMode,
    /// Whether partial Phase-1 success should note the missing specialist
    /// perspectives in the judge's ContextPack (`RunInput::enable_quality_directive`).
    pub enable_quality_directive: bool,
    pub cancel_rx: watch::Receiver<bool>,
}

/// Result of running the full three-phase pipeline.
pub struct SchedulerOutcome {
    pub phase_outputs: HashMap<Role, String>,
    pub provider_used_per_role: HashMap<Role, Provider>,
    pub final_artefact: String,
}

pub struct PhaseScheduler {
    pub executor: Arc<AgentExecutor>,
    pub prompts: Arc<dyn PromptProvider>,
    pub event_handler: Arc<dyn EventHandler>,
    pub defaults: DeadlineConfig,
    pub partial_policy: PartialSpecialistPolicy,
}

impl PhaseScheduler {
    fn deadline(&self, overridden: Option<u64>, fallback: Duration) -> Duration {
        overridden.map(Duration::from_millis).unwrap_or(fallback)
    }

    fn is_cancelled(cancel_rx: &watch::Receiver<bool>) -> bool {
        *cancel_rx.borrow()
    }

    async fn emit(&self, event: PhaseEvent) {
        self.event_handler.on_phase_event(&event).await;
    }

    /// Run the full pipeline. Returns `Ok` with the final artefact and
    /// per-role outputs on success, or `Err(CouncilError)` if any phase
    /// aborted the run.
    pub async fn run(&self, ctx: RunContext<'_>) -> Result<SchedulerOutcome, CouncilError> {
        let mut state = RunState::Init;

        if Self::is_cancelled(&ctx.cancel_rx) {
            state.advance(RunState::Aborted);
            return Err(CouncilError::cancelled());
        }

        state = state.advance(RunState::P1Running);
        let phase1_deadline = self.deadline(ctx.deadlines.phase1_ms, self.defaults.phase1);
        let phase1_results = self.run_phase1(&ctx, phase1_deadline).await?;
        state = state.advance(RunState::P1Done);

        if Self::is_cancelled(&ctx.cancel_rx) {
            state.advance(RunState::Aborted);
            return Err(CouncilError::cancelled());
        }

        let succeeded_count = phase1_results.values().filter(|r| r.status == InvocationStatus::Ok).count();
        log::info!("phase 1 complete: {succeeded_count}/{} specialists succeeded", Role::SPECIALISTS.len());
        if succeeded_count == 0 {
            state.advance(RunState::Aborted);
            let err = CouncilError::new(ErrorKind::Phase1Empty, "zero of five specialists succeeded")
                .with_phase(AbstractPhase::Understand);
            self.emit(PhaseEvent::Error {
                kind: err.kind,
                message: err.message.clone(),
                phase: err.phase,
            })
            .await;
            return Err(err);
        }
        if let PartialSpecialistPolicy::AbortBelow(min) = self.partial_policy {
            if succeeded_count < min {
                state.advance(RunState::Aborted);
                let err = CouncilError::new(
                    ErrorKind::Phase1Empty,
                    format!("only {succeeded_count} of 5 specialists succeeded, below required minimum {min}"),
                )
                .with_phase(AbstractPhase::Understand);
                return Err(err);
            }
        }

        let mut context_pack = ctx.context_pack.clone();
        note_partial_success(&mut context_pack, succeeded_count, Role::SPECIALISTS.len(), ctx.enable_quality_directive);

        state = state.advance(RunState::P2Running);
        let phase2_deadline = self.deadline(ctx.deadlines.phase2_ms, self.defaults.phase2);
        let synth_result = self
            .run_sequential_phase(&ctx, AbstractPhase::Crosscheck, Role::Synthesizer, phase2_deadline, || {
                render_specialist_transcript(&phase1_results, &context_pack, ctx.query)
            })
            .await;
        let synth_result = match synth_result {
            Ok(r) => r,
            Err(err) => {
                state.advance(RunState::Aborted);
                let err = CouncilError::new(ErrorKind::SynthesisFailed, err.message).with_phase(AbstractPhase::Crosscheck);
                self.emit(PhaseEvent::Error {
                    kind: err.kind,
                    message: err.message.clone(),
                    phase: err.phase,
                })
                .await;
                return Err(err);
            }
        };
        state = state.advance(RunState::P2Done);

        if Self::is_cancelled(&ctx.cancel_rx) {
            state.advance(RunState::Aborted);
            return Err(CouncilError::cancelled());
        }

        state = state.advance(RunState::P3Running);
        self.emit(PhaseEvent::FinalAnswerStart).await;
        let phase3_deadline = self.deadline(ctx.deadlines.phase3_ms, self.defaults.phase3);
        let include_raw_transcripts = matches!(ctx.output_mode, OutputMode::FullTranscript);
        let judge_result = self
            .run_sequential_phase(&ctx, AbstractPhase::Synthesize, Role::Judge, phase3_deadline, || {
                render_judge_input(&synth_result.content, &context_pack, ctx.query, include_raw_transcripts.then_some(&phase1_results))
            })
            .await;
        let judge_result = match judge_result {
            Ok(r) => r,
            Err(err) => {
                state.advance(RunState::Aborted);
                let err = CouncilError::new(ErrorKind::JudgementFailed, err.message).with_phase(AbstractPhase::Synthesize);
                self.emit(PhaseEvent::Error {
                    kind: err.kind,
                    message: err.message.clone(),
                    phase: err.phase,
                })
                .await;
                return Err(err);
            }
        };
        let _ = state.advance(RunState::P3Done).advance(RunState::Finalized);

        self.emit(PhaseEvent::FinalAnswerDelta {
            text: judge_result.content.clone(),
        })
        .await;
        self.emit(PhaseEvent::FinalAnswerEnd {
            confidence: confidence_for(succeeded_count),
        })
        .await;

        let mut phase_outputs: HashMap<Role, String> = phase1_results
            .iter()
            .map(|(role, result)| (*role, result.content.clone()))
            .collect();
        phase_outputs.insert(Role::Synthesizer, synth_result.content.clone());
        phase_outputs.insert(Role::Judge, judge_result.content.clone());

        let mut provider_used_per_role: HashMap<Role, Provider> = phase1_results
            .iter()
            .map(|(role, result)| (*role, result.provider_used))
            .collect();
        provider_used_per_role.insert(Role::Synthesizer, synth_result.provider_used);
        provider_used_per_role.insert(Role::Judge, judge_result.provider_used);

        Ok(SchedulerOutcome {
            phase_outputs,
            provider_used_per_role,
            final_artefact: judge_result.content,
        })
    }

    /// Launch the five specialist roles concurrently and project their
    /// completion into `phase_start`/`phase_delta`/`phase_end` for each of
    /// the three Phase-1-mapped abstract phases (`understand`, `research`,
    /// `reason_refine`). `reason_refine` coalesces three internal roles
    /// into a single public record.
    async fn run_phase1(
        &self,
        ctx: &RunContext<'_>,
        deadline: Duration,
    ) -> Result<HashMap<Role, InvocationResult>, CouncilError> {
        for phase in [AbstractPhase::Understand, AbstractPhase::Research, AbstractPhase::ReasonRefine] {
            self.emit(PhaseEvent::PhaseStart {
                phase,
                step_index: phase.step_index(),
                models_planned: vec![],
            })
            .await;
        }

        let mut handles = Vec::new();
        for role in Role::SPECIALISTS {
            let executor = self.executor.clone();
            let system_prompt = self.prompts.system_prompt(role);
            let user_prompt = format!("{}\n\n{}", ctx.context_pack.render(), ctx.query);
            let preferred = ctx.preferred_providers.get(&role).copied();
            let credentials_clone = clone_credentials_for_task(ctx.credentials);
            let mut task_cancel_rx = ctx.cancel_rx.clone();
            handles.push(tokio::spawn(async move {
                let result = executor
                    .execute(
                        role,
                        system_prompt,
                        user_prompt,
                        1024,
                        preferred,
                        &credentials_clone,
                        deadline,
                        Some(&mut task_cancel_rx),
                    )
                    .await;
                (role, result)
            }));
        }

        let mut results: HashMap<Role, InvocationResult> = HashMap::new();
        let mut remaining: HashMap<AbstractPhase, usize> = HashMap::new();
        remaining.insert(AbstractPhase::Understand, 1);
        remaining.insert(AbstractPhase::Research, 1);
        remaining.insert(AbstractPhase::ReasonRefine, 3);
        let mut phase_latency: HashMap<AbstractPhase, u64> = HashMap::new();

        let mut handles = handles.into_iter();
        while let Some(handle) = handles.next() {
            if Self::is_cancelled(&ctx.cancel_rx) {
                handle.abort();
                for remaining_handle in handles.by_ref() {
                    remaining_handle.abort();
                }
                return Err(CouncilError::cancelled());
            }

            let (role, outcome) = match handle.await {
                Ok(pair) => pair,
                Err(_join_err) => continue,
            };

            let abstract_phase = role.abstract_phase();
            let invocation_result = match outcome {
                Ok(result) => {
                    self.emit(PhaseEvent::PhaseDelta {
                        phase: abstract_phase,
                        delta_text: result.content.clone(),
                        model: Some(result.model_used.clone()),
                    })
                    .await;
                    phase_latency
                        .entry(abstract_phase)
                        .and_modify(|l| *l = (*l).max(result.latency_ms))
                        .or_insert(result.latency_ms);
                    result
                }
                Err(err) => InvocationResult {
                    content: String::new(),
                    provider_used: ctx
                        .preferred_providers
                        .get(&role)
                        .copied()
                        .unwrap_or(Provider::OpenAiFamily),
                    model_used: String::new(),
                    input_tokens: 0,
                    output_tokens: 0,
                    latency_ms: 0,
                    status: InvocationStatus::Failed,
                    error_kind: Some(err.kind),
                },
            };
            results.insert(role, invocation_result);

            if let Some(count) = remaining.get_mut(&abstract_phase) {
                *count -= 1;
                if *count == 0 {
                    self.emit(PhaseEvent::PhaseEnd {
                        phase: abstract_phase,
                        latency_ms: phase_latency.get(&abstract_phase).copied().unwrap_or(0),
                        tokens_used: None,
                        model_info: None,
                        council_summary: None,
                    })
                    .await;
                }
            }
        }

        Ok(results)
    }

    /// Run a single sequential role (synthesizer or judge) and project it
    /// onto its one-to-one abstract phase.
    async fn run_sequential_phase(
        &self,
        ctx: &RunContext<'_>,
        phase: AbstractPhase,
        role: Role,
        deadline: Duration,
        build_prompt: impl FnOnce() -> String,
    ) -> Result<InvocationResult, CouncilError> {
        self.emit(PhaseEvent::PhaseStart {
            phase,
            step_index: phase.step_index(),
            models_planned: vec![],
        })
        .await;

        let started = Instant::now();
        let system_prompt = self.prompts.system_prompt(role);
        let user_prompt = build_prompt();
        let preferred = ctx.preferred_providers.get(&role).copied();

        let mut cancel_rx = ctx.cancel_rx.clone();
        let result = self
            .executor
            .execute(
                role,
                system_prompt,
                user_prompt,
                2048,
                preferred,
                ctx.credentials,
                deadline,
                Some(&mut cancel_rx),
            )
            .await?;

        self.emit(PhaseEvent::PhaseDelta {
            phase,
            delta_text: result.content.clone(),
            model: Some(result.model_used.clone()),
        })
        .await;
        self.emit(PhaseEvent::PhaseEnd {
            phase,
            latency_ms: started.elapsed().as_millis() as u64,
            tokens_used: Some(result.output_tokens),
            model_info: Some(result.model_used.clone()),
            council_summary: None,
        })
        .await;

        Ok(result)
    }
}

/// Appends the missing-perspectives note to `pack.open_questions` when
/// Phase 1 ran short and the caller has opted into the quality directive
/// (`RunInput::enable_quality_directive`); a no-op on full success or when
/// the directive is disabled.
fn note_partial_success(pack: &mut ContextPack, succeeded: usize, total: usize, enabled: bool) {
    if succeeded < total && enabled {
        pack.open_questions
            .push(format!("{succeeded} of {total} specialist perspectives are missing from this run"));
    }
}

fn confidence_for(succeeded_specialists: usize) -> Confidence {
    match succeeded_specialists {
        5 => Confidence::High,
        3 | 4 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

fn render_specialist_transcript(results: &HashMap<Role, InvocationResult>, pack: &ContextPack, query: &str) -> String {
    let mut out = String::new();
    out.push_str(&pack.render());
    out.push_str("\nORIGINAL QUERY: ");
    out.push_str(query);
    out.push_str("\n\nSPECIALIST OUTPUTS:\n");
    for role in Role::SPECIALISTS {
        if let Some(result) = results.get(&role) {
            out.push_str(&format!("--- {role} ---\n{}\n\n", result.content));
        }
    }
    out
}

fn render_judge_input(
    synthesized: &str,
    pack: &ContextPack,
    query: &str,
    raw_transcripts: Option<&HashMap<Role, InvocationResult>>,
) -> String {
    let mut out = format!("{}\nORIGINAL QUERY: {}\n\nSYNTHESIZED DRAFT:\n{}", pack.render(), query, synthesized);
    if let Some(results) = raw_transcripts {
        out.push_str("\n\nRAW SPECIALIST TRANSCRIPTS:\n");
        for role in Role::SPECIALISTS {
            if let Some(result) = results.get(&role) {
                out.push_str(&format!("--- {role} ---\n{}\n\n", result.content));
            }
        }
    }
    out
}

/// `CredentialMap` zeroes itself on drop and intentionally doesn't
/// implement `Clone`; each spawned task needs its own read-only view, so we
/// build a short-lived copy for the task's lifetime rather than sharing a
/// reference across an `'static` spawn boundary.
fn clone_credentials_for_task(source: &CredentialMap) -> CredentialMap {
    let mut copy = CredentialMap::new();
    for provider_id in source.providers() {
        if let Some(value) = source.get(provider_id) {
            copy.insert(provider_id, value);
        }
    }
    copy
}
