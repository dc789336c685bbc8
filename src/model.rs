//! Core data types shared by every component: roles, providers, invocation
//! records, phase records, context packs, quality scores, and sessions.
//!
//! These are plain value types; behaviour lives in the modules that own
//! them (`pacer`, `scheduler`, `validator`, `session`, ...).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A named perspective invoked once per run.
///
/// The first five are the Phase 1 specialists; `Synthesizer` and `Judge`
/// run sequentially in Phase 2 and Phase 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Architect,
    DataEngineer,
    Researcher,
    RedTeamer,
    Optimizer,
    Synthesizer,
    Judge,
}

impl Role {
    /// The five roles that run concurrently in Phase 1, in a fixed order.
    pub const SPECIALISTS: [Role; 5] = [
        Role::Architect,
        Role::Researcher,
        Role::DataEngineer,
        Role::RedTeamer,
        Role::Optimizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::DataEngineer => "data_engineer",
            Role::Researcher => "researcher",
            Role::RedTeamer => "red_teamer",
            Role::Optimizer => "optimizer",
            Role::Synthesizer => "synthesizer",
            Role::Judge => "judge",
        }
    }

    /// The abstract, publicly-visible phase this role's work is projected onto.
    pub fn abstract_phase(&self) -> AbstractPhase {
        match self {
            Role::Architect => AbstractPhase::Understand,
            Role::Researcher => AbstractPhase::Research,
            Role::DataEngineer | Role::Optimizer | Role::RedTeamer => AbstractPhase::ReasonRefine,
            Role::Synthesizer => AbstractPhase::Crosscheck,
            Role::Judge => AbstractPhase::Synthesize,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The public, 5-stage projection of the internal 3-phase pipeline.
///
/// `data_engineer`, `optimizer`, and `red_teamer` all project onto
/// [`AbstractPhase::ReasonRefine`] — three internal roles, one visible
/// `PhaseRecord`. See the scheduler module for how their deltas are
/// coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbstractPhase {
    Understand,
    Research,
    ReasonRefine,
    Crosscheck,
    Synthesize,
}

impl AbstractPhase {
    pub const ORDER: [AbstractPhase; 5] = [
        AbstractPhase::Understand,
        AbstractPhase::Research,
        AbstractPhase::ReasonRefine,
        AbstractPhase::Crosscheck,
        AbstractPhase::Synthesize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AbstractPhase::Understand => "understand",
            AbstractPhase::Research => "research",
            AbstractPhase::ReasonRefine => "reason_refine",
            AbstractPhase::Crosscheck => "crosscheck",
            AbstractPhase::Synthesize => "synthesize",
        }
    }

    /// 0-based position in the canonical 5-phase order.
    pub fn step_index(&self) -> usize {
        Self::ORDER.iter().position(|p| p == self).unwrap()
    }
}

impl fmt::Display for AbstractPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closed-set LLM backend family. New backends are added by extending
/// this enum and registering defaults in `provider::registry`, not by
/// introducing a duck-typed trait object hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    OpenAiFamily,
    GeminiFamily,
    PerplexityFamily,
    KimiFamily,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAiFamily,
        Provider::GeminiFamily,
        Provider::PerplexityFamily,
        Provider::KimiFamily,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAiFamily => "openai",
            Provider::GeminiFamily => "gemini",
            Provider::PerplexityFamily => "perplexity",
            Provider::KimiFamily => "kimi",
        }
    }

    pub fn from_id(id: &str) -> Option<Provider> {
        Provider::ALL.into_iter().find(|p| p.id() == id)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-run credential map: `Provider` identifier -> opaque secret string.
///
/// Values are best-effort zeroed on drop. This is not cryptographic erasure
/// (the allocator may have already copied the backing bytes elsewhere); it
/// closes the obvious window where a `CredentialMap` sitting in a dropped
/// stack frame would otherwise still show plaintext secrets in a core dump
/// taken shortly after.
#[derive(Default)]
pub struct CredentialMap {
    inner: HashMap<String, String>,
}

impl CredentialMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider_id: impl Into<String>, credential: impl Into<String>) {
        self.inner.insert(provider_id.into(), credential.into());
    }

    pub fn get(&self, provider_id: &str) -> Option<&str> {
        self.inner.get(provider_id).map(|s| s.as_str())
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.inner.contains_key(provider_id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|s| s.as_str())
    }

    /// Drop every entry, overwriting its bytes first. Safe to call more
    /// than once.
    pub fn clear(&mut self) {
        for (_, value) in self.inner.iter_mut() {
            zero_string(value);
        }
        self.inner.clear();
    }
}

impl fmt::Debug for CredentialMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMap")
            .field("providers", &self.inner.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for CredentialMap {
    fn drop(&mut self) {
        self.clear();
    }
}

fn zero_string(s: &mut String) {
    // SAFETY: we only write ASCII NUL bytes into the string's existing
    // byte buffer, never change its length, so the result stays valid
    // UTF-8 (a run of 0x00 bytes is valid UTF-8).
    unsafe {
        for b in s.as_bytes_mut() {
            *b = 0;
        }
    }
}

/// Immutable request record handed to the Agent Executor / Provider Adapter.
#[derive(Debug, Clone)]
pub struct ModelInvocation {
    pub role: Role,
    pub provider: Provider,
    pub model_name: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_completion_tokens: u32,
    pub deadline: Duration,
}

/// Outcome of one `ModelInvocation`.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub content: String,
    pub provider_used: Provider,
    pub model_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub status: InvocationStatus,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Ok,
    Failed,
}

/// Status of a single `PhaseRecord` within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Mutable per-phase bookkeeping, owned exclusively by the Phase Scheduler
/// for the duration of a run. The Event Bus only ever sees immutable
/// snapshots cloned from these.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub phase: AbstractPhase,
    pub step_index: usize,
    pub status: PhaseStatus,
    pub preview_text: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub model_info: Option<String>,
    pub council_summary: Option<String>,
}

impl PhaseRecord {
    pub fn new_pending(phase: AbstractPhase) -> Self {
        Self {
            phase,
            step_index: phase.step_index(),
            status: PhaseStatus::Pending,
            preview_text: String::new(),
            started_at: None,
            ended_at: None,
            latency_ms: None,
            model_info: None,
            council_summary: None,
        }
    }
}

/// Output contract extracted from the caller's request: what the final
/// artefact must contain structurally.
#[derive(Debug, Clone, Default)]
pub struct OutputContract {
    pub required_headings: Vec<String>,
    pub file_count: Option<usize>,
    pub format: Option<String>,
}

/// The allowed/forbidden term sets enforced by Gate B.
#[derive(Debug, Clone, Default)]
pub struct LexiconLock {
    pub allowed_terms: Vec<String>,
    pub forbidden_terms: Vec<String>,
    pub strict: bool,
}

/// Canonical, size-bounded state block injected into every agent
/// invocation. Construction is the responsibility of `context_pack::build`.
#[derive(Debug, Clone, Default)]
pub struct ContextPack {
    pub goal: String,
    pub locked_decisions: Vec<String>,
    pub glossary: Vec<String>,
    pub open_questions: Vec<String>,
    pub output_contract: OutputContract,
    pub style_rules: Vec<String>,
    pub lexicon_lock: LexiconLock,
}

impl ContextPack {
    /// Render the pack as the compact textual block every agent prompt
    /// embeds. Kept separate from the struct so the rendering format can
    /// change without touching construction/truncation logic.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("GOAL: ");
        out.push_str(&self.goal);
        out.push('\n');
        if !self.locked_decisions.is_empty() {
            out.push_str("LOCKED DECISIONS:\n");
            for d in &self.locked_decisions {
                out.push_str("- ");
                out.push_str(d);
                out.push('\n');
            }
        }
        if !self.glossary.is_empty() {
            out.push_str("GLOSSARY:\n");
            for g in &self.glossary {
                out.push_str("- ");
                out.push_str(g);
                out.push('\n');
            }
        }
        if !self.open_questions.is_empty() {
            out.push_str("OPEN QUESTIONS:\n");
            for q in &self.open_questions {
                out.push_str("- ");
                out.push_str(q);
                out.push('\n');
            }
        }
        if !self.output_contract.required_headings.is_empty() {
            out.push_str("REQUIRED HEADINGS: ");
            out.push_str(&self.output_contract.required_headings.join(", "));
            out.push('\n');
        }
        if !self.style_rules.is_empty() {
            out.push_str("STYLE RULES:\n");
            for r in &self.style_rules {
                out.push_str("- ");
                out.push_str(r);
                out.push('\n');
            }
        }
        out
    }
}

/// Scored quality report produced once per run by the Quality Validator.
#[derive(Debug, Clone)]
pub struct QualityScore {
    pub substance: f32,
    pub completeness: f32,
    pub depth: f32,
    pub accuracy: f32,
    pub overall: f32,
    pub gate_passed: bool,
    pub violations: Vec<String>,
}

/// Status of a `Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Success | SessionStatus::Error | SessionStatus::Cancelled
        )
    }
}

/// The externally addressable handle for one run.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: uuid::Uuid,
    pub created_at: DateTime<Utc>,
    pub org_scope: Option<String>,
    pub status: SessionStatus,
    pub current_phase: Option<AbstractPhase>,
    pub execution_time_ms: Option<u64>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub terminal_at: Option<DateTime<Utc>>,
    /// One record per abstract phase, created eagerly (all `Pending`) when
    /// the session is registered and mutated in place as the Phase
    /// Scheduler progresses through the run.
    pub phase_records: Vec<PhaseRecord>,
}

/// Which content the Facade assembles into the final artefact and
/// `RunResult.phase_outputs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    DeliverableOnly,
    DeliverableOwnership,
    Audit,
    FullTranscript,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::DeliverableOnly => "deliverable-only",
            OutputMode::DeliverableOwnership => "deliverable-ownership",
            OutputMode::Audit => "audit",
            OutputMode::FullTranscript => "full-transcript",
        }
    }
}

/// Per-phase and overall deadline overrides for one run.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineOverrides {
    pub overall_ms: Option<u64>,
    pub phase1_ms: Option<u64>,
    pub phase2_ms: Option<u64>,
    pub phase3_ms: Option<u64>,
}

impl Default for DeadlineOverrides {
    fn default() -> Self {
        Self {
            overall_ms: None,
            phase1_ms: None,
            phase2_ms: None,
            phase3_ms: None,
        }
    }
}

/// Caller-supplied fragments merged into the built `ContextPack`.
#[derive(Debug, Clone, Default)]
pub struct ContextPackFragments {
    pub goal: Option<String>,
    pub locked_decisions: Vec<String>,
    pub glossary: Vec<String>,
    pub open_questions: Vec<String>,
    pub output_contract: Option<OutputContract>,
    pub style_rules: Vec<String>,
    pub lexicon_lock: Option<LexiconLock>,
}

/// The Facade's entry point argument.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub query: String,
    pub output_mode: OutputMode,
    pub complexity_override: Option<u8>,
    pub preferred_providers: HashMap<Role, Provider>,
    pub context_pack_fragments: ContextPackFragments,
    pub enable_validation: bool,
    pub enable_quality_directive: bool,
    pub deadlines: DeadlineOverrides,
}

impl RunInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            output_mode: OutputMode::DeliverableOnly,
            complexity_override: None,
            preferred_providers: HashMap::new(),
            context_pack_fragments: ContextPackFragments::default(),
            enable_validation: true,
            enable_quality_directive: true,
            deadlines: DeadlineOverrides::default(),
        }
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_complexity_override(mut self, level: u8) -> Self {
        self.complexity_override = Some(level);
        self
    }

    pub fn with_preferred_provider(mut self, role: Role, provider: Provider) -> Self {
        self.preferred_providers.insert(role, provider);
        self
    }
}

/// The Facade's terminal return value; always returned, even on failure.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: SessionStatus,
    pub output: Option<String>,
    pub phase_outputs: HashMap<Role, String>,
    pub execution_time_ms: u64,
    pub provider_used_per_role: HashMap<Role, Provider>,
    pub quality_scores: Option<QualityScore>,
    pub error: Option<CouncilErrorSummary>,
}

/// A flattened, `Clone`-friendly summary of a `CouncilError` suitable for
/// embedding in a `RunResult` (the full error type carries an `AbstractPhase`
/// which is already reflected in `phase`).
#[derive(Debug, Clone)]
pub struct CouncilErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
    pub phase: Option<AbstractPhase>,
}

impl From<crate::error::CouncilError> for CouncilErrorSummary {
    fn from(e: crate::error::CouncilError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
            phase: e.phase,
        }
    }
}
