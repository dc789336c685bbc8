//! Global configuration for the orchestrator.
//!
//! Mirrors the minimal, manually-constructed configuration pattern used
//! elsewhere in this codebase: a plain struct with a `Default` impl, no
//! TOML/YAML/env-var parsing dependency. All per-run policy still flows in
//! through `RunInput`; this struct only holds defaults the Facade falls
//! back on when a run doesn't override them.

use std::time::Duration;

use crate::model::Provider;

/// Rate-limit and concurrency defaults for one provider.
#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    pub rps: f64,
    pub burst: u32,
    pub concurrency: usize,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            rps: 2.0,
            burst: 4,
            concurrency: 3,
        }
    }
}

/// Default deadlines for the overall run and each of the three phases.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineConfig {
    pub overall: Duration,
    pub phase1: Duration,
    pub phase2: Duration,
    pub phase3: Duration,
}

impl Default for DeadlineConfig {
    /// 180s overall, 60s/30s/60s per phase, matching the defaults named in
    /// the phase scheduler's design.
    fn default() -> Self {
        Self {
            overall: Duration::from_secs(180),
            phase1: Duration::from_secs(60),
            phase2: Duration::from_secs(30),
            phase3: Duration::from_secs(60),
        }
    }
}

/// Top-level configuration for a `CouncilOrchestrator`.
///
/// # Example
///
/// ```rust
/// use council_orchestrator::CouncilConfig;
///
/// let config = CouncilConfig::default();
/// assert_eq!(config.session_ttl, std::time::Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone)]
pub struct CouncilConfig {
    /// Default deadlines applied when a `RunInput` doesn't override them.
    pub deadlines: DeadlineConfig,
    /// Per-provider rate/concurrency defaults, keyed by provider.
    pub pacer_defaults: [(Provider, PacerConfig); 4],
    /// How long a terminal session is kept before the GC sweep evicts it.
    pub session_ttl: Duration,
    /// How often the session GC sweep runs.
    pub session_gc_interval: Duration,
    /// Maximum number of runs allowed to execute concurrently.
    pub max_in_flight_runs: usize,
    /// Context Pack token budget (approximate, word-count based).
    pub context_pack_token_budget: usize,
    /// Whether the Query Classifier may use an LLM-assisted second opinion.
    pub enable_llm_assisted_classification: bool,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            deadlines: DeadlineConfig::default(),
            pacer_defaults: crate::provider::registry::pacer_configs(),
            session_ttl: Duration::from_secs(3600),
            session_gc_interval: Duration::from_secs(60),
            max_in_flight_runs: 64,
            context_pack_token_budget: 250,
            enable_llm_assisted_classification: false,
        }
    }
}

impl CouncilConfig {
    pub fn pacer_config_for(&self, provider: Provider) -> PacerConfig {
        self.pacer_defaults
            .iter()
            .find(|(p, _)| *p == provider)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }
}
