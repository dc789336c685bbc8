//! Closed error taxonomy for the orchestrator.
//!
//! Every fallible operation in this crate resolves to one of the [`ErrorKind`]
//! variants below, wrapped in a [`CouncilError`] that carries enough context
//! (a human-readable message and, where known, the phase in which the error
//! occurred) for callers and the event bus to report it without inspecting
//! internals. No `thiserror`/`anyhow` is used; `Display`/`Error` are hand
//! written, matching the rest of the crate's error types.

use std::fmt;

use crate::model::AbstractPhase;

/// The exhaustive, closed set of error kinds the orchestrator can surface.
///
/// `RunResult::error_kind` and the terminal `error` event both carry one of
/// these. Adding a new kind is a breaking change for any caller that matches
/// exhaustively on it; that is intentional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No provider credentials were supplied at all.
    NoCredentials,
    /// Every candidate provider for a role was exhausted without success.
    NoProvider,
    /// A provider rejected the credential presented to it.
    Unauthorized,
    /// A provider signalled it is rate limiting the caller.
    RateLimited,
    /// A provider or its transport is unavailable (5xx, connection failure).
    Unavailable,
    /// A deadline elapsed before a result was produced.
    Timeout,
    /// A provider response could not be parsed.
    InvalidResponse,
    /// The run or invocation was cancelled cooperatively.
    Cancelled,
    /// Zero of five specialists produced output in Phase 1.
    Phase1Empty,
    /// The synthesizer invocation failed.
    SynthesisFailed,
    /// The judge invocation failed.
    JudgementFailed,
    /// Quality gate evaluation itself failed (not the same as gates failing).
    ValidationFailed,
    /// An invariant was violated; indicates a bug rather than bad input.
    Internal,
}

impl ErrorKind {
    /// The stable wire identifier used in `RunResult.error_kind` and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoCredentials => "no_credentials",
            ErrorKind::NoProvider => "no_provider",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Phase1Empty => "phase1_empty",
            ErrorKind::SynthesisFailed => "synthesis_failed",
            ErrorKind::JudgementFailed => "judgement_failed",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Internal => "internal",
        }
    }

    /// Transient kinds the Agent Executor retries or falls back on.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contextualised error: the kind plus a message and, when known, the
/// phase the error happened in.
///
/// This is the type every public async fn in this crate returns in its
/// `Result`'s error position.
#[derive(Debug, Clone)]
pub struct CouncilError {
    pub kind: ErrorKind,
    pub message: String,
    pub phase: Option<AbstractPhase>,
}

impl CouncilError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            phase: None,
        }
    }

    /// Attach the abstract phase this error occurred in (builder style).
    pub fn with_phase(mut self, phase: AbstractPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn no_credentials() -> Self {
        Self::new(ErrorKind::NoCredentials, "no provider credentials supplied")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run was cancelled")
    }
}

impl fmt::Display for CouncilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Some(phase) => write!(f, "{} ({}): {}", self.kind, phase.as_str(), self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for CouncilError {}

impl From<ErrorKind> for CouncilError {
    fn from(kind: ErrorKind) -> Self {
        let message = kind.as_str().to_string();
        Self {
            kind,
            message,
            phase: None,
        }
    }
}

pub type CouncilResult<T> = Result<T, CouncilError>;
