//! Event Bus: agent-level stage events and the phase-abstracted stream
//! projected from them.
//!
//! Two layers, mirroring the agent/orchestration event split used
//! elsewhere in this codebase:
//!
//! - [`AgentEvent`] — fine-grained stage events emitted by the Agent
//!   Executor for a single role invocation (`stage_start`, `stage_delta`,
//!   `stage_end`).
//! - [`PhaseEvent`] — the coarse, publicly-visible 5-phase projection the
//!   Phase Scheduler builds from `AgentEvent`s and pushes onto the bounded
//!   channel a caller subscribes to via `observe()`.
//!
//! [`EventHandler`] has no-op default methods so a caller (or a test) only
//! overrides what it cares about; it is shared via `Arc<dyn EventHandler>`.

use async_trait::async_trait;

use crate::error::ErrorKind;
use crate::model::{AbstractPhase, Role};

/// Fine-grained events emitted by the Agent Executor around one role
/// invocation.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Fired before the provider call for `role` begins.
    StageStart { role: Role },
    /// Fired as partial text becomes available. Implementations that don't
    /// stream provider output may emit this once with the full content.
    StageDelta { role: Role, delta_text: String },
    /// Fired when the invocation for `role` finishes, successfully or not.
    StageEnd {
        role: Role,
        latency_ms: u64,
        succeeded: bool,
        error_kind: Option<ErrorKind>,
    },
}

/// The publicly-visible, phase-abstracted event stream. This is what
/// `observe(session_id)` yields.
#[derive(Debug, Clone)]
pub enum PhaseEvent {
    PhaseStart {
        phase: AbstractPhase,
        step_index: usize,
        models_planned: Vec<String>,
    },
    PhaseDelta {
        phase: AbstractPhase,
        delta_text: String,
        model: Option<String>,
    },
    PhaseEnd {
        phase: AbstractPhase,
        latency_ms: u64,
        tokens_used: Option<u32>,
        model_info: Option<String>,
        council_summary: Option<String>,
    },
    FinalAnswerStart,
    FinalAnswerDelta {
        text: String,
    },
    FinalAnswerEnd {
        confidence: Confidence,
    },
    Error {
        kind: ErrorKind,
        message: String,
        phase: Option<AbstractPhase>,
    },
}

/// Coarse confidence label attached to `FinalAnswerEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Receives both layers of the event stream.
///
/// Both methods default to a no-op, so implementors only override what they
/// need — a progress bar only cares about `on_phase_event`, a debug logger
/// might want both.
///
/// # Thread Safety
///
/// `Send + Sync` so the handler can be shared via `Arc<dyn EventHandler>`
/// across the concurrent Phase 1 tasks.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_agent_event(&self, _event: &AgentEvent) {}
    async fn on_phase_event(&self, _event: &PhaseEvent) {}
}

/// An `EventHandler` that does nothing; the default handler when a caller
/// doesn't need observability.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}

/// Fans every event out to a fixed list of handlers, in order. Lets the
/// Facade attach its own bookkeeping (projecting events onto a session's
/// phase records) alongside whatever handler the caller supplied, without
/// either one knowing the other exists.
pub struct CompositeEventHandler {
    handlers: Vec<std::sync::Arc<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new(handlers: Vec<std::sync::Arc<dyn EventHandler>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl EventHandler for CompositeEventHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        for handler in &self.handlers {
            handler.on_agent_event(event).await;
        }
    }

    async fn on_phase_event(&self, event: &PhaseEvent) {
        for handler in &self.handlers {
            handler.on_phase_event(event).await;
        }
    }
}

/// Test/debug handler that records every event it receives, in arrival
/// order, behind a mutex. Grounded on the mock event-recording pattern used
/// throughout this codebase's test modules.
#[cfg(test)]
pub struct RecordingEventHandler {
    pub agent_events: tokio::sync::Mutex<Vec<AgentEvent>>,
    pub phase_events: tokio::sync::Mutex<Vec<PhaseEvent>>,
}

#[cfg(test)]
impl RecordingEventHandler {
    pub fn new() -> Self {
        Self {
            agent_events: tokio::sync::Mutex::new(Vec::new()),
            phase_events: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        self.agent_events.lock().await.push(event.clone());
    }

    async fn on_phase_event(&self, event: &PhaseEvent) {
        self.phase_events.lock().await.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_handler_accepts_any_event_without_panicking() {
        let handler = NoopEventHandler;
        handler
            .on_agent_event(&AgentEvent::StageStart {
                role: Role::Architect,
            })
            .await;
        handler
            .on_phase_event(&PhaseEvent::FinalAnswerStart)
            .await;
    }

    #[tokio::test]
    async fn recording_handler_preserves_arrival_order() {
        let handler = RecordingEventHandler::new();
        handler
            .on_phase_event(&PhaseEvent::PhaseStart {
                phase: AbstractPhase::Understand,
                step_index: 0,
                models_planned: vec![],
            })
            .await;
        handler
            .on_phase_event(&PhaseEvent::PhaseEnd {
                phase: AbstractPhase::Understand,
                latency_ms: 10,
                tokens_used: None,
                model_info: None,
                council_summary: None,
            })
            .await;
        let events = handler.phase_events.lock().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PhaseEvent::PhaseStart { .. }));
        assert!(matches!(events[1], PhaseEvent::PhaseEnd { .. }));
    }
}
