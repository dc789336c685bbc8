//! Session Manager: the concurrent map of externally addressable run
//! handles, plus background expiry of terminal sessions.
//!
//! Grounded on this codebase's preference for a plain `Arc<RwLock<HashMap>>`
//! over a sharded-map crate when the access pattern doesn't demand it: reads
//! (`observe`, `get`) vastly outnumber writes (`create`, the terminal
//! transition), which is exactly what `tokio::sync::RwLock` is for.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::error::{CouncilError, ErrorKind};
use crate::event::{AgentEvent, EventHandler, PhaseEvent};
use crate::model::{AbstractPhase, PhaseRecord, PhaseStatus, Session, SessionStatus};

/// Bound on the per-session event channel. `PhaseDelta` is the only variant
/// pushed with `try_send` (dropped on a full channel); every other variant
/// blocks the sender until the subscriber drains, so this only controls how
/// much delta backlog a slow subscriber can fall behind on.
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct SessionEntry {
    session: Session,
    cancel_tx: watch::Sender<bool>,
    event_tx: mpsc::Sender<PhaseEvent>,
    event_rx: Option<mpsc::Receiver<PhaseEvent>>,
}

/// Owns the session table and its garbage collector.
///
/// Cloning a `SessionManager` shares the same underlying table (it's an
/// `Arc` internally); the background GC task holds only a [`Weak`] reference
/// to that table so the manager can be dropped without the GC task keeping
/// it alive forever.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    ttl: Duration,
}

impl SessionManager {
    /// Build a manager and spawn its GC sweep, which runs every
    /// `gc_interval` and evicts terminal sessions older than `ttl`.
    pub fn new(ttl: Duration, gc_interval: Duration) -> Self {
        let sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>> = Arc::new(RwLock::new(HashMap::new()));
        let weak = Arc::downgrade(&sessions);
        tokio::spawn(gc_loop(weak, ttl, gc_interval));
        Self { sessions, ttl }
    }

    /// Register a new session in `Pending` status, returning its id and a
    /// cancellation receiver the Facade threads through the scheduler.
    pub async fn create(&self, org_scope: Option<String>) -> (Uuid, watch::Receiver<bool>) {
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let session = Session {
            id,
            created_at: Utc::now(),
            org_scope,
            status: SessionStatus::Pending,
            current_phase: None,
            execution_time_ms: None,
            output: None,
            error: None,
            cancel_requested: false,
            terminal_at: None,
            phase_records: AbstractPhase::ORDER.iter().map(|&phase| PhaseRecord::new_pending(phase)).collect(),
        };
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                session,
                cancel_tx,
                event_tx,
                event_rx: Some(event_rx),
            },
        );
        (id, cancel_rx)
    }

    /// Attach a subscriber to a session's phase-event stream. At most one
    /// subscriber may hold the receiver at a time; a second call on the same
    /// session (or a call after the receiver was already claimed) fails
    /// rather than silently handing out a second consumer of the same
    /// events.
    pub async fn observe(&self, id: Uuid) -> Result<mpsc::Receiver<PhaseEvent>, CouncilError> {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&id) else {
            return Err(CouncilError::new(ErrorKind::Internal, "unknown session id"));
        };
        entry
            .event_rx
            .take()
            .ok_or_else(|| CouncilError::new(ErrorKind::Internal, "session already has a subscriber"))
    }

    /// Mark a session as running, recording the phase it's currently in.
    pub async fn mark_running(&self, id: Uuid, phase: Option<AbstractPhase>) {
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.session.status = SessionStatus::Running;
            entry.session.current_phase = phase;
        }
    }

    /// Transition a session to its terminal state.
    pub async fn mark_terminal(
        &self,
        id: Uuid,
        status: SessionStatus,
        output: Option<String>,
        error: Option<String>,
        execution_time_ms: u64,
    ) {
        debug_assert!(status.is_terminal(), "mark_terminal called with a non-terminal status");
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.session.status = status;
            entry.session.output = output;
            entry.session.error = error;
            entry.session.execution_time_ms = Some(execution_time_ms);
            entry.session.terminal_at = Some(Utc::now());
        }
    }

    /// Snapshot a session's current state.
    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&id).map(|entry| entry.session.clone())
    }

    /// Request cooperative cancellation of a running session. Returns an
    /// error if the session is unknown or already terminal.
    pub async fn cancel(&self, id: Uuid) -> Result<(), CouncilError> {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&id) else {
            return Err(CouncilError::new(ErrorKind::Internal, "unknown session id"));
        };
        if entry.session.status.is_terminal() {
            return Err(CouncilError::new(ErrorKind::Internal, "session is already terminal"));
        }
        entry.session.cancel_requested = true;
        let _ = entry.cancel_tx.send(true);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Fold one `PhaseEvent` into the matching `PhaseRecord` of a session,
    /// mirroring what the Event Bus just broadcast into the durable,
    /// poll-friendly session record, then forward the event onto the
    /// session's subscriber channel (if any). The sender is cloned and the
    /// table lock released before the push, so a subscriber that's slow to
    /// drain `send().await` can never stall `get`/`mark_running`/etc. on
    /// other sessions.
    async fn apply_phase_event(&self, id: Uuid, event: &PhaseEvent) {
        let event_tx = {
            let mut sessions = self.sessions.write().await;
            let Some(entry) = sessions.get_mut(&id) else {
                return;
            };
            let now = Utc::now();
            apply_to_record(&mut entry.session.phase_records, event, now);
            entry.event_tx.clone()
        };

        match event {
            // Dropped rather than backed up: a lagging subscriber should see
            // the next delta, not stall the phase that's producing them.
            PhaseEvent::PhaseDelta { .. } => {
                let _ = event_tx.try_send(event.clone());
            }
            // Every other variant is load-bearing for a subscriber
            // reconstructing phase/session state, so it's never dropped.
            _ => {
                let _ = event_tx.send(event.clone()).await;
            }
        }
    }
}

fn apply_to_record(records: &mut [PhaseRecord], event: &PhaseEvent, now: chrono::DateTime<Utc>) {
    match event {
        PhaseEvent::PhaseStart { phase, .. } => {
            if let Some(record) = find_record(records, *phase) {
                record.status = PhaseStatus::Running;
                record.started_at = Some(now);
            }
        }
        PhaseEvent::PhaseDelta { phase, delta_text, model } => {
            if let Some(record) = find_record(records, *phase) {
                record.preview_text.push_str(delta_text);
                if model.is_some() {
                    record.model_info = model.clone();
                }
            }
        }
        PhaseEvent::PhaseEnd {
            phase,
            latency_ms,
            model_info,
            council_summary,
            ..
        } => {
            if let Some(record) = find_record(records, *phase) {
                record.status = PhaseStatus::Completed;
                record.ended_at = Some(now);
                record.latency_ms = Some(*latency_ms);
                if model_info.is_some() {
                    record.model_info = model_info.clone();
                }
                record.council_summary = council_summary.clone();
            }
        }
        PhaseEvent::Error { phase: Some(phase), .. } => {
            if let Some(record) = find_record(records, *phase) {
                record.status = PhaseStatus::Failed;
                record.ended_at = Some(now);
            }
        }
        _ => {}
    }
}

fn find_record(records: &mut [PhaseRecord], phase: AbstractPhase) -> Option<&mut PhaseRecord> {
    records.iter_mut().find(|r| r.phase == phase)
}

/// An `EventHandler` that projects the phase-abstracted event stream onto
/// one session's `phase_records`, so a caller polling `session_status`
/// instead of subscribing to events still sees up-to-date per-phase state.
///
/// Kept separate from `SessionManager` itself (rather than having the Phase
/// Scheduler depend on it directly) so the scheduler stays unaware of
/// session storage; the Facade composes this alongside the caller's own
/// handler via [`crate::event::CompositeEventHandler`].
pub struct SessionPhaseRecorder {
    sessions: SessionManager,
    session_id: Uuid,
}

impl SessionPhaseRecorder {
    pub fn new(sessions: SessionManager, session_id: Uuid) -> Self {
        Self { sessions, session_id }
    }
}

#[async_trait::async_trait]
impl EventHandler for SessionPhaseRecorder {
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    async fn on_phase_event(&self, event: &PhaseEvent) {
        self.sessions.apply_phase_event(self.session_id, event).await;
    }
}

async fn gc_loop(table: Weak<RwLock<HashMap<Uuid, SessionEntry>>>, ttl: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Some(table) = table.upgrade() else {
            // The owning SessionManager was dropped; nothing left to sweep.
            return;
        };
        let now = Utc::now();
        let mut sessions = table.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| match entry.session.terminal_at {
            Some(terminal_at) => {
                let age = now.signed_duration_since(terminal_at);
                age.to_std().map(|age| age < ttl).unwrap_or(true)
            }
            None => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            log::debug!("session gc: evicted {evicted} expired session(s), {} remaining", sessions.len());
        }
    }
}
