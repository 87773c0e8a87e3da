/// Session Channel - best-effort event delivery
///
/// Maps a session id to the mailbox of a live client connection.
/// Nothing is queued for sessions that are not connected: events for an
/// unknown or closed session go to the local log and are dropped.
/// A connected client that stops reading loses events once its mailbox fills.

use assay_common::types::JobEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Events buffered per session before new ones are dropped
pub const SESSION_BUFFER: usize = 1024;

pub type EventReceiver = mpsc::Receiver<JobEvent>;

#[derive(Debug, Clone, Default)]
pub struct SessionHub {
    sessions: Arc<RwLock<HashMap<String, mpsc::Sender<JobEvent>>>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live recipient. Re-registering an id replaces the old mailbox.
    pub fn register(&self, session_id: impl Into<String>) -> EventReceiver {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        self.sessions.write().insert(session_id.into(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .get(session_id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the event reached a live mailbox
    pub fn publish(&self, session_id: &str, event: JobEvent) -> bool {
        let sender = self.sessions.read().get(session_id).cloned();
        match sender {
            Some(tx) => match tx.try_send(event) {
                Ok(()) => true,
                // Slow reader: drop the event, keep the session
                Err(TrySendError::Full(_)) => false,
                Err(TrySendError::Closed(_)) => {
                    self.sessions.write().remove(session_id);
                    false
                }
            },
            None => false,
        }
    }
}

/// Per-job event emitter bound to an optional session
#[derive(Debug, Clone)]
pub struct Publisher {
    hub: SessionHub,
    session: Option<String>,
    job_id: String,
}

impl Publisher {
    pub fn new(hub: SessionHub, session: Option<String>, job_id: impl Into<String>) -> Self {
        Self {
            hub,
            session: session.filter(|s| !s.is_empty()),
            job_id: job_id.into(),
        }
    }

    /// Publisher with no client; everything goes to the local log
    pub fn detached(job_id: impl Into<String>) -> Self {
        Self::new(SessionHub::new(), None, job_id)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        if !self.deliver(JobEvent::Log(line.clone())) {
            info!(target: "assay::job", job_id = %self.job_id, "{}", line);
        }
    }

    pub fn progress(&self, phase: &str, percent: u8, message: &str) {
        self.deliver(JobEvent::Progress {
            phase: phase.to_string(),
            percent,
            message: message.to_string(),
        });
        self.log(format!("[{}] {}", phase.to_uppercase(), message));
    }

    pub fn result(&self, payload: serde_json::Value) {
        if !self.deliver(JobEvent::Result(payload)) {
            info!(target: "assay::job", job_id = %self.job_id, "result ready");
        }
    }

    pub fn done(&self, code: i32, error: Option<String>) {
        self.deliver(JobEvent::Done { code, error });
    }

    fn deliver(&self, event: JobEvent) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let kind = event.kind();
        let delivered = self.hub.publish(session, event);
        if !delivered {
            debug!(job_id = %self.job_id, session = %session, kind, "event not delivered");
        }
        delivered
    }
}
