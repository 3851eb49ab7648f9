//! Execution sessions.
//!
//! A session tracks one running script from start to its terminal state.
//! The first terminal transition wins: once a session is Completed,
//! Faulted or Cancelled, nothing moves it again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use super::cancel::CancelSignal;
use crate::engine::InvocationOutcome;

/// Unique, never reused session identifier (32 lowercase hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Running,
    Completed(Value),
    Faulted(String),
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed(_) => "completed",
            Self::Faulted(_) => "faulted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<InvocationOutcome> for SessionStatus {
    fn from(outcome: InvocationOutcome) -> Self {
        match outcome {
            InvocationOutcome::Completed(value) => Self::Completed(value),
            InvocationOutcome::Faulted(text) => Self::Faulted(text),
            InvocationOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Point-in-time view of a session, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// One run of a compiled script.
pub struct ExecutionSession {
    id: SessionId,
    signal: CancelSignal,
    status: Arc<watch::Sender<SessionStatus>>,
    started_at: Instant,
}

impl ExecutionSession {
    /// Start observing `computation`, which runs the script.
    ///
    /// The observer task records the computation's outcome as the terminal
    /// state unless a cancellation got there first. Must be called within
    /// a tokio runtime.
    pub fn start<F>(id: SessionId, signal: CancelSignal, computation: F) -> Self
    where
        F: Future<Output = InvocationOutcome> + Send + 'static,
    {
        let (tx, _rx) = watch::channel(SessionStatus::Running);
        let status = Arc::new(tx);

        let observer_status = Arc::clone(&status);
        let observer_id = id.clone();
        tokio::spawn(async move {
            let outcome = computation.await;
            let next = SessionStatus::from(outcome);
            let label = next.label();
            if transition(&observer_status, next) {
                tracing::debug!(session = %observer_id, status = label, "session finished");
            }
        });

        Self {
            id,
            signal,
            status,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    pub fn is_success(&self) -> bool {
        matches!(*self.status.borrow(), SessionStatus::Completed(_))
    }

    pub fn result(&self) -> Option<Value> {
        match &*self.status.borrow() {
            SessionStatus::Completed(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match &*self.status.borrow() {
            SessionStatus::Faulted(text) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Request cancellation and mark the session Cancelled right away.
    ///
    /// Returns `false` if the session had already reached a terminal state,
    /// in which case that state is kept.
    pub fn cancel(&self) -> bool {
        self.signal.cancel();
        let moved = transition(&self.status, SessionStatus::Cancelled);
        if moved {
            tracing::info!(session = %self.id, "session cancelled");
        }
        moved
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait(&self) -> SessionStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(SessionStatus::is_terminal).await {
            Ok(status) => status.clone(),
            // The sender lives in `self`, so this only happens mid-teardown.
            Err(_) => self.status(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.status();
        SessionSnapshot {
            id: self.id.clone(),
            status: status.label(),
            result: match &status {
                SessionStatus::Completed(value) => Some(value.clone()),
                _ => None,
            },
            error: match &status {
                SessionStatus::Faulted(text) => Some(text.clone()),
                _ => None,
            },
            elapsed_ms: self.elapsed().as_millis() as u64,
        }
    }
}

impl fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("id", &self.id)
            .field("status", &self.status.borrow().label())
            .finish_non_exhaustive()
    }
}

/// Move to `next` unless a terminal state was already recorded.
fn transition(status: &watch::Sender<SessionStatus>, next: SessionStatus) -> bool {
    status.send_if_modified(|current| {
        if current.is_terminal() {
            false
        } else {
            *current = next;
            true
        }
    })
}
