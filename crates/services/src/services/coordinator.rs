//! Admission control for agent runs.
//!
//! Two limits are enforced under one lock so the decision is atomic: a
//! global ceiling on simultaneous runs, and at most one in-flight run per
//! conversation. Rejected requests are dropped, never queued; the chat user
//! retries by sending another message. The per-conversation check runs
//! first: a thread that is already being worked on should hear "still
//! running", not "busy", even when the ceiling is also reached.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("all {0} agent slots are busy")]
    Busy(usize),
    #[error("a run is already in progress for this conversation")]
    AlreadyRunning,
}

#[derive(Default, Debug)]
struct CoordinatorState {
    running: usize,
    active: HashSet<String>,
}

#[derive(Clone, Debug)]
pub struct RunCoordinator {
    ceiling: usize,
    state: Arc<Mutex<CoordinatorState>>,
}

impl RunCoordinator {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        }
    }

    /// Try to admit a run for `conversation_id`.
    ///
    /// On success the returned permit holds both the global slot and the
    /// conversation's single-flight marker until it is dropped.
    pub fn admit(&self, conversation_id: &str) -> Result<RunPermit, AdmissionError> {
        let mut state = self.state.lock();
        if state.active.contains(conversation_id) {
            return Err(AdmissionError::AlreadyRunning);
        }
        if state.running >= self.ceiling {
            return Err(AdmissionError::Busy(self.ceiling));
        }
        state.running += 1;
        state.active.insert(conversation_id.to_string());
        Ok(RunPermit {
            coordinator: self.clone(),
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.state.lock().active.contains(conversation_id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.state.lock().active.iter().cloned().collect()
    }

    fn release(&self, conversation_id: &str) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        state.active.remove(conversation_id);
    }
}

/// One global run slot plus the conversation's single-flight marker.
///
/// Dropping the permit releases both, exactly once, on every exit path,
/// including setup failure and panic unwinding in the worker.
#[derive(Debug)]
pub struct RunPermit {
    coordinator: RunCoordinator,
    conversation_id: String,
}

impl RunPermit {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.coordinator.release(&self.conversation_id);
    }
}
