//! RAL (Reasoning-Action-Loop) lifecycle models.
//!
//! A RAL is one execution of an agent responding to a conversation; several
//! may be concurrently active in the same conversation. Entries are ephemeral
//! and in-memory only, owned by the RAL registry in the application layer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{PalaverError, Result};

/// Lifecycle state of a RAL, modelled as an explicit state machine rather
/// than implicit scheduler behavior.
///
/// Legal transitions:
///
/// ```text
/// Running -> Paused | Completed | Aborted
/// Paused  -> Resumed | Aborted
/// Resumed -> Paused | Completed | Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RalState {
    /// Actively executing
    Running,
    /// Suspended while a newer RAL in the same conversation negotiates
    Paused,
    /// Resumed after a pause; behaves like Running
    Resumed,
    /// Finished successfully
    Completed,
    /// Aborted by a coordinating RAL or by its owner
    Aborted,
}

impl RalState {
    /// Returns true when a transition to `next` is legal.
    pub fn can_transition_to(self, next: RalState) -> bool {
        use RalState::*;
        matches!(
            (self, next),
            (Running, Paused)
                | (Running, Completed)
                | (Running, Aborted)
                | (Paused, Resumed)
                | (Paused, Aborted)
                | (Resumed, Paused)
                | (Resumed, Completed)
                | (Resumed, Aborted)
        )
    }

    /// Running or Resumed.
    pub fn is_executing(self) -> bool {
        matches!(self, Self::Running | Self::Resumed)
    }

    /// Completed or Aborted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// A child delegation a RAL is currently waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelegation {
    /// ID of the delegated child conversation
    pub child_conversation_id: String,
    /// Public key of the agent running the child
    pub recipient_pubkey: String,
    /// Whether the delegation exposes a cancellation path
    pub cancellable: bool,
}

/// One concurrently-executing agent turn, tracked by the RAL registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RalEntry {
    /// Unique, monotonically increasing number scoped to the process
    pub ral_number: u64,
    /// Conversation this turn executes in
    pub conversation_id: String,
    /// Project the conversation belongs to
    pub project_id: String,
    /// Public key of the executing agent
    pub agent_pubkey: String,
    /// Whether the turn is currently streaming output
    pub is_streaming: bool,
    /// Tool currently being invoked, if any
    pub current_tool: Option<String>,
    /// All tools with an invocation in flight
    pub active_tools: HashSet<String>,
    /// Child delegations this turn is waiting on
    pub pending_delegations: Vec<PendingDelegation>,
    /// Messages queued for delivery when this turn next resumes
    pub queued_injections: Vec<String>,
    /// Lifecycle state
    pub state: RalState,
    /// When the turn started (epoch seconds)
    pub created_at: i64,
    /// Last time the turn streamed, called a tool, or was coordinated with
    /// (epoch seconds). Callers treat old values as stale; there is no
    /// background reaper.
    pub last_activity_at: i64,
    /// Per-process activity ordinal, bumped by the registry on every
    /// activity update. Orders entries whose second-resolution timestamps
    /// tie.
    #[serde(default)]
    pub activity_seq: u64,
}

impl RalEntry {
    /// Creates a running entry.
    pub fn new(
        ral_number: u64,
        conversation_id: impl Into<String>,
        project_id: impl Into<String>,
        agent_pubkey: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            ral_number,
            conversation_id: conversation_id.into(),
            project_id: project_id.into(),
            agent_pubkey: agent_pubkey.into(),
            is_streaming: false,
            current_tool: None,
            active_tools: HashSet::new(),
            pending_delegations: Vec::new(),
            queued_injections: Vec::new(),
            state: RalState::Running,
            created_at: now,
            last_activity_at: now,
            activity_seq: 0,
        }
    }

    /// Refreshes the activity timestamp.
    pub fn touch(&mut self, now: i64) {
        self.last_activity_at = now;
    }

    /// Whether callers should treat this entry as possibly dead.
    pub fn is_stale(&self, now: i64, threshold_secs: i64) -> bool {
        now - self.last_activity_at > threshold_secs
    }

    /// Moves the entry to `next`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for illegal state-machine moves.
    pub fn transition(&mut self, next: RalState, now: i64) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PalaverError::invalid_transition(
                self.state.to_string(),
                next.to_string(),
            ));
        }
        self.state = next;
        self.touch(now);
        Ok(())
    }

    /// Returns the reason this entry cannot be aborted, or `None` when an
    /// abort is permitted.
    ///
    /// A RAL mid-delegation without a cancellation path is non-abortable;
    /// the reason string must be surfaced to the coordinating RAL.
    pub fn abort_block_reason(&self) -> Option<String> {
        self.pending_delegations
            .iter()
            .find(|d| !d.cancellable)
            .map(|d| {
                format!(
                    "Delegation to '{}' (conversation {}) has no cancellation path",
                    d.recipient_pubkey, d.child_conversation_id
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RalEntry {
        RalEntry::new(1, "c".repeat(64), "project-a", "pk1", 100)
    }

    #[test]
    fn test_legal_lifecycle() {
        let mut e = entry();
        e.transition(RalState::Paused, 101).unwrap();
        e.transition(RalState::Resumed, 102).unwrap();
        e.transition(RalState::Completed, 103).unwrap();
        assert!(e.state.is_terminal());
        assert_eq!(e.last_activity_at, 103);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut e = entry();
        // Running -> Resumed is not legal
        assert!(e.transition(RalState::Resumed, 101).is_err());
        e.transition(RalState::Completed, 102).unwrap();
        // Terminal states accept nothing
        assert!(e.transition(RalState::Running, 103).is_err());
        assert!(e.transition(RalState::Paused, 103).is_err());
    }

    #[test]
    fn test_paused_cannot_complete_without_resume() {
        let mut e = entry();
        e.transition(RalState::Paused, 101).unwrap();
        assert!(e.transition(RalState::Completed, 102).is_err());
    }

    #[test]
    fn test_abort_block_reason() {
        let mut e = entry();
        assert_eq!(e.abort_block_reason(), None);

        e.pending_delegations.push(PendingDelegation {
            child_conversation_id: "d".repeat(64),
            recipient_pubkey: "child_pk".to_string(),
            cancellable: false,
        });
        let reason = e.abort_block_reason().unwrap();
        assert!(reason.contains("child_pk"));
        assert!(reason.contains("no cancellation path"));
    }

    #[test]
    fn test_staleness_check() {
        let e = entry();
        assert!(!e.is_stale(100 + 60, 120));
        assert!(e.is_stale(100 + 121, 120));
    }
}
