//! Delegation markers: child conversations spawned from a parent.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{PalaverError, Result};

/// Terminal-or-pending status of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DelegationStatus {
    /// The child conversation is still being worked
    Pending,
    /// The child conversation finished successfully
    Completed,
    /// The child conversation was aborted
    Aborted,
}

impl DelegationStatus {
    /// Returns true for `Completed` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// A history entry recording that a child conversation was spawned from this
/// one. Created atomically with the delegating call and resolved exactly once
/// on the terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationMarker {
    /// ID of the spawned child conversation
    pub child_conversation_id: String,
    /// Public key of the agent the work was handed to
    pub recipient_pubkey: String,
    /// ID of the parent conversation, kept for validating a direct
    /// parent/child relationship on resolution
    pub parent_conversation_id: String,
    /// Current status
    pub status: DelegationStatus,
    /// When the delegation was created (epoch seconds)
    pub created_at: i64,
    /// When the delegation reached a terminal status, if it has
    pub resolved_at: Option<i64>,
}

impl DelegationMarker {
    /// Creates a pending marker.
    pub fn new(
        child_conversation_id: impl Into<String>,
        recipient_pubkey: impl Into<String>,
        parent_conversation_id: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            child_conversation_id: child_conversation_id.into(),
            recipient_pubkey: recipient_pubkey.into(),
            parent_conversation_id: parent_conversation_id.into(),
            status: DelegationStatus::Pending,
            created_at,
            resolved_at: None,
        }
    }

    /// Moves the marker to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the marker is already terminal or the
    /// requested status is not terminal — a marker resolves exactly once.
    pub fn resolve(&mut self, outcome: DelegationStatus, resolved_at: i64) -> Result<()> {
        if !outcome.is_terminal() {
            return Err(PalaverError::invalid_transition(
                self.status.to_string(),
                outcome.to_string(),
            ));
        }
        if self.status.is_terminal() {
            return Err(PalaverError::invalid_transition(
                self.status.to_string(),
                outcome.to_string(),
            ));
        }
        self.status = outcome;
        self.resolved_at = Some(resolved_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> DelegationMarker {
        DelegationMarker::new("c".repeat(64), "child_agent", "p".repeat(64), 100)
    }

    #[test]
    fn test_resolve_once() {
        let mut m = marker();
        m.resolve(DelegationStatus::Completed, 200).unwrap();
        assert_eq!(m.status, DelegationStatus::Completed);
        assert_eq!(m.resolved_at, Some(200));
    }

    #[test]
    fn test_second_resolution_rejected() {
        let mut m = marker();
        m.resolve(DelegationStatus::Aborted, 200).unwrap();
        let err = m.resolve(DelegationStatus::Completed, 300).unwrap_err();
        assert!(matches!(err, PalaverError::InvalidTransition { .. }));
        // First outcome untouched
        assert_eq!(m.status, DelegationStatus::Aborted);
        assert_eq!(m.resolved_at, Some(200));
    }

    #[test]
    fn test_resolving_to_pending_rejected() {
        let mut m = marker();
        assert!(m.resolve(DelegationStatus::Pending, 200).is_err());
        assert_eq!(m.status, DelegationStatus::Pending);
    }
}
