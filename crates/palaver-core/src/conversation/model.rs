//! Conversation domain model.
//!
//! This module contains the core Conversation entity: the unit of durable
//! state the rest of the system coordinates around.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::delegation::{DelegationMarker, DelegationStatus};
use super::execution_time::ExecutionTime;
use super::message::{ConversationMessage, HistoryEntry};
use super::metadata::{ConversationData, ConversationMetadata};
use super::phase::{Phase, PhaseTransition};
use super::todo::TodoItem;
use crate::error::{PalaverError, Result};

/// How far one agent has read the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentState {
    /// Index of the last history entry this agent has processed
    pub last_processed_message_index: usize,
}

/// The unit of durable state: one conversation with its full history,
/// per-agent read cursors, todos, phase log, and execution-time accounting.
///
/// `history` is append-only and is the only structure read to reconstruct
/// context for an agent. Entries are never mutated in place or reordered;
/// the single exception is resolving a pending [`DelegationMarker`] to its
/// terminal status, which happens exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Content-derived identifier (64 lowercase hex characters), immutable
    pub id: String,
    /// Short human label
    pub title: String,
    /// Current workflow phase
    #[serde(default)]
    pub phase: Phase,
    /// Append-only ordered history, the single source of truth
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Per-agent read cursors, keyed by agent pubkey
    #[serde(default)]
    pub agent_states: HashMap<String, AgentState>,
    /// Per-agent todo lists, keyed by agent pubkey
    #[serde(default)]
    pub agent_todos: HashMap<String, Vec<TodoItem>>,
    /// Agents currently forbidden from executing in this conversation
    #[serde(default)]
    pub blocked_agents: HashSet<String>,
    /// Append-only log of phase changes
    #[serde(default)]
    pub phase_transitions: Vec<PhaseTransition>,
    /// Accumulated active-work time
    #[serde(default)]
    pub execution_time: ExecutionTime,
    /// Free-form but schema-validated metadata bag
    #[serde(default)]
    pub metadata: ConversationData,
    /// Creation timestamp (epoch seconds)
    pub created_at: i64,
    /// Last-update timestamp (epoch seconds)
    pub updated_at: i64,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            phase: Phase::default(),
            history: Vec::new(),
            agent_states: HashMap::new(),
            agent_todos: HashMap::new(),
            blocked_agents: HashSet::new(),
            phase_transitions: Vec::new(),
            execution_time: ExecutionTime::default(),
            metadata: ConversationData::default(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Appends a message to the history.
    ///
    /// Duplicates are never rejected here; idempotent use is the caller's
    /// responsibility.
    pub fn append_message(&mut self, message: ConversationMessage, now: i64) {
        self.history.push(HistoryEntry::Message(message));
        self.updated_at = now;
    }

    /// Appends a delegation marker to the history.
    pub fn append_delegation(&mut self, marker: DelegationMarker, now: i64) {
        self.history.push(HistoryEntry::Delegation(marker));
        self.updated_at = now;
    }

    /// Resolves the pending delegation marker for `child_conversation_id` to
    /// a terminal status. Exactly-once: a marker that is already terminal is
    /// rejected with `InvalidTransition`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no marker exists for the child conversation.
    pub fn resolve_delegation(
        &mut self,
        child_conversation_id: &str,
        outcome: DelegationStatus,
        now: i64,
    ) -> Result<()> {
        let marker = self
            .history
            .iter_mut()
            .find_map(|entry| match entry {
                HistoryEntry::Delegation(d)
                    if d.child_conversation_id == child_conversation_id =>
                {
                    Some(d)
                }
                _ => None,
            })
            .ok_or_else(|| {
                PalaverError::not_found("delegation", child_conversation_id.to_string())
            })?;
        marker.resolve(outcome, now)?;
        self.updated_at = now;
        Ok(())
    }

    /// Records a phase change in the append-only transition log and moves the
    /// conversation to the new phase.
    pub fn transition_phase(
        &mut self,
        to: Phase,
        message: impl Into<String>,
        agent_pubkey: impl Into<String>,
        agent_name: impl Into<String>,
        now: i64,
    ) {
        let transition = PhaseTransition {
            from: self.phase,
            to,
            message: message.into(),
            timestamp: now,
            agent_pubkey: agent_pubkey.into(),
            agent_name: agent_name.into(),
        };
        self.phase_transitions.push(transition);
        self.phase = to;
        self.updated_at = now;
    }

    /// Iterates the plain messages in the history, with their entry indices.
    pub fn messages(&self) -> impl Iterator<Item = (usize, &ConversationMessage)> {
        self.history
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.as_message().map(|m| (i, m)))
    }

    /// Builds the registry-level listing projection.
    pub fn to_metadata(&self, archived: bool) -> ConversationMetadata {
        ConversationMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            phase: self.phase,
            event_count: self.history.len(),
            agent_count: self.agent_states.len(),
            archived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InboundEvent;

    fn msg(content: &str, created_at: i64) -> ConversationMessage {
        let event = InboundEvent::new("e".repeat(64), "pk1", content, created_at);
        ConversationMessage::from_event(&event, false)
    }

    #[test]
    fn test_history_is_append_only() {
        let mut conv = Conversation::new("a".repeat(64), "test", 0);
        for i in 0..10 {
            let before: Vec<_> = conv.history.clone();
            conv.append_message(msg(&format!("m{}", i), i), i);
            assert_eq!(conv.history.len(), before.len() + 1);
            // Prior entries untouched
            assert_eq!(&conv.history[..before.len()], &before[..]);
        }
    }

    #[test]
    fn test_duplicate_messages_are_not_rejected() {
        let mut conv = Conversation::new("a".repeat(64), "test", 0);
        conv.append_message(msg("same", 1), 1);
        conv.append_message(msg("same", 1), 1);
        assert_eq!(conv.history.len(), 2);
    }

    #[test]
    fn test_phase_transition_is_recorded() {
        let mut conv = Conversation::new("a".repeat(64), "test", 0);
        conv.transition_phase(Phase::Plan, "start planning", "pk1", "planner", 5);
        assert_eq!(conv.phase, Phase::Plan);
        assert_eq!(conv.phase_transitions.len(), 1);
        assert_eq!(conv.phase_transitions[0].from, Phase::Chat);
        assert_eq!(conv.phase_transitions[0].to, Phase::Plan);
    }

    #[test]
    fn test_resolve_delegation_exactly_once() {
        let mut conv = Conversation::new("p".repeat(64), "parent", 0);
        let marker = DelegationMarker::new("c".repeat(64), "child_pk", "p".repeat(64), 1);
        conv.append_delegation(marker, 1);

        conv.resolve_delegation(&"c".repeat(64), DelegationStatus::Completed, 2)
            .unwrap();
        let err = conv
            .resolve_delegation(&"c".repeat(64), DelegationStatus::Aborted, 3)
            .unwrap_err();
        assert!(matches!(err, PalaverError::InvalidTransition { .. }));
    }

    #[test]
    fn test_resolve_unknown_delegation_is_not_found() {
        let mut conv = Conversation::new("p".repeat(64), "parent", 0);
        let err = conv
            .resolve_delegation("missing", DelegationStatus::Completed, 1)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_metadata_projection() {
        let mut conv = Conversation::new("a".repeat(64), "test", 0);
        conv.append_message(msg("hi", 1), 1);
        conv.agent_states.insert(
            "pk1".to_string(),
            AgentState {
                last_processed_message_index: 0,
            },
        );
        let meta = conv.to_metadata(false);
        assert_eq!(meta.event_count, 1);
        assert_eq!(meta.agent_count, 1);
        assert!(!meta.archived);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut conv = Conversation::new("a".repeat(64), "round trip", 0);
        conv.append_message(msg("first", 1), 1);
        conv.transition_phase(Phase::Execute, "go", "pk1", "exec", 2);
        conv.execution_time.start(3);

        let json = serde_json::to_string_pretty(&conv).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conv);
    }
}
