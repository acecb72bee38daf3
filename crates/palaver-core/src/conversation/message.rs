//! Conversation history entries.
//!
//! The history is the single source of truth for everything that happened in
//! a conversation: append-only, never mutated in place, never reordered.

use serde::{Deserialize, Serialize};

use super::delegation::DelegationMarker;
use crate::event::InboundEvent;

/// A single message in a conversation history, stored in the string form the
/// external event serializer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// ID of the originating event (64 lowercase hex characters)
    pub event_id: String,
    /// Public key of the author
    pub pubkey: String,
    /// Message content
    pub content: String,
    /// Creation timestamp of the originating event (epoch seconds)
    pub created_at: i64,
    /// Whether the author was an agent (as opposed to a user)
    pub is_from_agent: bool,
}

impl ConversationMessage {
    /// Builds a history message from an inbound event.
    pub fn from_event(event: &InboundEvent, is_from_agent: bool) -> Self {
        Self {
            event_id: event.id.clone(),
            pubkey: event.pubkey.clone(),
            content: event.content.clone(),
            created_at: event.created_at,
            is_from_agent,
        }
    }
}

/// One entry in a conversation history.
///
/// Most entries are plain messages; a delegation marker records that a child
/// conversation was spawned from this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    /// A regular message appended from an inbound event
    Message(ConversationMessage),
    /// A child-conversation delegation marker
    Delegation(DelegationMarker),
}

impl HistoryEntry {
    /// Returns the inner message, if this entry is one.
    pub fn as_message(&self) -> Option<&ConversationMessage> {
        match self {
            Self::Message(m) => Some(m),
            Self::Delegation(_) => None,
        }
    }

    /// Returns the inner delegation marker, if this entry is one.
    pub fn as_delegation(&self) -> Option<&DelegationMarker> {
        match self {
            Self::Message(_) => None,
            Self::Delegation(d) => Some(d),
        }
    }
}
