//! Inbound event types and conversation ID validation.
//!
//! Events arrive from an external, already-authenticated source. The core
//! never signs or verifies them; it only appends them to conversation
//! histories and indexes them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Length of a full conversation ID in hex characters.
pub const FULL_ID_LEN: usize = 64;

/// Length of the accepted short-form conversation ID prefix.
pub const PREFIX_ID_LEN: usize = 12;

static FULL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid full-id regex"));

static PREFIX_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{12}$").expect("valid prefix-id regex"));

/// Returns true if `s` is a well-formed full conversation ID
/// (64 lowercase hex characters).
pub fn is_full_id(s: &str) -> bool {
    FULL_ID_RE.is_match(s)
}

/// Returns true if `s` is a well-formed short-form conversation ID
/// (12 lowercase hex characters).
///
/// Distinguishes "not a prefix at all" from "prefix not indexed":
/// lookup code must check this before consulting the prefix index.
pub fn is_prefix_id(s: &str) -> bool {
    PREFIX_ID_RE.is_match(s)
}

/// An immutable inbound event delivered by the external event source.
///
/// The `id` of the event that opens a conversation becomes the conversation ID
/// (content-derived, 64 lowercase hex characters). Events are already
/// authenticated by the time they reach the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Content-derived event identifier (64 lowercase hex characters)
    pub id: String,
    /// Public key of the author (agent or user)
    pub pubkey: String,
    /// Message content
    pub content: String,
    /// Creation timestamp (epoch seconds)
    pub created_at: i64,
    /// Free-form tag lists carried by the wire format
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

impl InboundEvent {
    /// Creates a new event with no tags.
    pub fn new(
        id: impl Into<String>,
        pubkey: impl Into<String>,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            pubkey: pubkey.into(),
            content: content.into(),
            created_at,
            tags: Vec::new(),
        }
    }
}
