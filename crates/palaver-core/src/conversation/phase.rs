//! Workflow phases and recorded phase transitions.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Coarse workflow stage a conversation is in.
///
/// Changed only via recorded transitions (see [`PhaseTransition`]), never by
/// direct assignment from callers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Phase {
    /// Free-form discussion, the initial phase
    #[default]
    Chat,
    /// Planning the work
    Plan,
    /// Executing the plan
    Execute,
    /// Verifying the produced work
    Verification,
    /// Cleanup work (commits, formatting, housekeeping)
    Chores,
    /// Post-work reflection
    Reflection,
}

/// One recorded phase change, kept in an append-only log so "why are we in
/// this phase" can always be reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase the conversation was in before the transition
    pub from: Phase,
    /// Phase the conversation moved to
    pub to: Phase,
    /// Human-readable reason for the transition
    pub message: String,
    /// When the transition happened (epoch seconds)
    pub timestamp: i64,
    /// Public key of the agent that requested the transition
    pub agent_pubkey: String,
    /// Display name of that agent
    pub agent_name: String,
}
