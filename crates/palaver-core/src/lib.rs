//! Domain layer for Palaver.
//!
//! Palaver coordinates long-running, concurrent agent turns
//! (Reasoning-Action-Loops) operating against shared, durable conversation
//! logs across isolated projects. This crate holds the domain models, the
//! persistence and search traits, and the pure leaf logic (prefix resolution,
//! RAL lifecycle state machine). It performs no I/O.

pub mod conversation;
pub mod error;
pub mod event;
pub mod prefix;
pub mod ral;
pub mod repository;
pub mod search;

// Re-export common error type
pub use error::{PalaverError, Result};
