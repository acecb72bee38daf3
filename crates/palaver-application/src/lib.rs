//! Application layer for Palaver.
//!
//! This crate coordinates between the domain model and the storage
//! infrastructure: per-conversation stores, the per-project registry with
//! ambient project scoping, and the in-process registry of executing agent
//! turns.

pub mod project;
pub mod ral;
pub mod registry;
pub mod store;

pub use project::{current_project, with_project};
pub use ral::{RalHandle, RalRegistry};
pub use registry::{ConversationRegistry, ProjectHandle};
pub use store::ConversationStore;
