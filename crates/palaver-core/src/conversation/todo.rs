//! Per-agent todo lists.

use serde::{Deserialize, Serialize};

/// Status of a single todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not started yet
    Pending,
    /// Currently being worked
    InProgress,
    /// Finished
    Done,
    /// Deliberately skipped
    Skipped,
}

/// One item in an agent's todo list.
///
/// The "at most one `InProgress` item per agent" rule is a caller convention,
/// not enforced here; the store logs a warning when it is broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Short description of the work
    pub content: String,
    /// Current status
    pub status: TodoStatus,
    /// Display-order tie break
    pub position: usize,
}

impl TodoItem {
    /// Creates a pending item at the given position.
    pub fn new(content: impl Into<String>, position: usize) -> Self {
        Self {
            content: content.into(),
            status: TodoStatus::Pending,
            position,
        }
    }
}
