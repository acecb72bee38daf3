//! Conversation domain: the durable unit of state and its parts.

pub mod delegation;
pub mod execution_time;
pub mod message;
pub mod metadata;
pub mod model;
pub mod phase;
pub mod todo;

pub use delegation::{DelegationMarker, DelegationStatus};
pub use execution_time::{ExecutionTime, STALE_SESSION_SECS};
pub use message::{ConversationMessage, HistoryEntry};
pub use metadata::{ConversationData, ConversationMetadata, MetadataCriteria};
pub use model::{AgentState, Conversation};
pub use phase::{Phase, PhaseTransition};
pub use todo::{TodoItem, TodoStatus};
