//! Persistence adapter trait.
//!
//! The store's durable surface is defined here, in the shared crate, so the
//! registry depends only on this interface and concrete implementations
//! depend on the core instead of the reverse.

use async_trait::async_trait;

use crate::conversation::{Conversation, ConversationMetadata, MetadataCriteria};
use crate::error::Result;

/// Durable storage of one JSON document per conversation plus a per-project
/// metadata index.
///
/// Implementations must serialize metadata-index updates: concurrent `save`,
/// `archive`, and `restore` calls for different conversations in the same
/// project contend for the same index file, and both writers must survive.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Persists the full conversation document and refreshes its metadata
    /// index entry.
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Loads a conversation document.
    ///
    /// Returns `Ok(None)` both for a missing document and for one that fails
    /// schema validation (logged and treated as not-found so one bad file
    /// cannot take down the registry).
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Removes the document and its metadata-index entry.
    async fn delete(&self, conversation_id: &str) -> Result<()>;

    /// Lists metadata projections for every known conversation.
    async fn list(&self) -> Result<Vec<ConversationMetadata>>;

    /// Filters the metadata index without loading conversation documents.
    async fn search(&self, criteria: &MetadataCriteria) -> Result<Vec<ConversationMetadata>>;

    /// Moves the document into the archive area and marks it archived.
    /// No-op when the conversation is already archived or unknown.
    async fn archive(&self, conversation_id: &str) -> Result<()>;

    /// Moves an archived document back into the live area.
    /// No-op when the conversation is not archived.
    async fn restore(&self, conversation_id: &str) -> Result<()>;

    /// Whether a live (non-archived) document exists for this ID.
    async fn exists(&self, conversation_id: &str) -> Result<bool>;
}
