//! Search index trait definition.

use async_trait::async_trait;

use crate::error::Result;
use crate::search::{SearchQuery, SearchResultItem};

/// Rebuildable, debounced, per-project full-text index over conversation
/// messages, covering all conversations on disk, not just cached ones.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Executes a structured query against the index.
    ///
    /// The result set is capped at `limit`; an unbounded scan is never
    /// returned to a caller.
    async fn search(&self, query: &SearchQuery, limit: usize) -> Result<Vec<SearchResultItem>>;

    /// Requests an incremental re-index of one conversation.
    ///
    /// Bursts within the debounce window are coalesced; the update is folded
    /// in lazily on the next query once the window has elapsed.
    async fn trigger_update(&self, conversation_id: &str);

    /// Full rescan from the source conversation files. Expensive; meant for
    /// recovery, not the steady-state path.
    ///
    /// Returns the number of conversations indexed.
    async fn rebuild(&self) -> Result<usize>;
}
