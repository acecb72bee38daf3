//! Short-prefix resolution for conversation IDs.
//!
//! Maps a 12-hex-char prefix to the full 64-hex-char conversation ID, backed
//! by an append-only in-memory index built incrementally as conversations are
//! created. Conversations created before the index existed only become
//! prefix-resolvable once they are touched again (no retroactive backfill).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{PalaverError, Result};
use crate::event::{is_full_id, is_prefix_id, PREFIX_ID_LEN};

/// O(1)-ish prefix-to-full-ID index.
///
/// Thread-safe; `add` is idempotent and called at conversation-creation time
/// only.
#[derive(Debug, Default)]
pub struct PrefixResolver {
    index: RwLock<HashMap<String, String>>,
}

impl PrefixResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a full conversation ID under its 12-char prefix.
    ///
    /// Re-adding the same ID is a no-op. When two distinct IDs share a
    /// prefix, the first registration wins and the collision is logged.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when `full_id` is not a well-formed 64-hex ID.
    pub fn add(&self, full_id: &str) -> Result<()> {
        if !is_full_id(full_id) {
            return Err(PalaverError::internal(format!(
                "Cannot index malformed conversation ID: '{}'",
                full_id
            )));
        }
        let prefix = full_id[..PREFIX_ID_LEN].to_string();
        let mut index = self
            .index
            .write()
            .map_err(|_| PalaverError::internal("Prefix index lock poisoned"))?;
        match index.get(&prefix) {
            Some(existing) if existing != full_id => {
                tracing::warn!(
                    prefix = %prefix,
                    "Prefix collision: keeping first-registered conversation ID"
                );
            }
            Some(_) => {}
            None => {
                index.insert(prefix, full_id.to_string());
            }
        }
        Ok(())
    }

    /// Resolves a 12-char prefix to the full conversation ID.
    ///
    /// Returns `None` both for prefixes that were never indexed and for
    /// malformed input (anything that is not exactly 12 lowercase hex
    /// characters) — resolution never raises.
    pub fn resolve(&self, prefix: &str) -> Option<String> {
        if !is_prefix_id(prefix) {
            return None;
        }
        self.index
            .read()
            .ok()
            .and_then(|index| index.get(prefix).cloned())
    }

    /// Number of indexed conversations.
    pub fn len(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
