//! File-backed full-text search index over conversation messages.
//!
//! The index covers every conversation document on disk for one project,
//! live and archived, not just the ones resident in a registry cache. It is
//! rebuildable at any time from the source files; incremental updates are
//! debounced so a burst of appended messages does not trigger an
//! O(conversation size) reindex per message.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use palaver_core::conversation::{Conversation, ConversationMetadata};
use palaver_core::error::Result;
use palaver_core::search::{SearchIndex, SearchQuery, SearchResultItem};

use crate::paths::ProjectPaths;

/// Debounce window for incremental updates.
const UPDATE_DEBOUNCE: Duration = Duration::from_secs(30);

/// Maximum snippet length carried in a search result.
const SNIPPET_LEN: usize = 160;

#[derive(Debug, Clone)]
struct IndexedMessage {
    message_index: usize,
    pubkey: String,
    content: String,
    content_lower: String,
    created_at: i64,
}

#[derive(Debug, Clone)]
struct IndexedConversation {
    metadata: ConversationMetadata,
    messages: Vec<IndexedMessage>,
}

#[derive(Default)]
struct IndexInner {
    built: bool,
    conversations: HashMap<String, IndexedConversation>,
    /// Conversations with a pending incremental update, keyed to the time of
    /// the first trigger in the current burst
    pending: HashMap<String, Instant>,
}

/// Per-project search index built from conversation JSON documents.
pub struct FileSearchIndex {
    paths: ProjectPaths,
    debounce: Duration,
    inner: Mutex<IndexInner>,
}

impl FileSearchIndex {
    /// Creates an index for the project rooted at `paths`.
    pub fn new(paths: ProjectPaths) -> Self {
        Self {
            paths,
            debounce: UPDATE_DEBOUNCE,
            inner: Mutex::new(IndexInner::default()),
        }
    }

    /// Creates an index with a custom debounce window (used by tests).
    pub fn with_debounce(paths: ProjectPaths, debounce: Duration) -> Self {
        Self {
            paths,
            debounce,
            inner: Mutex::new(IndexInner::default()),
        }
    }

    fn index_conversation(conversation: &Conversation, archived: bool) -> IndexedConversation {
        let messages = conversation
            .messages()
            .map(|(message_index, m)| IndexedMessage {
                message_index,
                pubkey: m.pubkey.clone(),
                content: m.content.clone(),
                content_lower: m.content.to_lowercase(),
                created_at: m.created_at,
            })
            .collect();
        IndexedConversation {
            metadata: conversation.to_metadata(archived),
            messages,
        }
    }

    async fn read_document(&self, conversation_id: &str) -> Option<(Conversation, bool)> {
        for (path, archived) in [
            (self.paths.conversation_path(conversation_id), false),
            (self.paths.archived_conversation_path(conversation_id), true),
        ] {
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Conversation>(&content) {
                    Ok(conversation) => return Some((conversation, archived)),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Skipping corrupt conversation document while indexing"
                        );
                        return None;
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read document while indexing");
                    return None;
                }
            }
        }
        None
    }

    async fn scan_dir(
        &self,
        dir: &std::path::Path,
        archived: bool,
        into: &mut HashMap<String, IndexedConversation>,
    ) -> Result<()> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("metadata.json") {
                continue;
            }
            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read document while rebuilding index");
                    continue;
                }
            };
            match serde_json::from_str::<Conversation>(&content) {
                Ok(conversation) => {
                    into.insert(
                        conversation.id.clone(),
                        Self::index_conversation(&conversation, archived),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping corrupt conversation document while rebuilding index"
                    );
                }
            }
        }
        Ok(())
    }

    async fn rebuild_locked(&self, inner: &mut IndexInner) -> Result<usize> {
        let mut conversations = HashMap::new();
        self.scan_dir(&self.paths.conversations_dir(), false, &mut conversations)
            .await?;
        self.scan_dir(&self.paths.archive_dir(), true, &mut conversations)
            .await?;
        let count = conversations.len();
        inner.conversations = conversations;
        inner.pending.clear();
        inner.built = true;
        Ok(count)
    }

    /// Builds the index if absent and folds in pending updates whose
    /// debounce window has elapsed.
    async fn refresh(&self, inner: &mut IndexInner) -> Result<()> {
        if !inner.built {
            self.rebuild_locked(inner).await?;
            return Ok(());
        }

        let now = Instant::now();
        let due: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, first)| now.duration_since(**first) >= self.debounce)
            .map(|(id, _)| id.clone())
            .collect();
        for conversation_id in due {
            inner.pending.remove(&conversation_id);
            match self.read_document(&conversation_id).await {
                Some((conversation, archived)) => {
                    inner.conversations.insert(
                        conversation_id,
                        Self::index_conversation(&conversation, archived),
                    );
                }
                None => {
                    inner.conversations.remove(&conversation_id);
                }
            }
        }
        Ok(())
    }

    /// Number of indexed conversations (builds the index if needed).
    pub async fn indexed_count(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner).await?;
        Ok(inner.conversations.len())
    }
}

fn snippet(content: &str) -> String {
    if content.chars().count() <= SNIPPET_LEN {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(SNIPPET_LEN).collect();
        format!("{}…", truncated)
    }
}

fn message_matches(query: &SearchQuery, needle: &str, message: &IndexedMessage) -> bool {
    if !needle.is_empty() && !message.content_lower.contains(needle) {
        return false;
    }
    if let Some(pubkey) = &query.agent_pubkey {
        if &message.pubkey != pubkey {
            return false;
        }
    }
    if let Some(from) = query.date_from {
        if message.created_at < from {
            return false;
        }
    }
    if let Some(to) = query.date_to {
        if message.created_at > to {
            return false;
        }
    }
    true
}

#[async_trait]
impl SearchIndex for FileSearchIndex {
    async fn search(&self, query: &SearchQuery, limit: usize) -> Result<Vec<SearchResultItem>> {
        let mut inner = self.inner.lock().await;
        self.refresh(&mut inner).await?;

        let needle = query.query.to_lowercase();
        // (conversation match count, item) pairs for ranking
        let mut hits: Vec<(usize, SearchResultItem)> = Vec::new();
        for indexed in inner.conversations.values() {
            let matching: Vec<&IndexedMessage> = indexed
                .messages
                .iter()
                .filter(|m| message_matches(query, &needle, m))
                .collect();
            let score = matching.len();
            for message in matching {
                hits.push((
                    score,
                    SearchResultItem {
                        conversation: indexed.metadata.clone(),
                        message_index: message.message_index,
                        pubkey: message.pubkey.clone(),
                        snippet: snippet(&message.content),
                        created_at: message.created_at,
                    },
                ));
            }
        }

        // More relevant conversations first, then most recent messages
        hits.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.created_at.cmp(&a.1.created_at))
        });
        Ok(hits.into_iter().take(limit).map(|(_, item)| item).collect())
    }

    async fn trigger_update(&self, conversation_id: &str) {
        let mut inner = self.inner.lock().await;
        // Coalesce bursts: keep the first trigger time of the window
        inner
            .pending
            .entry(conversation_id.to_string())
            .or_insert_with(Instant::now);
    }

    async fn rebuild(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        self.rebuild_locked(&mut inner).await
    }
}
