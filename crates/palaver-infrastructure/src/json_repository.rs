//! JSON file-based ConversationRepository implementation.
//!
//! One JSON document per conversation under `conversations/`, plus a
//! per-project `metadata.json` index shared by every conversation in the
//! project. Metadata-index updates are strictly serialized through a single
//! mutex: the process is the only writer, so a file lock is unnecessary, but
//! two conversations finishing a save at nearly the same instant must both
//! survive in the index.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use palaver_core::conversation::{Conversation, ConversationMetadata, MetadataCriteria};
use palaver_core::error::{PalaverError, Result};
use palaver_core::event::is_full_id;
use palaver_core::repository::ConversationRepository;

use crate::paths::ProjectPaths;

/// On-disk shape of `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct MetadataFile {
    #[serde(default)]
    conversations: Vec<ConversationMetadata>,
}

impl MetadataFile {
    fn find(&self, conversation_id: &str) -> Option<&ConversationMetadata> {
        self.conversations.iter().find(|m| m.id == conversation_id)
    }

    fn upsert(&mut self, meta: ConversationMetadata) {
        match self.conversations.iter_mut().find(|m| m.id == meta.id) {
            Some(existing) => *existing = meta,
            None => self.conversations.push(meta),
        }
    }

    fn remove(&mut self, conversation_id: &str) {
        self.conversations.retain(|m| m.id != conversation_id);
    }
}

/// File-system persistence adapter for one project's conversations.
pub struct JsonConversationRepository {
    paths: ProjectPaths,
    /// Serializes every read-modify-write of `metadata.json`
    metadata_lock: Mutex<()>,
}

impl JsonConversationRepository {
    /// Creates a repository rooted at `root`, ensuring the directory layout
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory structure cannot be created.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let paths = ProjectPaths::new(root);
        paths.ensure_layout().await?;
        Ok(Self {
            paths,
            metadata_lock: Mutex::new(()),
        })
    }

    /// The path layout this repository writes under.
    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    async fn read_metadata_file(&self) -> MetadataFile {
        match fs::read_to_string(self.paths.metadata_path()).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(file) => file,
                Err(e) => {
                    // The index is rebuildable; a corrupt one starts empty
                    tracing::warn!(error = %e, "Corrupt metadata index, starting empty");
                    MetadataFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataFile::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read metadata index, starting empty");
                MetadataFile::default()
            }
        }
    }

    async fn write_metadata_file(&self, file: &MetadataFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file)?;
        fs::write(self.paths.metadata_path(), content).await?;
        Ok(())
    }

    /// Applies one mutation to the metadata index under the write lock.
    async fn update_metadata<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut MetadataFile),
    {
        let _guard = self.metadata_lock.lock().await;
        let mut file = self.read_metadata_file().await;
        mutate(&mut file);
        self.write_metadata_file(&file).await
    }

    async fn read_document(&self, path: &Path) -> Result<Option<Conversation>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Conversation>(&content) {
            Ok(conversation) => Ok(Some(conversation)),
            Err(e) => {
                // Schema-invalid data is treated as not-found so one bad
                // file cannot take down the registry
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Conversation document failed validation, treating as not found"
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ConversationRepository for JsonConversationRepository {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        if !is_full_id(&conversation.id) {
            return Err(PalaverError::data_access(format!(
                "Refusing to persist malformed conversation ID: '{}'",
                conversation.id
            )));
        }

        let content = serde_json::to_string_pretty(conversation)?;

        // Document placement and index entry must agree, so both happen
        // under the metadata lock. An archived conversation stays in the
        // archive: a save from a still-cached store updates the archived
        // document instead of resurrecting a live one.
        let _guard = self.metadata_lock.lock().await;
        let mut file = self.read_metadata_file().await;
        let archived = file
            .find(&conversation.id)
            .map(|m| m.archived)
            .unwrap_or(false);
        let path = if archived {
            self.paths.archived_conversation_path(&conversation.id)
        } else {
            self.paths.conversation_path(&conversation.id)
        };
        fs::write(path, content).await?;
        file.upsert(conversation.to_metadata(archived));
        self.write_metadata_file(&file).await
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        if !is_full_id(conversation_id) {
            return Ok(None);
        }
        self.read_document(&self.paths.conversation_path(conversation_id))
            .await
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        if !is_full_id(conversation_id) {
            return Ok(());
        }
        for path in [
            self.paths.conversation_path(conversation_id),
            self.paths.archived_conversation_path(conversation_id),
        ] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.update_metadata(|file| file.remove(conversation_id))
            .await
    }

    async fn list(&self) -> Result<Vec<ConversationMetadata>> {
        let mut conversations = self.read_metadata_file().await.conversations;
        // Most recently updated first
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn search(&self, criteria: &MetadataCriteria) -> Result<Vec<ConversationMetadata>> {
        let all = self.list().await?;
        Ok(all.into_iter().filter(|m| criteria.matches(m)).collect())
    }

    async fn archive(&self, conversation_id: &str) -> Result<()> {
        if !is_full_id(conversation_id) {
            return Ok(());
        }
        let live = self.paths.conversation_path(conversation_id);
        let archived = self.paths.archived_conversation_path(conversation_id);

        match fs::rename(&live, &archived).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Already archived, or unknown; both are no-ops
                tracing::debug!(conversation_id, "Archive requested for non-live conversation");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.update_metadata(|file| {
            if let Some(meta) = file.conversations.iter_mut().find(|m| m.id == conversation_id) {
                meta.archived = true;
            }
        })
        .await
    }

    async fn restore(&self, conversation_id: &str) -> Result<()> {
        if !is_full_id(conversation_id) {
            return Ok(());
        }
        let live = self.paths.conversation_path(conversation_id);
        let archived = self.paths.archived_conversation_path(conversation_id);

        match fs::rename(&archived, &live).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(conversation_id, "Restore requested for non-archived conversation");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        self.update_metadata(|file| {
            if let Some(meta) = file.conversations.iter_mut().find(|m| m.id == conversation_id) {
                meta.archived = false;
            }
        })
        .await
    }

    async fn exists(&self, conversation_id: &str) -> Result<bool> {
        if !is_full_id(conversation_id) {
            return Ok(false);
        }
        Ok(fs::try_exists(self.paths.conversation_path(conversation_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::conversation::ConversationMessage;
    use palaver_core::event::InboundEvent;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn conversation_with_messages(fill: char, count: usize) -> Conversation {
        let id: String = std::iter::repeat(fill).take(64).collect();
        let mut conv = Conversation::new(id, format!("conv {}", fill), 100);
        for i in 0..count {
            let event = InboundEvent::new("e".repeat(64), "pk1", format!("message {}", i), 100 + i as i64);
            conv.append_message(ConversationMessage::from_event(&event, false), 100 + i as i64);
        }
        conv
    }

    async fn repo(temp: &TempDir) -> JsonConversationRepository {
        JsonConversationRepository::new(temp.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_empty() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let conv = conversation_with_messages('a', 0);
        repository.save(&conv).await.unwrap();

        let loaded = repository.load(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded, conv);
    }

    #[tokio::test]
    async fn test_round_trip_many_messages() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let conv = conversation_with_messages('b', 500);
        repository.save(&conv).await.unwrap();

        let loaded = repository.load(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 500);
        assert_eq!(loaded, conv);
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        assert!(repository.load(&"f".repeat(64)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_id_returns_none() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        assert!(repository.load("../../etc/passwd").await.unwrap().is_none());
        assert!(repository.load("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_treated_as_not_found() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let id = "c".repeat(64);
        fs::write(repository.paths().conversation_path(&id), "{not json")
            .await
            .unwrap();

        assert!(repository.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_index_tracks_saves() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        repository
            .save(&conversation_with_messages('a', 2))
            .await
            .unwrap();
        repository
            .save(&conversation_with_messages('b', 3))
            .await
            .unwrap();

        let listed = repository.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|m| m.event_count == 2));
        assert!(listed.iter().any(|m| m.event_count == 3));
    }

    #[tokio::test]
    async fn test_concurrent_saves_do_not_lose_metadata() {
        let temp = TempDir::new().unwrap();
        let repository = Arc::new(repo(&temp).await);

        let a = conversation_with_messages('a', 1);
        let b = conversation_with_messages('b', 1);

        let repo_a = repository.clone();
        let repo_b = repository.clone();
        let (ra, rb) = tokio::join!(repo_a.save(&a), repo_b.save(&b));
        ra.unwrap();
        rb.unwrap();

        let listed = repository.list().await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_archive_and_restore() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let conv = conversation_with_messages('d', 1);
        repository.save(&conv).await.unwrap();

        repository.archive(&conv.id).await.unwrap();
        assert!(!repository.exists(&conv.id).await.unwrap());
        assert!(repository.load(&conv.id).await.unwrap().is_none());
        let listed = repository.list().await.unwrap();
        assert!(listed[0].archived);

        // Archiving again is a no-op
        repository.archive(&conv.id).await.unwrap();

        repository.restore(&conv.id).await.unwrap();
        assert!(repository.exists(&conv.id).await.unwrap());
        let listed = repository.list().await.unwrap();
        assert!(!listed[0].archived);
    }

    #[tokio::test]
    async fn test_save_preserves_archived_flag() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let conv = conversation_with_messages('e', 1);
        repository.save(&conv).await.unwrap();
        repository.archive(&conv.id).await.unwrap();

        // A later save (e.g. from a still-cached store) must not clear the
        // flag, and must not resurrect a live document next to the archived
        // copy
        repository.save(&conv).await.unwrap();
        let listed = repository.list().await.unwrap();
        assert!(listed[0].archived);
        assert!(!repository.exists(&conv.id).await.unwrap());
        assert!(
            !fs::try_exists(repository.paths().conversation_path(&conv.id))
                .await
                .unwrap()
        );

        // The archived copy carries the update and comes back on restore
        repository.restore(&conv.id).await.unwrap();
        let loaded = repository.load(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded, conv);
    }

    #[tokio::test]
    async fn test_delete_removes_document_and_index_entry() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let conv = conversation_with_messages('a', 1);
        repository.save(&conv).await.unwrap();
        repository.delete(&conv.id).await.unwrap();

        assert!(repository.load(&conv.id).await.unwrap().is_none());
        assert!(repository.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_criteria_filters_index() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let mut a = conversation_with_messages('a', 1);
        a.title = "fix the parser".to_string();
        let mut b = conversation_with_messages('b', 1);
        b.title = "add feature".to_string();
        repository.save(&a).await.unwrap();
        repository.save(&b).await.unwrap();

        let criteria = MetadataCriteria {
            title_contains: Some("parser".to_string()),
            ..Default::default()
        };
        let found = repository.search(&criteria).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }
}
