//! Path layout for a project's conversation storage.
//!
//! # Directory Structure
//!
//! ```text
//! <project root>/
//! └── conversations/
//!     ├── <conversationId>.json    # full serialized Conversation
//!     ├── metadata.json            # { conversations: [ConversationMetadata] }
//!     └── archive/
//!         └── <conversationId>.json
//! ```

use std::path::{Path, PathBuf};

use palaver_core::error::Result;
use tokio::fs;

/// Resolved storage paths for one project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// Creates a path layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/conversations`
    pub fn conversations_dir(&self) -> PathBuf {
        self.root.join("conversations")
    }

    /// `<root>/conversations/archive`
    pub fn archive_dir(&self) -> PathBuf {
        self.conversations_dir().join("archive")
    }

    /// `<root>/conversations/metadata.json`
    pub fn metadata_path(&self) -> PathBuf {
        self.conversations_dir().join("metadata.json")
    }

    /// `<root>/conversations/<id>.json`
    pub fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.conversations_dir()
            .join(format!("{}.json", conversation_id))
    }

    /// `<root>/conversations/archive/<id>.json`
    pub fn archived_conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.archive_dir().join(format!("{}.json", conversation_id))
    }

    /// Creates the conversations and archive directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.archive_dir()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_layout_creation() {
        let temp = TempDir::new().unwrap();
        let paths = ProjectPaths::new(temp.path());
        paths.ensure_layout().await.unwrap();

        assert!(paths.conversations_dir().is_dir());
        assert!(paths.archive_dir().is_dir());
    }

    #[test]
    fn test_path_shapes() {
        let paths = ProjectPaths::new("/tmp/project");
        let id = "a".repeat(64);
        assert!(paths
            .conversation_path(&id)
            .ends_with(format!("conversations/{}.json", id)));
        assert!(paths
            .archived_conversation_path(&id)
            .ends_with(format!("conversations/archive/{}.json", id)));
        assert!(paths.metadata_path().ends_with("conversations/metadata.json"));
    }
}
