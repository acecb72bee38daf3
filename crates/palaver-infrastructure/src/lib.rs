//! Infrastructure layer for Palaver.
//!
//! File-system implementations of the persistence and search traits defined
//! in `palaver-core`: one JSON document per conversation, a per-project
//! metadata index, an archive area, and a rebuildable full-text index.

pub mod json_repository;
pub mod paths;
pub mod search_index;

pub use json_repository::JsonConversationRepository;
pub use paths::ProjectPaths;
pub use search_index::FileSearchIndex;
