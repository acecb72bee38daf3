//! Conversation metadata: the free-form bag stored inside a conversation and
//! the registry-level listing projection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::phase::Phase;

/// Free-form but schema-validated metadata carried by a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConversationData {
    /// Git branch the work happens on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Rolling summary of the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Captured requirements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    /// Captured plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Chain of conversation IDs this one was delegated through
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delegation_chain: Vec<String>,
    /// ID of an artifact event this conversation references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_artifact: Option<String>,
    /// Anything else callers attach
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Derived, rebuildable projection of a conversation, persisted separately in
/// the per-project metadata index for O(1) listing without loading full
/// histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    /// Full conversation ID
    pub id: String,
    /// Human label
    pub title: String,
    /// Creation timestamp (epoch seconds)
    pub created_at: i64,
    /// Last-update timestamp (epoch seconds)
    pub updated_at: i64,
    /// Current phase
    pub phase: Phase,
    /// Number of history entries
    pub event_count: usize,
    /// Number of agents with a read cursor
    pub agent_count: usize,
    /// Whether the conversation has been archived
    #[serde(default)]
    pub archived: bool,
}

/// Criteria for filtering the metadata index without loading conversations.
#[derive(Debug, Clone, Default)]
pub struct MetadataCriteria {
    /// Case-insensitive title substring
    pub title_contains: Option<String>,
    /// Restrict to archived / non-archived conversations
    pub archived: Option<bool>,
    /// Only conversations updated at or after this timestamp
    pub updated_after: Option<i64>,
    /// Only conversations updated at or before this timestamp
    pub updated_before: Option<i64>,
}

impl MetadataCriteria {
    /// Returns true when `meta` satisfies every set filter.
    pub fn matches(&self, meta: &ConversationMetadata) -> bool {
        if let Some(needle) = &self.title_contains {
            if !meta.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if meta.archived != archived {
                return false;
            }
        }
        if let Some(after) = self.updated_after {
            if meta.updated_at < after {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if meta.updated_at > before {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str, updated_at: i64, archived: bool) -> ConversationMetadata {
        ConversationMetadata {
            id: "a".repeat(64),
            title: title.to_string(),
            created_at: 0,
            updated_at,
            phase: Phase::Chat,
            event_count: 1,
            agent_count: 0,
            archived,
        }
    }

    #[test]
    fn test_empty_criteria_matches_everything() {
        let c = MetadataCriteria::default();
        assert!(c.matches(&meta("anything", 10, false)));
        assert!(c.matches(&meta("anything", 10, true)));
    }

    #[test]
    fn test_title_filter_is_case_insensitive() {
        let c = MetadataCriteria {
            title_contains: Some("Fix".to_string()),
            ..Default::default()
        };
        assert!(c.matches(&meta("fix the parser", 0, false)));
        assert!(!c.matches(&meta("add feature", 0, false)));
    }

    #[test]
    fn test_date_range_filter() {
        let c = MetadataCriteria {
            updated_after: Some(100),
            updated_before: Some(200),
            ..Default::default()
        };
        assert!(c.matches(&meta("t", 150, false)));
        assert!(!c.matches(&meta("t", 99, false)));
        assert!(!c.matches(&meta("t", 201, false)));
    }
}
