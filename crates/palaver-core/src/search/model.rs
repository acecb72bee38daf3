//! Search domain models.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationMetadata;

/// Structured full-text search input.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchQuery {
    /// Free-text query, matched case-insensitively against message content
    pub query: String,
    /// Restrict to messages authored by this agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_pubkey: Option<String>,
    /// Only messages created at or after this timestamp (epoch seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<i64>,
    /// Only messages created at or before this timestamp (epoch seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<i64>,
}

impl SearchQuery {
    /// Creates a free-text query with no filters.
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// A single search hit, carrying enough conversation metadata to render a
/// preview without a second disk read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// Metadata of the conversation the hit belongs to
    pub conversation: ConversationMetadata,
    /// History index of the matching message
    pub message_index: usize,
    /// Public key of the message author
    pub pubkey: String,
    /// Truncated matching content
    pub snippet: String,
    /// Creation timestamp of the matching message (epoch seconds)
    pub created_at: i64,
}

/// Result of a registry-level search, returned as a value rather than an
/// error so index corruption or absence degrades to "no results" while still
/// surfacing the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Whether the search itself executed
    pub success: bool,
    /// Matching items (empty on failure)
    pub results: Vec<SearchResultItem>,
    /// Failure reason, when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    /// Successful outcome with the given results.
    pub fn ok(results: Vec<SearchResultItem>) -> Self {
        Self {
            success: true,
            results,
            error: None,
        }
    }

    /// Failed outcome with an explanatory reason and no results.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_carries_reason() {
        let outcome = SearchOutcome::failed("no project initialized");
        assert!(!outcome.success);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("no project initialized"));
    }

    #[test]
    fn test_ok_outcome_has_no_error() {
        let outcome = SearchOutcome::ok(Vec::new());
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }
}
