//! Per-conversation state owner.
//!
//! A `ConversationStore` owns one conversation's full state and serializes
//! access to it: all mutation goes through this surface and is sequenced by
//! an internal lock, so logically-concurrent agent turns never mutate the
//! `Conversation` value in parallel.

use std::sync::Arc;

use tokio::sync::RwLock;

use palaver_core::conversation::{
    AgentState, Conversation, ConversationMessage, ConversationMetadata, DelegationMarker,
    DelegationStatus, Phase, TodoItem, TodoStatus,
};
use palaver_core::error::{PalaverError, Result};
use palaver_core::event::InboundEvent;
use palaver_core::repository::ConversationRepository;

/// Maximum derived-title length before ellipsizing.
const TITLE_MAX_CHARS: usize = 50;

/// Derives an initial conversation title from the first message content.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}…", truncated)
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Owns one conversation's state and its serialization contract.
pub struct ConversationStore {
    project_id: String,
    conversation_id: String,
    conversation: RwLock<Conversation>,
    repository: Arc<dyn ConversationRepository>,
}

// Manual impl: `Arc<dyn ConversationRepository>` has no Debug
impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("project_id", &self.project_id)
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    /// Loads a conversation from the repository.
    ///
    /// A missing or schema-invalid document yields an empty store rather
    /// than an error: "no conversation found yet" is not a failure, and
    /// later mutations must succeed against the empty state. The
    /// execution-time crash-recovery rule is applied to whatever was loaded.
    pub async fn load(
        project_id: impl Into<String>,
        conversation_id: impl Into<String>,
        repository: Arc<dyn ConversationRepository>,
    ) -> Result<Self> {
        let project_id = project_id.into();
        let conversation_id = conversation_id.into();
        let now = now_ts();

        let mut conversation = match repository.load(&conversation_id).await? {
            Some(conversation) => conversation,
            None => Conversation::new(conversation_id.clone(), String::new(), now),
        };
        if conversation.execution_time.recover_from_crash(now) {
            tracing::warn!(
                conversation_id = %conversation_id,
                "Stale active execution session found on load, resetting without credit"
            );
        }

        Ok(Self {
            project_id,
            conversation_id,
            conversation: RwLock::new(conversation),
            repository,
        })
    }

    /// Creates a store for a brand-new conversation from its opening event,
    /// deriving the title and appending the event as the first message.
    pub fn from_event(
        project_id: impl Into<String>,
        event: &InboundEvent,
        repository: Arc<dyn ConversationRepository>,
    ) -> Self {
        let mut conversation =
            Conversation::new(event.id.clone(), derive_title(&event.content), event.created_at);
        conversation.append_message(
            ConversationMessage::from_event(event, false),
            event.created_at,
        );
        Self {
            project_id: project_id.into(),
            conversation_id: event.id.clone(),
            conversation: RwLock::new(conversation),
            repository,
        }
    }

    /// Full conversation ID.
    pub fn id(&self) -> &str {
        &self.conversation_id
    }

    /// Project this conversation belongs to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Serializes the full current state to the persistence adapter.
    ///
    /// Safe to call concurrently from multiple call sites: the repository
    /// serializes metadata-index writes, and the snapshot is taken under the
    /// read lock.
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.conversation.read().await.clone();
        self.repository.save(&snapshot).await
    }

    /// Appends one message to the history. Never rejects duplicates;
    /// idempotent use is the caller's responsibility.
    pub async fn add_event_message(&self, event: &InboundEvent, is_from_agent: bool) {
        let mut conversation = self.conversation.write().await;
        conversation.append_message(ConversationMessage::from_event(event, is_from_agent), now_ts());
    }

    /// Number of history entries.
    pub async fn history_len(&self) -> usize {
        self.conversation.read().await.history.len()
    }

    /// Clones the current conversation state.
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.read().await.clone()
    }

    /// Registry-level listing projection of the current state.
    pub async fn metadata(&self) -> ConversationMetadata {
        self.conversation.read().await.to_metadata(false)
    }

    // ============================================================================
    // Title and metadata
    // ============================================================================

    pub async fn title(&self) -> String {
        self.conversation.read().await.title.clone()
    }

    pub async fn set_title(&self, title: impl Into<String>) {
        let mut conversation = self.conversation.write().await;
        conversation.title = title.into();
        conversation.updated_at = now_ts();
    }

    /// Applies one mutation to the free-form metadata bag.
    pub async fn update_metadata<F>(&self, mutate: F)
    where
        F: FnOnce(&mut palaver_core::conversation::ConversationData),
    {
        let mut conversation = self.conversation.write().await;
        mutate(&mut conversation.metadata);
        conversation.updated_at = now_ts();
    }

    // ============================================================================
    // Phase
    // ============================================================================

    pub async fn phase(&self) -> Phase {
        self.conversation.read().await.phase
    }

    /// Moves the conversation to a new phase via a recorded transition.
    pub async fn transition_phase(
        &self,
        to: Phase,
        message: impl Into<String>,
        agent_pubkey: impl Into<String>,
        agent_name: impl Into<String>,
    ) {
        let mut conversation = self.conversation.write().await;
        conversation.transition_phase(to, message, agent_pubkey, agent_name, now_ts());
    }

    // ============================================================================
    // Delegation markers
    // ============================================================================

    /// Appends a pending delegation marker for a spawned child conversation.
    pub async fn add_delegation_marker(
        &self,
        child_conversation_id: impl Into<String>,
        recipient_pubkey: impl Into<String>,
    ) {
        let mut conversation = self.conversation.write().await;
        let now = now_ts();
        let marker = DelegationMarker::new(
            child_conversation_id,
            recipient_pubkey,
            conversation.id.clone(),
            now,
        );
        conversation.append_delegation(marker, now);
    }

    /// Resolves a pending delegation to its terminal outcome, exactly once.
    pub async fn resolve_delegation(
        &self,
        child_conversation_id: &str,
        outcome: DelegationStatus,
    ) -> Result<()> {
        let mut conversation = self.conversation.write().await;
        conversation.resolve_delegation(child_conversation_id, outcome, now_ts())
    }

    // ============================================================================
    // Agent read cursors and blocking
    // ============================================================================

    pub async fn get_agent_state(&self, agent_pubkey: &str) -> Option<AgentState> {
        self.conversation
            .read()
            .await
            .agent_states
            .get(agent_pubkey)
            .copied()
    }

    /// Updates an agent's read cursor. By convention only the agent that
    /// owns the entry calls this.
    pub async fn update_agent_state(&self, agent_pubkey: impl Into<String>, last_index: usize) {
        let mut conversation = self.conversation.write().await;
        conversation.agent_states.insert(
            agent_pubkey.into(),
            AgentState {
                last_processed_message_index: last_index,
            },
        );
        conversation.updated_at = now_ts();
    }

    pub async fn block_agent(&self, agent_pubkey: impl Into<String>) {
        let mut conversation = self.conversation.write().await;
        conversation.blocked_agents.insert(agent_pubkey.into());
        conversation.updated_at = now_ts();
    }

    pub async fn unblock_agent(&self, agent_pubkey: &str) {
        let mut conversation = self.conversation.write().await;
        conversation.blocked_agents.remove(agent_pubkey);
        conversation.updated_at = now_ts();
    }

    pub async fn is_agent_blocked(&self, agent_pubkey: &str) -> bool {
        self.conversation
            .read()
            .await
            .blocked_agents
            .contains(agent_pubkey)
    }

    // ============================================================================
    // Todos
    // ============================================================================

    pub async fn get_todos(&self, agent_pubkey: &str) -> Vec<TodoItem> {
        self.conversation
            .read()
            .await
            .agent_todos
            .get(agent_pubkey)
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces an agent's todo list.
    ///
    /// The "at most one `InProgress` item per agent" rule is advisory:
    /// a violation is logged, not rejected.
    pub async fn set_todos(&self, agent_pubkey: impl Into<String>, todos: Vec<TodoItem>) {
        let agent_pubkey = agent_pubkey.into();
        warn_on_multiple_in_progress(&agent_pubkey, &todos);
        let mut conversation = self.conversation.write().await;
        conversation.agent_todos.insert(agent_pubkey, todos);
        conversation.updated_at = now_ts();
    }

    /// Updates the status of the todo at `position` in an agent's list.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the agent has no item at that position.
    pub async fn update_todo_status(
        &self,
        agent_pubkey: &str,
        position: usize,
        status: TodoStatus,
    ) -> Result<()> {
        let mut conversation = self.conversation.write().await;
        let todos = conversation
            .agent_todos
            .get_mut(agent_pubkey)
            .ok_or_else(|| PalaverError::not_found("todo list", agent_pubkey.to_string()))?;
        let item = todos
            .iter_mut()
            .find(|t| t.position == position)
            .ok_or_else(|| {
                PalaverError::not_found("todo", format!("{}#{}", agent_pubkey, position))
            })?;
        item.status = status;
        let todos = todos.clone();
        conversation.updated_at = now_ts();
        drop(conversation);
        warn_on_multiple_in_progress(agent_pubkey, &todos);
        Ok(())
    }

    // ============================================================================
    // Execution time
    // ============================================================================

    /// Starts an execution session. No-op when one is already active.
    pub async fn start_execution_time(&self) {
        let mut conversation = self.conversation.write().await;
        conversation.execution_time.start(now_ts());
    }

    /// Stops the active execution session, returning the credited seconds
    /// (0 when none was active).
    pub async fn stop_execution_time(&self) -> u64 {
        let mut conversation = self.conversation.write().await;
        conversation.execution_time.stop(now_ts())
    }
}

fn warn_on_multiple_in_progress(agent_pubkey: &str, todos: &[TodoItem]) {
    let in_progress = todos
        .iter()
        .filter(|t| t.status == TodoStatus::InProgress)
        .count();
    if in_progress > 1 {
        tracing::warn!(
            agent_pubkey,
            in_progress,
            "Agent has more than one in-progress todo"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_infrastructure::JsonConversationRepository;
    use tempfile::TempDir;

    fn event(fill: char, content: &str, created_at: i64) -> InboundEvent {
        InboundEvent::new(
            std::iter::repeat(fill).take(64).collect::<String>(),
            "user_pk",
            content,
            created_at,
        )
    }

    async fn repo(temp: &TempDir) -> Arc<JsonConversationRepository> {
        Arc::new(JsonConversationRepository::new(temp.path()).await.unwrap())
    }

    #[test]
    fn test_derive_title_short_content() {
        assert_eq!(derive_title("fix the parser"), "fix the parser");
        assert_eq!(derive_title("  padded  "), "padded");
    }

    #[test]
    fn test_derive_title_ellipsizes_past_fifty_chars() {
        let long = "x".repeat(80);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), 51);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn test_debug_shows_identity_without_repository() {
        let temp = TempDir::new().unwrap();
        let store = ConversationStore::from_event("alpha", &event('a', "hello", 100), repo(&temp).await);

        let rendered = format!("{:?}", store);
        assert!(rendered.contains("alpha"));
        assert!(rendered.contains(&"a".repeat(64)));
    }

    #[tokio::test]
    async fn test_load_missing_starts_empty_and_mutable() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let store = ConversationStore::load("p", "a".repeat(64), repository)
            .await
            .unwrap();
        assert_eq!(store.history_len().await, 0);

        // Mutations must succeed on the empty store
        store
            .add_event_message(&event('b', "first message", 100), false)
            .await;
        assert_eq!(store.history_len().await, 1);
        store.save().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let store = ConversationStore::from_event("p", &event('a', "hello world", 100), repository.clone());
        store
            .add_event_message(&event('b', "reply", 110), true)
            .await;
        store
            .transition_phase(Phase::Plan, "planning", "agent_pk", "planner")
            .await;
        store.start_execution_time().await;
        store.save().await.unwrap();

        let reloaded = ConversationStore::load("p", "a".repeat(64), repository)
            .await
            .unwrap();
        let snapshot = reloaded.snapshot().await;
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.phase, Phase::Plan);
        assert_eq!(snapshot.title, "hello world");
        assert!(snapshot.execution_time.is_active);
    }

    #[tokio::test]
    async fn test_execution_time_idempotence() {
        let temp = TempDir::new().unwrap();
        let store = ConversationStore::from_event("p", &event('a', "x", 100), repo(&temp).await);

        store.start_execution_time().await;
        store.start_execution_time().await;
        let snapshot = store.snapshot().await;
        assert!(snapshot.execution_time.is_active);

        assert!(store.stop_execution_time().await < 2);
        assert_eq!(store.stop_execution_time().await, 0);
    }

    #[tokio::test]
    async fn test_crash_recovery_applied_on_load() {
        let temp = TempDir::new().unwrap();
        let repository = repo(&temp).await;

        let mut conversation = Conversation::new("a".repeat(64), "stale", 0);
        let stale = chrono::Utc::now().timestamp() - 31 * 60;
        conversation.execution_time.start(stale);
        conversation.execution_time.total_seconds = 7;
        palaver_core::repository::ConversationRepository::save(repository.as_ref(), &conversation)
            .await
            .unwrap();

        let store = ConversationStore::load("p", "a".repeat(64), repository)
            .await
            .unwrap();
        let snapshot = store.snapshot().await;
        assert!(!snapshot.execution_time.is_active);
        assert_eq!(snapshot.execution_time.total_seconds, 7);
    }

    #[tokio::test]
    async fn test_delegation_lifecycle() {
        let temp = TempDir::new().unwrap();
        let store = ConversationStore::from_event("p", &event('a', "parent", 100), repo(&temp).await);

        store
            .add_delegation_marker("c".repeat(64), "child_pk")
            .await;
        store
            .resolve_delegation(&"c".repeat(64), DelegationStatus::Completed)
            .await
            .unwrap();
        assert!(store
            .resolve_delegation(&"c".repeat(64), DelegationStatus::Aborted)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_todo_status_update() {
        let temp = TempDir::new().unwrap();
        let store = ConversationStore::from_event("p", &event('a', "x", 100), repo(&temp).await);

        store
            .set_todos(
                "agent_pk",
                vec![TodoItem::new("first", 0), TodoItem::new("second", 1)],
            )
            .await;
        store
            .update_todo_status("agent_pk", 1, TodoStatus::InProgress)
            .await
            .unwrap();

        let todos = store.get_todos("agent_pk").await;
        assert_eq!(todos[1].status, TodoStatus::InProgress);
        assert_eq!(todos[0].status, TodoStatus::Pending);

        assert!(store
            .update_todo_status("agent_pk", 9, TodoStatus::Done)
            .await
            .is_err());
        assert!(store
            .update_todo_status("unknown_pk", 0, TodoStatus::Done)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_agent_cursors_and_blocking() {
        let temp = TempDir::new().unwrap();
        let store = ConversationStore::from_event("p", &event('a', "x", 100), repo(&temp).await);

        assert_eq!(store.get_agent_state("agent_pk").await, None);
        store.update_agent_state("agent_pk", 4).await;
        assert_eq!(
            store.get_agent_state("agent_pk").await,
            Some(AgentState {
                last_processed_message_index: 4
            })
        );

        assert!(!store.is_agent_blocked("agent_pk").await);
        store.block_agent("agent_pk").await;
        assert!(store.is_agent_blocked("agent_pk").await);
        store.unblock_agent("agent_pk").await;
        assert!(!store.is_agent_blocked("agent_pk").await);
    }
}
