//! Process-wide conversation lookup, cache, and creation workflow.
//!
//! The registry is the single entry point other subsystems use to reach a
//! [`ConversationStore`]. It is an explicit, constructed instance — not a
//! module-level singleton — and resolves which project a conversation
//! belongs to through three tiers: an explicit project ID, the ambient
//! task-local project scope, and a legacy single-project fallback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use palaver_core::conversation::ConversationMetadata;
use palaver_core::error::{PalaverError, Result};
use palaver_core::event::{is_prefix_id, InboundEvent};
use palaver_core::prefix::PrefixResolver;
use palaver_core::repository::ConversationRepository;
use palaver_core::search::{SearchIndex, SearchOutcome, SearchQuery};

use palaver_infrastructure::{FileSearchIndex, JsonConversationRepository, ProjectPaths};

use crate::project::current_project;
use crate::store::ConversationStore;

/// Storage and search handles for one registered project.
#[derive(Clone)]
pub struct ProjectHandle {
    /// Project identifier
    pub project_id: String,
    /// Persistence adapter for this project's conversations
    pub repository: Arc<dyn ConversationRepository>,
    /// Full-text index over this project's conversations
    pub search: Arc<dyn SearchIndex>,
}

/// Process-wide conversation registry: cache, lookup facade, and creation
/// workflow across possibly many isolated projects.
pub struct ConversationRegistry {
    /// Registered projects by ID
    projects: RwLock<HashMap<String, ProjectHandle>>,
    /// First project ever registered, used by the legacy single-project
    /// fallback tier
    legacy_project: RwLock<Option<String>>,
    /// In-memory store cache, keyed by full conversation ID.
    /// Last-writer-wins: IDs are globally unique and re-loading is idempotent.
    stores: RwLock<HashMap<String, Arc<ConversationStore>>>,
    /// Short-prefix index, fed at conversation-creation time
    prefix_resolver: Arc<PrefixResolver>,
}

impl ConversationRegistry {
    /// Creates an empty registry with no projects.
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            legacy_project: RwLock::new(None),
            stores: RwLock::new(HashMap::new()),
            prefix_resolver: Arc::new(PrefixResolver::new()),
        }
    }

    /// The prefix index fed by this registry.
    pub fn prefix_resolver(&self) -> &Arc<PrefixResolver> {
        &self.prefix_resolver
    }

    /// Registers a project with file-system storage rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage layout cannot be created.
    pub async fn register_project(&self, project_id: impl Into<String>, root: &Path) -> Result<()> {
        let project_id = project_id.into();
        let repository = Arc::new(JsonConversationRepository::new(root).await?);
        let search = Arc::new(FileSearchIndex::new(ProjectPaths::new(root)));
        self.register_project_with(project_id, repository, search)
            .await
    }

    /// Registers a project with explicit adapter implementations.
    pub async fn register_project_with(
        &self,
        project_id: impl Into<String>,
        repository: Arc<dyn ConversationRepository>,
        search: Arc<dyn SearchIndex>,
    ) -> Result<()> {
        let project_id = project_id.into();
        let handle = ProjectHandle {
            project_id: project_id.clone(),
            repository,
            search,
        };
        self.projects.write().await.insert(project_id.clone(), handle);

        let mut legacy = self.legacy_project.write().await;
        if legacy.is_none() {
            *legacy = Some(project_id);
        }
        Ok(())
    }

    /// IDs of all registered projects.
    pub async fn registered_projects(&self) -> Vec<String> {
        self.projects.read().await.keys().cloned().collect()
    }

    /// Resolves the project an operation targets.
    ///
    /// Tiers, in order: (1) the explicit `project` argument, (2) the ambient
    /// task-local project scope, (3) the legacy single-project fallback.
    /// The fallback emits a diagnostic warning when more than one project is
    /// known, since silent cross-project misrouting is the failure mode this
    /// guards against.
    ///
    /// # Errors
    ///
    /// Returns `ProjectContext` when no tier yields a registered project.
    /// This indicates a caller bug, not a recoverable runtime condition.
    pub async fn resolve_project(&self, project: Option<&str>) -> Result<String> {
        let projects = self.projects.read().await;

        if let Some(explicit) = project {
            return if projects.contains_key(explicit) {
                Ok(explicit.to_string())
            } else {
                Err(PalaverError::project_context(format!(
                    "Unknown project: '{}'",
                    explicit
                )))
            };
        }

        if let Some(ambient) = current_project() {
            return if projects.contains_key(&ambient) {
                Ok(ambient)
            } else {
                Err(PalaverError::project_context(format!(
                    "Ambient project '{}' is not registered",
                    ambient
                )))
            };
        }

        let legacy = self.legacy_project.read().await.clone();
        match legacy {
            Some(project_id) => {
                if projects.len() > 1 {
                    tracing::warn!(
                        project_id = %project_id,
                        known_projects = projects.len(),
                        "Falling back to legacy single-project resolution with multiple projects registered"
                    );
                }
                Ok(project_id)
            }
            None => Err(PalaverError::project_context(
                "No project has been registered",
            )),
        }
    }

    async fn project_handle(&self, project_id: &str) -> Result<ProjectHandle> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| {
                PalaverError::project_context(format!("Unknown project: '{}'", project_id))
            })
    }

    /// Resolves a short 12-hex prefix to a full conversation ID.
    ///
    /// Anything that is not a well-formed prefix, or a prefix the index does
    /// not know, is passed through unchanged so downstream lookups produce a
    /// clear "not found" rather than a confusing partial match.
    pub fn resolve_id(&self, id: &str) -> String {
        if is_prefix_id(id) {
            if let Some(full) = self.prefix_resolver.resolve(id) {
                return full;
            }
        }
        id.to_string()
    }

    /// Returns the cached store or loads it from the resolved project's
    /// storage. The returned store may be empty when no document exists yet.
    ///
    /// # Errors
    ///
    /// Returns `ProjectContext` when no project context can be resolved.
    pub async fn get_or_load(
        &self,
        id: &str,
        project: Option<&str>,
    ) -> Result<Arc<ConversationStore>> {
        let resolved = self.resolve_id(id);

        if let Some(store) = self.stores.read().await.get(&resolved) {
            return Ok(store.clone());
        }

        let project_id = self.resolve_project(project).await?;
        let handle = self.project_handle(&project_id).await?;
        let store = Arc::new(
            ConversationStore::load(project_id, resolved.clone(), handle.repository.clone())
                .await?,
        );
        self.stores.write().await.insert(resolved, store.clone());
        Ok(store)
    }

    /// Like [`get_or_load`](Self::get_or_load) but never errors on a missing
    /// conversation: probes the resolved project first, then scans sibling
    /// projects for a matching conversation file. The cross-project scan is
    /// O(number of projects) and intentionally a fallback, not the hot path.
    pub async fn get(&self, id: &str, project: Option<&str>) -> Option<Arc<ConversationStore>> {
        let resolved = self.resolve_id(id);

        if let Some(store) = self.stores.read().await.get(&resolved) {
            return Some(store.clone());
        }

        // Probe the current project first
        let current = self.resolve_project(project).await.ok();
        let mut candidates: Vec<ProjectHandle> = Vec::new();
        {
            let projects = self.projects.read().await;
            if let Some(current) = &current {
                if let Some(handle) = projects.get(current) {
                    candidates.push(handle.clone());
                }
            }
            for (project_id, handle) in projects.iter() {
                if Some(project_id) != current.as_ref() {
                    candidates.push(handle.clone());
                }
            }
        }

        for handle in candidates {
            match handle.repository.exists(&resolved).await {
                Ok(true) => {
                    let store = match ConversationStore::load(
                        handle.project_id.clone(),
                        resolved.clone(),
                        handle.repository.clone(),
                    )
                    .await
                    {
                        Ok(store) => Arc::new(store),
                        Err(e) => {
                            tracing::warn!(
                                conversation_id = %resolved,
                                project_id = %handle.project_id,
                                error = %e,
                                "Failed to load conversation found on disk"
                            );
                            return None;
                        }
                    };
                    self.stores
                        .write()
                        .await
                        .insert(resolved.clone(), store.clone());
                    return Some(store);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(
                        project_id = %handle.project_id,
                        error = %e,
                        "Probe for conversation file failed"
                    );
                }
            }
        }
        None
    }

    /// Creates a conversation from its opening event.
    ///
    /// Idempotent by event ID: when a store already exists for that ID
    /// (cached or on disk), it is returned rather than duplicated. Prefix
    /// registration failure is logged and swallowed — it must never fail
    /// conversation creation.
    ///
    /// # Errors
    ///
    /// Returns `ProjectContext` when no project resolves, or a storage
    /// error when the initial save fails.
    pub async fn create(
        &self,
        event: &InboundEvent,
        project: Option<&str>,
    ) -> Result<Arc<ConversationStore>> {
        if let Some(store) = self.stores.read().await.get(&event.id) {
            return Ok(store.clone());
        }

        let project_id = self.resolve_project(project).await?;
        let handle = self.project_handle(&project_id).await?;

        // A document surviving from a previous process also counts as
        // "already exists"
        if handle.repository.exists(&event.id).await? {
            return self.get_or_load(&event.id, Some(&project_id)).await;
        }

        let store = Arc::new(ConversationStore::from_event(
            project_id,
            event,
            handle.repository.clone(),
        ));
        store.save().await?;

        if let Err(e) = self.prefix_resolver.add(&event.id) {
            tracing::warn!(
                conversation_id = %event.id,
                error = %e,
                "Failed to register conversation in prefix index"
            );
        }
        handle.search.trigger_update(&event.id).await;

        self.stores
            .write()
            .await
            .insert(event.id.clone(), store.clone());
        Ok(store)
    }

    /// Evicts the conversation from the cache and moves its document to the
    /// archive area, without forcing a save. No-op for unknown conversations.
    pub async fn archive(&self, id: &str, project: Option<&str>) -> Result<()> {
        let resolved = self.resolve_id(id);
        let evicted = self.stores.write().await.remove(&resolved);

        let project_id = match &evicted {
            Some(store) => store.project_id().to_string(),
            None => self.resolve_project(project).await?,
        };
        let handle = self.project_handle(&project_id).await?;
        handle.repository.archive(&resolved).await
    }

    /// Like [`archive`](Self::archive) but guarantees a `save()` first, so
    /// the archived document reflects the cached state.
    pub async fn complete(&self, id: &str, project: Option<&str>) -> Result<()> {
        let resolved = self.resolve_id(id);
        if let Some(store) = self.stores.read().await.get(&resolved).cloned() {
            store.save().await?;
            let handle = self.project_handle(store.project_id()).await?;
            handle.search.trigger_update(&resolved).await;
        }
        self.archive(&resolved, project).await
    }

    /// Moves an archived conversation back into the live area.
    pub async fn restore(&self, id: &str, project: Option<&str>) -> Result<()> {
        let resolved = self.resolve_id(id);
        let project_id = self.resolve_project(project).await?;
        let handle = self.project_handle(&project_id).await?;
        handle.repository.restore(&resolved).await
    }

    /// Deletes a conversation's document and metadata entry, evicting it
    /// from the cache.
    pub async fn delete(&self, id: &str, project: Option<&str>) -> Result<()> {
        let resolved = self.resolve_id(id);
        self.stores.write().await.remove(&resolved);
        let project_id = self.resolve_project(project).await?;
        let handle = self.project_handle(&project_id).await?;
        handle.repository.delete(&resolved).await
    }

    /// Lists metadata projections for the resolved project.
    pub async fn list(&self, project: Option<&str>) -> Result<Vec<ConversationMetadata>> {
        let project_id = self.resolve_project(project).await?;
        let handle = self.project_handle(&project_id).await?;
        handle.repository.list().await
    }

    /// Full-text search over the resolved project's conversations.
    ///
    /// Never errors across this boundary: search is advisory, so failures
    /// (no project initialized, index trouble) come back as a structured
    /// outcome with the reason, and callers render "no results".
    pub async fn search_advanced(
        &self,
        query: &SearchQuery,
        limit: usize,
        project: Option<&str>,
    ) -> SearchOutcome {
        let project_id = match self.resolve_project(project).await {
            Ok(project_id) => project_id,
            Err(e) => return SearchOutcome::failed(e.to_string()),
        };
        let handle = match self.project_handle(&project_id).await {
            Ok(handle) => handle,
            Err(e) => return SearchOutcome::failed(e.to_string()),
        };
        match handle.search.search(query, limit).await {
            Ok(results) => SearchOutcome::ok(results),
            Err(e) => SearchOutcome::failed(e.to_string()),
        }
    }

    /// Number of stores currently cached (diagnostics).
    pub async fn cached_count(&self) -> usize {
        self.stores.read().await.len()
    }
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::with_project;
    use tempfile::TempDir;

    fn event(fill: char, content: &str) -> InboundEvent {
        InboundEvent::new(
            std::iter::repeat(fill).take(64).collect::<String>(),
            "user_pk",
            content,
            100,
        )
    }

    async fn registry_with_projects(roots: &[(&str, &TempDir)]) -> ConversationRegistry {
        let registry = ConversationRegistry::new();
        for (project_id, temp) in roots {
            registry
                .register_project(*project_id, temp.path())
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp)]).await;

        let ev = event('a', "start the work");
        let first = registry.create(&ev, None).await.unwrap();
        let second = registry.create(&ev, None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_create_derives_title_and_registers_prefix() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp)]).await;

        let ev = event('a', "investigate the flaky test on CI");
        let store = registry.create(&ev, None).await.unwrap();
        assert_eq!(store.title().await, "investigate the flaky test on CI");

        // Prefix lookups now resolve the short form
        let by_prefix = registry.get(&ev.id[..12], None).await.unwrap();
        assert_eq!(by_prefix.id(), ev.id);
    }

    #[tokio::test]
    async fn test_get_or_load_without_project_is_contract_violation() {
        let registry = ConversationRegistry::new();
        let err = registry
            .get_or_load(&"a".repeat(64), None)
            .await
            .unwrap_err();
        assert!(err.is_project_context());
    }

    #[tokio::test]
    async fn test_get_never_errors_and_probes_siblings() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp_a), ("beta", &temp_b)]).await;

        // Create in beta, then look it up with alpha as the explicit project
        let ev = event('b', "conversation in beta");
        registry.create(&ev, Some("beta")).await.unwrap();
        // Drop the cache so the lookup has to go to disk
        registry.stores.write().await.clear();

        let found = registry.get(&ev.id, Some("alpha")).await.unwrap();
        assert_eq!(found.project_id(), "beta");

        // Unknown conversation is a clean None
        assert!(registry.get(&"f".repeat(64), Some("alpha")).await.is_none());
    }

    #[tokio::test]
    async fn test_three_tier_project_resolution() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp_a), ("beta", &temp_b)]).await;

        // Explicit beats ambient
        let resolved = with_project("beta", registry.resolve_project(Some("alpha"))).await;
        assert_eq!(resolved.unwrap(), "alpha");

        // Ambient beats legacy fallback
        let resolved = with_project("beta", registry.resolve_project(None)).await;
        assert_eq!(resolved.unwrap(), "beta");

        // Legacy fallback is the first-registered project
        assert_eq!(registry.resolve_project(None).await.unwrap(), "alpha");
    }

    #[tokio::test]
    async fn test_resolution_fails_without_any_project() {
        let registry = ConversationRegistry::new();
        let err = registry.resolve_project(None).await.unwrap_err();
        assert!(err.is_project_context());
    }

    #[tokio::test]
    async fn test_unresolved_prefix_passes_through() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp)]).await;

        assert_eq!(registry.resolve_id("abcdefabcdef"), "abcdefabcdef");
        assert!(registry.get("abcdefabcdef", None).await.is_none());
    }

    #[tokio::test]
    async fn test_archive_evicts_and_complete_saves_first() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp)]).await;

        let ev = event('a', "short lived");
        let store = registry.create(&ev, None).await.unwrap();
        store
            .add_event_message(&event('c', "one more message"), true)
            .await;

        registry.complete(&ev.id, None).await.unwrap();
        assert_eq!(registry.cached_count().await, 0);

        // The archived document reflects the unsaved message
        registry.restore(&ev.id, None).await.unwrap();
        let reloaded = registry.get_or_load(&ev.id, None).await.unwrap();
        assert_eq!(reloaded.history_len().await, 2);
    }

    #[tokio::test]
    async fn test_archive_unknown_conversation_is_noop() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp)]).await;
        registry.archive(&"e".repeat(64), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_search_degrades_gracefully_without_project() {
        let registry = ConversationRegistry::new();
        let outcome = registry
            .search_advanced(&SearchQuery::text("anything"), 10, None)
            .await;
        assert!(!outcome.success);
        assert!(outcome.results.is_empty());
        assert!(!outcome.error.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with_projects(&[("alpha", &temp)]).await;

        let ev = event('a', "to delete");
        registry.create(&ev, None).await.unwrap();
        registry.delete(&ev.id, None).await.unwrap();

        assert_eq!(registry.cached_count().await, 0);
        assert!(registry.list(None).await.unwrap().is_empty());
        assert!(registry.get(&ev.id, None).await.is_none());
    }
}
