//! Registry of concurrently executing agent turns (RALs).
//!
//! Entries live in a flat arena indexed by an integer handle, with
//! conversation-ID and project-ID secondary indices, so "list active RALs
//! for project X" is an index scan rather than a full-table filter. Entries
//! are ephemeral: created when a turn starts, mutated as it streams and
//! calls tools, removed on any terminal outcome.
//!
//! The pause/resume coordination protocol is expressed through the entry
//! state machine: when a new RAL starts in a conversation with active
//! siblings, those are paused; the new RAL may inject messages (delivered on
//! resume), send a followup into an active child delegation (delivered
//! immediately), or abort a paused sibling (refused, with the recorded
//! reason, for RALs mid-delegation without a cancellation path). Paused
//! siblings resume once the new RAL commits its first side-effecting action.
//!
//! There is no background reaper for entries whose owning task crashed
//! without deregistering: readers apply their own freshness check against
//! `last_activity_at`.

use std::collections::HashMap;

use tokio::sync::Mutex;

use palaver_core::error::{PalaverError, Result};
use palaver_core::ral::{PendingDelegation, RalEntry, RalState};

/// Opaque handle to a RAL entry in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RalHandle(usize);

#[derive(Default)]
struct RalArena {
    entries: Vec<Option<RalEntry>>,
    free: Vec<usize>,
    by_conversation: HashMap<String, Vec<RalHandle>>,
    by_project: HashMap<String, Vec<RalHandle>>,
    next_ral_number: u64,
    /// Activity timestamps are epoch seconds, so concurrent updates tie;
    /// this ordinal totally orders them.
    next_activity_seq: u64,
}

impl RalArena {
    fn bump_activity(&mut self) -> u64 {
        self.next_activity_seq += 1;
        self.next_activity_seq
    }

    fn insert(&mut self, entry: RalEntry) -> RalHandle {
        let conversation_id = entry.conversation_id.clone();
        let project_id = entry.project_id.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        let handle = RalHandle(slot);
        self.by_conversation
            .entry(conversation_id)
            .or_default()
            .push(handle);
        self.by_project.entry(project_id).or_default().push(handle);
        handle
    }

    fn get(&self, handle: RalHandle) -> Option<&RalEntry> {
        self.entries.get(handle.0).and_then(|slot| slot.as_ref())
    }

    fn get_mut(&mut self, handle: RalHandle) -> Option<&mut RalEntry> {
        self.entries.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    fn remove(&mut self, handle: RalHandle) -> Option<RalEntry> {
        let entry = self.entries.get_mut(handle.0)?.take()?;
        self.free.push(handle.0);
        if let Some(handles) = self.by_conversation.get_mut(&entry.conversation_id) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.by_conversation.remove(&entry.conversation_id);
            }
        }
        if let Some(handles) = self.by_project.get_mut(&entry.project_id) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.by_project.remove(&entry.project_id);
            }
        }
        Some(entry)
    }

    fn conversation_handles(&self, conversation_id: &str) -> Vec<RalHandle> {
        self.by_conversation
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Tracks every concurrently executing agent turn in the process.
#[derive(Default)]
pub struct RalRegistry {
    arena: Mutex<RalArena>,
}

impl RalRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly started turn and returns its handle.
    ///
    /// RAL numbers are unique and monotonically increasing within the
    /// process.
    pub async fn register(
        &self,
        conversation_id: impl Into<String>,
        project_id: impl Into<String>,
        agent_pubkey: impl Into<String>,
    ) -> RalHandle {
        let mut arena = self.arena.lock().await;
        arena.next_ral_number += 1;
        let mut entry = RalEntry::new(
            arena.next_ral_number,
            conversation_id,
            project_id,
            agent_pubkey,
            now_ts(),
        );
        entry.activity_seq = arena.bump_activity();
        arena.insert(entry)
    }

    /// Removes the entry on any terminal outcome (complete, abort, crash
    /// cleanup), returning it.
    pub async fn deregister(&self, handle: RalHandle) -> Option<RalEntry> {
        self.arena.lock().await.remove(handle)
    }

    /// Clones the entry behind a handle.
    pub async fn get(&self, handle: RalHandle) -> Option<RalEntry> {
        self.arena.lock().await.get(handle).cloned()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let arena = self.arena.lock().await;
        arena.entries.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether the registry has no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn with_entry<F, T>(&self, handle: RalHandle, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut RalEntry) -> Result<T>,
    {
        let mut arena = self.arena.lock().await;
        let seq = arena.bump_activity();
        let entry = arena
            .get_mut(handle)
            .ok_or_else(|| PalaverError::not_found("ral", format!("#{}", handle.0)))?;
        let result = mutate(entry)?;
        entry.touch(now_ts());
        entry.activity_seq = seq;
        Ok(result)
    }

    // ============================================================================
    // Activity updates
    // ============================================================================

    /// Marks the turn as streaming (or not).
    pub async fn set_streaming(&self, handle: RalHandle, is_streaming: bool) -> Result<()> {
        self.with_entry(handle, |entry| {
            entry.is_streaming = is_streaming;
            Ok(())
        })
        .await
    }

    /// Records a tool invocation starting.
    pub async fn begin_tool(&self, handle: RalHandle, tool: impl Into<String>) -> Result<()> {
        let tool = tool.into();
        self.with_entry(handle, |entry| {
            entry.current_tool = Some(tool.clone());
            entry.active_tools.insert(tool);
            Ok(())
        })
        .await
    }

    /// Records a tool invocation finishing.
    pub async fn end_tool(&self, handle: RalHandle, tool: &str) -> Result<()> {
        self.with_entry(handle, |entry| {
            entry.active_tools.remove(tool);
            if entry.current_tool.as_deref() == Some(tool) {
                entry.current_tool = None;
            }
            Ok(())
        })
        .await
    }

    /// Records a spawned child delegation the turn is now waiting on.
    pub async fn add_pending_delegation(
        &self,
        handle: RalHandle,
        delegation: PendingDelegation,
    ) -> Result<()> {
        self.with_entry(handle, |entry| {
            entry.pending_delegations.push(delegation);
            Ok(())
        })
        .await
    }

    /// Clears a pending delegation once the child reaches a terminal state.
    pub async fn resolve_pending_delegation(
        &self,
        handle: RalHandle,
        child_conversation_id: &str,
    ) -> Result<()> {
        self.with_entry(handle, |entry| {
            let before = entry.pending_delegations.len();
            entry
                .pending_delegations
                .retain(|d| d.child_conversation_id != child_conversation_id);
            if entry.pending_delegations.len() == before {
                return Err(PalaverError::not_found(
                    "delegation",
                    child_conversation_id.to_string(),
                ));
            }
            Ok(())
        })
        .await
    }

    // ============================================================================
    // Read paths
    // ============================================================================

    /// All live entries for a project (index scan).
    ///
    /// A RAL that crashed without deregistering stays listed; callers treat
    /// entries with an old `last_activity_at` as stale.
    pub async fn active_entries_for_project(&self, project_id: &str) -> Vec<RalEntry> {
        let arena = self.arena.lock().await;
        arena
            .by_project
            .get(project_id)
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| arena.get(*h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All live entries for a conversation.
    pub async fn entries_for_conversation(&self, conversation_id: &str) -> Vec<RalEntry> {
        let arena = self.arena.lock().await;
        arena
            .conversation_handles(conversation_id)
            .into_iter()
            .filter_map(|h| arena.get(h).cloned())
            .collect()
    }

    /// The entry a human most likely cares about right now, for
    /// prompt-context rendering: prefer streaming, then one with a current
    /// tool, then one with any active tool, then the most recently active.
    ///
    /// Recency compares `activity_seq`, not `last_activity_at`: the
    /// timestamps have second resolution and tie under concurrency.
    pub async fn primary_for_conversation(&self, conversation_id: &str) -> Option<RalEntry> {
        let entries = self.entries_for_conversation(conversation_id).await;
        entries.into_iter().max_by_key(|e| {
            (
                e.is_streaming,
                e.current_tool.is_some(),
                !e.active_tools.is_empty(),
                e.activity_seq,
            )
        })
    }

    // ============================================================================
    // Coordination protocol
    // ============================================================================

    /// Pauses every executing sibling of `new_handle` in the conversation.
    ///
    /// Returns the handles that were paused. Called when a new RAL starts
    /// while others are active.
    pub async fn pause_others(
        &self,
        conversation_id: &str,
        new_handle: RalHandle,
    ) -> Vec<RalHandle> {
        let mut arena = self.arena.lock().await;
        let now = now_ts();
        let mut paused = Vec::new();
        for handle in arena.conversation_handles(conversation_id) {
            if handle == new_handle {
                continue;
            }
            let seq = arena.bump_activity();
            if let Some(entry) = arena.get_mut(handle) {
                if entry.state.is_executing() && entry.transition(RalState::Paused, now).is_ok() {
                    entry.activity_seq = seq;
                    paused.push(handle);
                }
            }
        }
        paused
    }

    /// Queues a message for a paused RAL, delivered only when it next
    /// resumes — never mid-delegation.
    ///
    /// # Errors
    ///
    /// Returns `Execution` when the target is not paused; use
    /// [`followup`](Self::followup) to reach an active child delegation.
    pub async fn inject(&self, handle: RalHandle, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_entry(handle, |entry| {
            if entry.state != RalState::Paused {
                return Err(PalaverError::execution(format!(
                    "Cannot inject into a {} RAL; injection targets paused RALs",
                    entry.state
                )));
            }
            entry.queued_injections.push(message);
            Ok(())
        })
        .await
    }

    /// Validates a followup route into an active child delegation and
    /// returns it. Followups bypass the pause/resume cycle: the caller
    /// delivers into the child conversation immediately.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the RAL has no pending delegation for the
    /// child conversation.
    pub async fn followup(
        &self,
        handle: RalHandle,
        child_conversation_id: &str,
    ) -> Result<PendingDelegation> {
        self.with_entry(handle, |entry| {
            entry
                .pending_delegations
                .iter()
                .find(|d| d.child_conversation_id == child_conversation_id)
                .cloned()
                .ok_or_else(|| {
                    PalaverError::not_found("delegation", child_conversation_id.to_string())
                })
        })
        .await
    }

    /// Aborts a RAL and removes its entry, returning it.
    ///
    /// # Errors
    ///
    /// Returns `Execution` with the recorded reason when the RAL is
    /// non-abortable (mid-delegation without a cancellation path) — the
    /// reason must be surfaced to the coordinating RAL.
    pub async fn abort(&self, handle: RalHandle, reason: &str) -> Result<RalEntry> {
        let mut arena = self.arena.lock().await;
        let entry = arena
            .get_mut(handle)
            .ok_or_else(|| PalaverError::not_found("ral", format!("#{}", handle.0)))?;
        if let Some(block) = entry.abort_block_reason() {
            return Err(PalaverError::execution(block));
        }
        entry.transition(RalState::Aborted, now_ts())?;
        tracing::info!(
            ral_number = entry.ral_number,
            conversation_id = %entry.conversation_id,
            reason,
            "RAL aborted"
        );
        arena
            .remove(handle)
            .ok_or_else(|| PalaverError::internal("RAL entry vanished during abort"))
    }

    /// Resumes every paused RAL in the conversation, draining each one's
    /// queued injections for delivery.
    ///
    /// Called after the coordinating RAL commits its first side-effecting
    /// action. Returns `(handle, injected messages)` pairs.
    pub async fn resume_paused(&self, conversation_id: &str) -> Vec<(RalHandle, Vec<String>)> {
        let mut arena = self.arena.lock().await;
        let now = now_ts();
        let mut resumed = Vec::new();
        for handle in arena.conversation_handles(conversation_id) {
            let seq = arena.bump_activity();
            if let Some(entry) = arena.get_mut(handle) {
                if entry.state == RalState::Paused
                    && entry.transition(RalState::Resumed, now).is_ok()
                {
                    entry.activity_seq = seq;
                    resumed.push((handle, std::mem::take(&mut entry.queued_injections)));
                }
            }
        }
        resumed
    }
}
