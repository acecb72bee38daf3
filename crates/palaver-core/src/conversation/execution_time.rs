//! Execution-time accounting with crash-recovery semantics.

use serde::{Deserialize, Serialize};

/// Sessions whose `last_updated` is older than this are presumed lost after
/// an unclean process exit and reset without crediting the elapsed time.
pub const STALE_SESSION_SECS: i64 = 30 * 60;

/// Accumulated wall-clock time a conversation has been actively worked.
///
/// `start`/`stop` are idempotent: starting while active is a no-op, stopping
/// while inactive returns 0 and changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecutionTime {
    /// Total accumulated seconds across all sessions
    pub total_seconds: u64,
    /// When the current session started (epoch seconds), if one is active
    pub current_session_start: Option<i64>,
    /// Whether a session is currently active
    pub is_active: bool,
    /// Last time this record was touched (epoch seconds)
    pub last_updated: i64,
}

impl ExecutionTime {
    /// Starts a session. No-op when one is already active.
    pub fn start(&mut self, now: i64) {
        if self.is_active {
            return;
        }
        self.is_active = true;
        self.current_session_start = Some(now);
        self.last_updated = now;
    }

    /// Stops the active session, crediting the elapsed time.
    ///
    /// Returns the seconds credited, 0 when no session was active.
    pub fn stop(&mut self, now: i64) -> u64 {
        if !self.is_active {
            return 0;
        }
        let elapsed = self
            .current_session_start
            .map(|start| (now - start).max(0) as u64)
            .unwrap_or(0);
        self.total_seconds += elapsed;
        self.is_active = false;
        self.current_session_start = None;
        self.last_updated = now;
        elapsed
    }

    /// Applies the crash-recovery rule on load.
    ///
    /// A record that claims to be active but has not been updated within
    /// [`STALE_SESSION_SECS`] belonged to a process that exited uncleanly:
    /// the session is reset to inactive and the elapsed time is not credited.
    ///
    /// Returns true when a stale session was reset.
    pub fn recover_from_crash(&mut self, now: i64) -> bool {
        if self.is_active && now - self.last_updated > STALE_SESSION_SECS {
            self.is_active = false;
            self.current_session_start = None;
            self.last_updated = now;
            return true;
        }
        false
    }
}
