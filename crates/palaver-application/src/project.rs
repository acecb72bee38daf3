//! Ambient "current project" context.
//!
//! The ambient project is carried in a task-local scope rather than a
//! module-level singleton, so deeply-nested calls observe it without
//! threading a parameter by hand, and concurrent tasks for different
//! projects cannot clobber each other.

use std::future::Future;

tokio::task_local! {
    static CURRENT_PROJECT: String;
}

/// Runs `fut` with `project_id` as the ambient current project.
///
/// Nested scopes shadow outer ones for their duration.
pub async fn with_project<F>(project_id: impl Into<String>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_PROJECT.scope(project_id.into(), fut).await
}

/// Returns the ambient current project, if the calling task is inside a
/// [`with_project`] scope.
pub fn current_project() -> Option<String> {
    CURRENT_PROJECT.try_with(|p| p.clone()).ok()
}
