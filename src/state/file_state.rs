use std::sync::Arc;

use crate::error::Result;
use crate::graph::{
    DiscoveredEntry, FileRecord, FileState, GraphStore, MarkDiscoveredReport, TransitionOptions,
};
use crate::state::Progress;

/// Per-file lifecycle contract (spec.md §4.2), backed by whatever
/// [`GraphStore`] the processor was configured with. The machine itself
/// holds no state — every call is a passthrough to the persisted store so
/// that a crash never leaves file lifecycle data in a process-local cache.
#[derive(Clone)]
pub struct FileStateMachine {
    store: Arc<dyn GraphStore>,
}

impl FileStateMachine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn mark_discovered_batch(
        &self,
        project_id: &str,
        entries: Vec<DiscoveredEntry>,
    ) -> Result<MarkDiscoveredReport> {
        self.store.mark_discovered_batch(project_id, entries).await
    }

    pub async fn transition(
        &self,
        uuid: &str,
        target: FileState,
        options: TransitionOptions,
    ) -> Result<()> {
        self.store.transition_file(uuid, target, options).await
    }

    pub async fn transition_batch(&self, uuids: &[String], target: FileState) -> Result<()> {
        self.store.transition_files_batch(uuids, target).await
    }

    pub async fn get_files_in_state(&self, project_id: &str, state: FileState) -> Result<Vec<FileRecord>> {
        self.store.get_files_in_state(project_id, state).await
    }

    pub async fn get_retryable_files(&self, project_id: &str, max_retries: u32) -> Result<Vec<FileRecord>> {
        self.store.get_retryable_files(project_id, max_retries).await
    }

    pub async fn get_state_stats(
        &self,
        project_id: &str,
    ) -> Result<std::collections::HashMap<FileState, usize>> {
        self.store.get_state_stats(project_id).await
    }

    pub async fn get_progress(&self, project_id: &str) -> Result<Progress> {
        let stats = self.get_state_stats(project_id).await?;
        let total: usize = stats.values().sum();
        let processed: usize = stats
            .iter()
            .filter(|(state, _)| super::is_terminal_file_state(**state))
            .map(|(_, count)| count)
            .sum();
        Ok(Progress::new(processed, total))
    }

    pub async fn is_project_fully_processed(&self, project_id: &str) -> Result<bool> {
        let stats = self.get_state_stats(project_id).await?;
        Ok(stats
            .iter()
            .all(|(state, count)| *count == 0 || super::is_terminal_file_state(*state)))
    }
}
