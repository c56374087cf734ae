use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::sync::Arc;

use crate::core::types::PdfTaskMetadata;

/// Process-lifetime metadata of submitted document tasks, keyed by task id.
///
/// `take` removes atomically, so concurrent pollers that both observe a
/// finished task see the entry exactly once between them.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, PdfTaskMetadata>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: PdfTaskMetadata) {
        self.tasks.insert(metadata.task_id.clone(), metadata);
    }

    pub fn take(&self, task_id: &str) -> Option<PdfTaskMetadata> {
        self.tasks.remove(task_id).map(|(_, metadata)| metadata)
    }

    pub fn get(&self, task_id: &str) -> Option<PdfTaskMetadata> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    /// Remember the last page total the worker reported.
    pub fn note_progress(&self, task_id: &str, total: u32) {
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            entry.total_pages = Some(total);
        }
    }

    pub fn submitted_at(&self, task_id: &str) -> Option<DateTime<Local>> {
        self.tasks.get(task_id).map(|entry| entry.submitted_at)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
