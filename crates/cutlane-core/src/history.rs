//! Snapshot-based undo/redo.
//!
//! Every committed mutation records the project before and after. Between
//! `begin_batch` and `end_batch` only the snapshot taken at `begin_batch` is
//! kept, so a continuous drag collapses into a single undo step.

use tracing::debug;

use crate::model::Project;

const DEFAULT_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub label: String,
    pub before: Project,
    pub after: Project,
}

#[derive(Debug, Clone)]
struct OpenBatch {
    label: String,
    before: Project,
    depth: usize,
}

#[derive(Debug, Clone)]
pub struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    batch: Option<OpenBatch>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            batch: None,
            limit: limit.max(1),
        }
    }

    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[must_use]
    pub fn undo_labels(&self) -> Vec<&str> {
        self.undo.iter().map(|entry| entry.label.as_str()).collect()
    }

    /// Opens a batch; nested calls only deepen the existing one.
    pub fn begin_batch(&mut self, label: impl Into<String>, current: &Project) {
        match &mut self.batch {
            Some(batch) => batch.depth += 1,
            None => {
                self.batch = Some(OpenBatch {
                    label: label.into(),
                    before: current.clone(),
                    depth: 1,
                });
            }
        }
    }

    /// Closes one batch level. Returns `false` when no batch was open.
    pub fn end_batch(&mut self, current: &Project) -> bool {
        let Some(batch) = &mut self.batch else {
            return false;
        };
        batch.depth -= 1;
        if batch.depth > 0 {
            return true;
        }

        if let Some(batch) = self.batch.take()
            && batch.before != *current
        {
            self.push(HistoryEntry {
                label: batch.label,
                before: batch.before,
                after: current.clone(),
            });
        }
        true
    }

    /// Drops an open batch and hands back the project it started from.
    pub fn abort_batch(&mut self) -> Option<Project> {
        self.batch.take().map(|batch| batch.before)
    }

    pub fn record(&mut self, label: &str, before: Project, after: &Project) {
        if self.batch.is_some() {
            debug!(label, "mutation folded into open batch");
            return;
        }
        self.push(HistoryEntry {
            label: label.to_string(),
            before,
            after: after.clone(),
        });
    }

    pub fn undo(&mut self) -> Option<Project> {
        let entry = self.undo.pop()?;
        let before = entry.before.clone();
        self.redo.push(entry);
        Some(before)
    }

    pub fn redo(&mut self) -> Option<Project> {
        let entry = self.redo.pop()?;
        let after = entry.after.clone();
        self.undo.push(entry);
        Some(after)
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.redo.clear();
        self.undo.push(entry);
        if self.undo.len() > self.limit {
            let overflow = self.undo.len() - self.limit;
            self.undo.drain(..overflow);
        }
    }
}
