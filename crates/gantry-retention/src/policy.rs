//! Pure selection of what to keep and what to delete.

use gantry_core::pipeline::RetentionConfig;
use gantry_core::records::{ImageRecord, RunRecord};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Size of the retention window.
    pub keep_last: usize,
    /// Delete dangling image versions regardless of the window.
    pub delete_untagged: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: 2,
            delete_untagged: true,
        }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            keep_last: config.keep_last,
            delete_untagged: config.delete_untagged,
        }
    }
}

/// Outcome of applying a policy to a set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    pub keep: Vec<T>,
    pub delete: Vec<T>,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            keep: Vec::new(),
            delete: Vec::new(),
        }
    }
}

impl RetentionPolicy {
    pub fn new(keep_last: usize) -> Self {
        Self {
            keep_last,
            ..Self::default()
        }
    }

    /// Per repository: untagged versions go (when enabled), tagged versions
    /// are ordered newest first (ties broken by id) and all but the first
    /// `keep_last` go.
    pub fn select_images(&self, images: Vec<ImageRecord>) -> Selection<ImageRecord> {
        let mut by_repository: BTreeMap<String, Vec<ImageRecord>> = BTreeMap::new();
        for image in images {
            by_repository
                .entry(image.repository.clone())
                .or_default()
                .push(image);
        }

        let mut selection = Selection::default();
        for (_, images) in by_repository {
            let (mut tagged, untagged): (Vec<_>, Vec<_>) =
                images.into_iter().partition(ImageRecord::is_tagged);

            if self.delete_untagged {
                selection.delete.extend(untagged);
            } else {
                selection.keep.extend(untagged);
            }

            tagged.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
            let stale = tagged.split_off(self.keep_last.min(tagged.len()));
            selection.keep.extend(tagged);
            selection.delete.extend(stale);
        }
        selection
    }

    /// Newest `keep_last` runs survive regardless of status. `exclude` (the
    /// run doing the cleanup) is never selected for deletion; it occupies a
    /// window slot only when it falls inside the window.
    pub fn select_runs(&self, mut runs: Vec<RunRecord>, exclude: Option<&str>) -> Selection<RunRecord> {
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let mut selection = Selection::default();
        for (index, run) in runs.into_iter().enumerate() {
            if index < self.keep_last || exclude == Some(run.id.as_str()) {
                selection.keep.push(run);
            } else {
                selection.delete.push(run);
            }
        }
        selection
    }
}
