use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::learning::domain::{
    Completion, CompletionKey, ContentItem, ContentItemId, ContentKind, ContentProgress, PageInfo,
    UserId,
};
use crate::learning::error::EngineError;
use crate::learning::repository::{RecordStore, UpsertOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProgressUpdate {
    pub content_item_id: ContentItemId,
    pub progress: f64,
    pub percentage: u32,
    pub completed: bool,
    /// Set when this call created the item completion.
    pub newly_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

/// Fractional progress on documents, pages, links, and SCORM packages.
pub struct ContentProgressTracker<S> {
    store: Arc<S>,
}

impl<S> ContentProgressTracker<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Videos and tests report through their own trackers.
    pub fn accepts(item: &ContentItem) -> Result<(), EngineError> {
        match item.kind {
            ContentKind::Video | ContentKind::Test => Err(EngineError::bad_request(format!(
                "{} items do not accept fractional progress",
                item.kind.label()
            ))),
            _ => Ok(()),
        }
    }

    /// Record `progress` (0..=1) for `user_id` on `item`. Stored progress never decreases, and an
    /// existing item completion keeps the item completed below the threshold.
    pub fn record(
        &self,
        user_id: &UserId,
        item: &ContentItem,
        progress: f64,
        page: Option<PageInfo>,
    ) -> Result<ContentProgressUpdate, EngineError> {
        Self::accepts(item)?;
        if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
            return Err(EngineError::bad_request(format!(
                "progress must be between 0 and 1, got {progress}"
            )));
        }

        let settings = self.store.settings()?;
        let threshold = item.threshold(settings.default_completion_threshold);
        let previous = self.store.content_progress(user_id, &item.id)?;
        let key = CompletionKey::item(user_id.clone(), item.course_id.clone(), item.id.clone());
        let already_completed = self.store.completion(&key)?.is_some();

        let stored_progress = previous
            .as_ref()
            .map_or(progress, |record| record.progress.max(progress));
        let page = page.unwrap_or(PageInfo {
            current_page: None,
            total_pages: None,
        });
        let now = Utc::now();
        let record = ContentProgress {
            user_id: user_id.clone(),
            content_item_id: item.id.clone(),
            course_id: item.course_id.clone(),
            progress: stored_progress,
            current_page: page
                .current_page
                .or_else(|| previous.as_ref().and_then(|record| record.current_page)),
            total_pages: page
                .total_pages
                .or_else(|| previous.as_ref().and_then(|record| record.total_pages)),
            completed: already_completed || stored_progress >= threshold,
            updated_at: now,
        };
        let completed = record.completed;
        self.store.save_content_progress(record)?;

        let (completion, newly_completed) = if completed {
            let (completion, outcome) = self.store.upsert_completion(key, now, None)?;
            let created = outcome == UpsertOutcome::Created;
            if created {
                info!(user = %user_id, item = %item.id, threshold, "content item completed");
            } else {
                debug!(user = %user_id, item = %item.id, "content item already completed");
            }
            (Some(completion), created)
        } else {
            (None, false)
        };

        Ok(ContentProgressUpdate {
            content_item_id: item.id.clone(),
            progress: stored_progress,
            percentage: (stored_progress * 100.0).round() as u32,
            completed,
            newly_completed,
            completion,
        })
    }

    pub fn progress(
        &self,
        user_id: &UserId,
        item: &ContentItem,
    ) -> Result<Option<ContentProgress>, EngineError> {
        let Some(mut record) = self.store.content_progress(user_id, &item.id)? else {
            return Ok(None);
        };
        if !record.completed {
            let key =
                CompletionKey::item(user_id.clone(), item.course_id.clone(), item.id.clone());
            record.completed = self.store.completion(&key)?.is_some();
        }
        Ok(Some(record))
    }
}
