use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::analytics::{video_analytics, VideoAnalytics};
use crate::learning::domain::{
    Completion, CompletionKey, ContentItem, ContentKind, UserId, VideoProgress,
};
use crate::learning::error::EngineError;
use crate::learning::repository::{RecordStore, UpsertOutcome};

/// Player heartbeat for one video item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoEvent {
    pub watch_time_seconds: f64,
    pub total_duration_seconds: f64,
    pub position_seconds: f64,
    /// Set by the player when playback starts from the beginning again.
    #[serde(default)]
    pub new_view: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProgressUpdate {
    pub record: VideoProgress,
    pub newly_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

pub struct VideoProgressTracker<S> {
    store: Arc<S>,
}

impl<S> VideoProgressTracker<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn accepts(item: &ContentItem) -> Result<(), EngineError> {
        if item.kind == ContentKind::Video {
            Ok(())
        } else {
            Err(EngineError::bad_request(format!(
                "{} is a {} item, not a video",
                item.id,
                item.kind.label()
            )))
        }
    }

    /// Fold a heartbeat into the learner's record. Watch time is kept at its maximum and the
    /// completed flag, once set, stays set. An item completion recorded elsewhere counts as
    /// watched whatever the ratio says.
    pub fn record(
        &self,
        user_id: &UserId,
        item: &ContentItem,
        event: VideoEvent,
    ) -> Result<VideoProgressUpdate, EngineError> {
        Self::accepts(item)?;
        let values = [
            event.watch_time_seconds,
            event.total_duration_seconds,
            event.position_seconds,
        ];
        if values.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(EngineError::bad_request(
                "video timings must be finite and non-negative",
            ));
        }

        let threshold = self.store.settings()?.video_completion_threshold;
        let key = CompletionKey::item(user_id.clone(), item.course_id.clone(), item.id.clone());
        let recorded = self
            .store
            .completion(&key)?
            .and_then(|completion| completion.completed_at);
        let now = Utc::now();
        let seed = VideoProgress {
            user_id: user_id.clone(),
            content_item_id: item.id.clone(),
            course_id: item.course_id.clone(),
            watch_time_seconds: 0.0,
            total_duration_seconds: 0.0,
            last_position_seconds: 0.0,
            times_watched: 0,
            completed: false,
            completed_at: None,
            updated_at: now,
        };

        let record = self.store.modify_video_progress(seed, &mut |record: &mut VideoProgress| {
            if record.times_watched == 0 || event.new_view {
                record.times_watched += 1;
            }
            record.watch_time_seconds = record.watch_time_seconds.max(event.watch_time_seconds);
            if event.total_duration_seconds > 0.0 {
                record.total_duration_seconds = event.total_duration_seconds;
            }
            record.last_position_seconds = event.position_seconds;
            if !record.completed {
                if let Some(completed_at) = recorded {
                    record.completed = true;
                    record.completed_at = Some(completed_at);
                } else if record.watch_ratio().is_some_and(|ratio| ratio >= threshold) {
                    record.completed = true;
                    record.completed_at = Some(now);
                }
            }
            record.updated_at = now;
        })?;

        let (completion, newly_completed) = if record.completed {
            let (completion, outcome) = self.store.upsert_completion(key, now, None)?;
            let created = outcome == UpsertOutcome::Created;
            if created {
                info!(user = %user_id, item = %item.id, threshold, "video watched to completion");
            } else {
                debug!(user = %user_id, item = %item.id, "video already completed");
            }
            (Some(completion), created)
        } else {
            (None, false)
        };

        Ok(VideoProgressUpdate {
            record,
            newly_completed,
            completion,
        })
    }

    /// Resume position and view count for one learner, with the completed flag taken from the
    /// item completion when one exists.
    pub fn progress(
        &self,
        user_id: &UserId,
        item: &ContentItem,
    ) -> Result<Option<VideoProgress>, EngineError> {
        let Some(mut record) = self.store.video_progress(user_id, &item.id)? else {
            return Ok(None);
        };
        if !record.completed {
            let key =
                CompletionKey::item(user_id.clone(), item.course_id.clone(), item.id.clone());
            if let Some(completion) = self.store.completion(&key)? {
                record.completed = true;
                record.completed_at = completion.completed_at;
            }
        }
        Ok(Some(record))
    }

    pub fn analytics(&self, item: &ContentItem) -> Result<VideoAnalytics, EngineError> {
        Self::accepts(item)?;
        let records = self.store.video_progress_for_item(&item.id)?;
        let mut completed_elsewhere = HashSet::new();
        for record in &records {
            let key = CompletionKey::item(
                record.user_id.clone(),
                item.course_id.clone(),
                item.id.clone(),
            );
            if self.store.completion(&key)?.is_some() {
                completed_elsewhere.insert(record.user_id.clone());
            }
        }
        Ok(video_analytics(&item.id, &records, &completed_elsewhere))
    }
}
