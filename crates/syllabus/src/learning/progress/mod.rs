//! Per-item progress tracking. Trackers own their progress records and upsert the item-level
//! [`Completion`](super::domain::Completion) when a record crosses its threshold.

pub mod analytics;
pub mod content;
pub mod video;

pub use analytics::{video_analytics, HistogramBucket, VideoAnalytics};
pub use content::{ContentProgressTracker, ContentProgressUpdate};
pub use video::{VideoEvent, VideoProgressTracker, VideoProgressUpdate};
