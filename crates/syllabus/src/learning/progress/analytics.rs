use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::learning::domain::{ContentItemId, UserId, VideoProgress};

const DROP_OFF_BUCKETS: [(f64, Option<f64>, &str); 6] = [
    (0.0, Some(30.0), "0-30s"),
    (30.0, Some(60.0), "30-60s"),
    (60.0, Some(120.0), "1-2m"),
    (120.0, Some(300.0), "2-5m"),
    (300.0, Some(600.0), "5-10m"),
    (600.0, None, "10m+"),
];

const WATCH_PERCENT_BUCKETS: [(f64, f64, &str); 4] = [
    (0.0, 0.25, "0-25%"),
    (0.25, 0.5, "25-50%"),
    (0.5, 0.75, "50-75%"),
    (0.75, f64::INFINITY, "75-100%"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub label: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalytics {
    pub content_item_id: ContentItemId,
    pub total_views: u32,
    pub completed_views: u32,
    pub completion_rate: f64,
    pub average_watch_time_seconds: f64,
    pub average_completion_ratio: f64,
    /// Watch time of viewers who have not completed the video.
    pub drop_off: Vec<HistogramBucket>,
    /// Watched share of the duration, for records with a known duration.
    pub watch_percentage: Vec<HistogramBucket>,
}

/// Summarise every learner record for one video. Users in `completed_elsewhere` count as
/// completed whatever their own flag says.
pub fn video_analytics(
    item_id: &ContentItemId,
    records: &[VideoProgress],
    completed_elsewhere: &HashSet<UserId>,
) -> VideoAnalytics {
    let total_views = records.len() as u32;
    let is_completed =
        |record: &VideoProgress| completed_elsewhere.contains(&record.user_id) || record.completed;

    let completed_views = records.iter().filter(|record| is_completed(*record)).count() as u32;
    let average_watch_time_seconds = mean(records.iter().map(|record| record.watch_time_seconds));
    let ratios: Vec<f64> = records.iter().filter_map(VideoProgress::watch_ratio).collect();
    let average_completion_ratio = mean(ratios.iter().copied());

    let mut drop_off: Vec<HistogramBucket> = DROP_OFF_BUCKETS
        .iter()
        .map(|(_, _, label)| bucket(label))
        .collect();
    for record in records.iter().filter(|record| !is_completed(*record)) {
        let watched = record.watch_time_seconds;
        if let Some(index) = DROP_OFF_BUCKETS
            .iter()
            .position(|(low, high, _)| watched >= *low && high.map_or(true, |high| watched < high))
        {
            drop_off[index].count += 1;
        }
    }

    let mut watch_percentage: Vec<HistogramBucket> = WATCH_PERCENT_BUCKETS
        .iter()
        .map(|(_, _, label)| bucket(label))
        .collect();
    for ratio in &ratios {
        if let Some(index) = WATCH_PERCENT_BUCKETS
            .iter()
            .position(|(low, high, _)| ratio >= low && ratio < high)
        {
            watch_percentage[index].count += 1;
        }
    }

    VideoAnalytics {
        content_item_id: item_id.clone(),
        total_views,
        completed_views,
        completion_rate: if total_views == 0 {
            0.0
        } else {
            f64::from(completed_views) / f64::from(total_views)
        },
        average_watch_time_seconds,
        average_completion_ratio,
        drop_off,
        watch_percentage,
    }
}

fn bucket(label: &str) -> HistogramBucket {
    HistogramBucket {
        label: label.to_string(),
        count: 0,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}
