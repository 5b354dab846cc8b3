use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::domain::Completion;
use super::repository::{ArtifactError, ArtifactStore};

/// Rendered URLs kept for inspection.
const RECENT_LIMIT: usize = 64;

/// Derives certificate URLs under a base URL, embedding a dated verification code.
pub struct TemplateArtifactStore {
    base_url: String,
    sequence: AtomicU64,
    recent: Mutex<VecDeque<String>>,
}

impl TemplateArtifactStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            sequence: AtomicU64::new(1),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_LIMIT)),
        }
    }

    /// The most recently rendered URLs, oldest first. Only the last `RECENT_LIMIT` are kept.
    pub fn issued(&self) -> Vec<String> {
        self.recent
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn verification_code(&self, at: DateTime<Utc>) -> String {
        let serial = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("SYL-{}-{serial:06}", at.format("%Y%m%d"))
    }
}

impl ArtifactStore for TemplateArtifactStore {
    fn certificate_url(
        &self,
        completion: &Completion,
        title: &str,
    ) -> Result<String, ArtifactError> {
        let completed_at = completion.completed_at.ok_or_else(|| {
            ArtifactError::Unavailable("cannot render a certificate without a completion date".to_string())
        })?;
        let code = self.verification_code(completed_at);
        let slug = slugify(title);
        let url = format!(
            "{}/certificates/{}/{}-{}/{code}.pdf",
            self.base_url,
            completion.key.user_id,
            completion.key.target.kind_label(),
            if slug.is_empty() {
                completion.key.target.id_str().to_string()
            } else {
                slug
            },
        );

        let mut recent = self
            .recent
            .lock()
            .map_err(|_| ArtifactError::Unavailable("artifact ledger poisoned".to_string()))?;
        if recent.len() == RECENT_LIMIT {
            recent.pop_front();
        }
        recent.push_back(url.clone());
        Ok(url)
    }
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::domain::{CompletionKey, CourseId, Target, UserId};
    use chrono::TimeZone;

    fn completion() -> Completion {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).single().expect("valid");
        Completion::new(
            CompletionKey::aggregate(
                UserId::new("learner-7"),
                Target::Course(CourseId::new("rust-101")),
            ),
            at,
            None,
        )
    }

    #[test]
    fn urls_embed_owner_target_and_dated_code() {
        let store = TemplateArtifactStore::new("https://certs.example.org/");
        let url = store
            .certificate_url(&completion(), "Rust: Ownership & Borrowing")
            .expect("url");

        assert_eq!(
            url,
            "https://certs.example.org/certificates/learner-7/course-rust-ownership-borrowing/SYL-20260314-000001.pdf"
        );
        assert_eq!(store.issued(), vec![url]);
    }

    #[test]
    fn blank_titles_fall_back_to_the_target_id() {
        let store = TemplateArtifactStore::new("https://certs.example.org");
        let url = store.certificate_url(&completion(), "  ").expect("url");
        assert!(url.contains("/course-rust-101/"));
    }

    #[test]
    fn only_recent_urls_are_retained() {
        let store = TemplateArtifactStore::new("https://certs.example.org");
        let mut last = String::new();
        for _ in 0..RECENT_LIMIT + 6 {
            last = store.certificate_url(&completion(), "Rust").expect("url");
        }

        let issued = store.issued();
        assert_eq!(issued.len(), RECENT_LIMIT);
        assert_eq!(issued.last(), Some(&last));
        assert!(issued[0].ends_with("SYL-20260314-000007.pdf"));
    }

    #[test]
    fn incomplete_records_are_rejected() {
        let store = TemplateArtifactStore::new("https://certs.example.org");
        let mut record = completion();
        record.completed_at = None;
        assert!(store.certificate_url(&record, "Rust").is_err());
        assert!(store.issued().is_empty());
    }
}
