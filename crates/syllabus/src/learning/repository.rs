use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Completion, CompletionKey, ContentItem, ContentItemId, ContentProgress, Course, CourseId,
    Enrollment, EnrollmentId, EnrollmentStatus, LearningPlan, PlanId, Target, TargetRecord, Test,
    TestAttempt, TestId, UserId, VideoProgress, DEFAULT_COMPLETION_THRESHOLD, VIDEO_COMPLETION_THRESHOLD,
};

/// Error enumeration for record-store failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("capacity of {limit} reached")]
    CapacityReached { limit: u32 },
    #[error("expected status {expected:?}, found {found:?}")]
    StaleStatus {
        expected: EnrollmentStatus,
        found: EnrollmentStatus,
    },
    #[error("blocked by a record in status {0:?}")]
    Blocked(EnrollmentStatus),
    #[error("all {limit} attempts used")]
    AttemptsExhausted { limit: u32 },
    #[error("settings version {expected} is stale (current {current})")]
    StaleSettings { expected: u64, current: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the course catalog.
pub trait CatalogRepository: Send + Sync {
    fn course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError>;
    fn plan(&self, id: &PlanId) -> Result<Option<LearningPlan>, RepositoryError>;
    fn plans_containing(&self, course_id: &CourseId) -> Result<Vec<LearningPlan>, RepositoryError>;
    fn content_item(&self, id: &ContentItemId) -> Result<Option<ContentItem>, RepositoryError>;
    fn content_items(&self, course_id: &CourseId) -> Result<Vec<ContentItem>, RepositoryError>;
    fn test(&self, id: &TestId) -> Result<Option<Test>, RepositoryError>;
    fn user_exists(&self, id: &UserId) -> Result<bool, RepositoryError>;

    fn target(&self, target: &Target) -> Result<Option<TargetRecord>, RepositoryError> {
        Ok(match target {
            Target::Course(id) => self.course(id)?.map(TargetRecord::Course),
            Target::Plan(id) => self.plan(id)?.map(TargetRecord::Plan),
        })
    }
}

/// Status change applied atomically by [`EnrollmentRepository::transition`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub expected: EnrollmentStatus,
    pub next: EnrollmentStatus,
    pub actor: Option<UserId>,
    pub at: DateTime<Utc>,
}

/// Enrollment storage. Capacity is enforced inside the store so count and write share one
/// serializable scope.
pub trait EnrollmentRepository: Send + Sync {
    /// Insert unless (user, target) is taken. When the new status occupies a seat and
    /// `capacity` is set, the insert fails once occupied seats reach it.
    fn insert_enrollment(
        &self,
        enrollment: Enrollment,
        capacity: Option<u32>,
    ) -> Result<Enrollment, RepositoryError>;
    /// Compare-and-set on the status; the capacity rule applies when `next` occupies a seat.
    fn transition(
        &self,
        id: &EnrollmentId,
        change: StatusTransition,
        capacity: Option<u32>,
    ) -> Result<Enrollment, RepositoryError>;
    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError>;
    fn find_enrollment(
        &self,
        user_id: &UserId,
        target: &Target,
    ) -> Result<Option<Enrollment>, RepositoryError>;
    fn enrollments_for(&self, target: &Target) -> Result<Vec<Enrollment>, RepositoryError>;
    fn delete_enrollment(&self, id: &EnrollmentId) -> Result<Enrollment, RepositoryError>;
    /// Delete every enrollment of `target` unless one is in `blocking`; returns the removed rows.
    fn delete_enrollments_for(
        &self,
        target: &Target,
        blocking: EnrollmentStatus,
    ) -> Result<Vec<Enrollment>, RepositoryError>;
}

/// Per-item progress storage.
pub trait ProgressRepository: Send + Sync {
    fn content_progress(
        &self,
        user_id: &UserId,
        item_id: &ContentItemId,
    ) -> Result<Option<ContentProgress>, RepositoryError>;
    fn save_content_progress(&self, progress: ContentProgress) -> Result<(), RepositoryError>;
    /// Read-modify-write of one video record under the store's lock; `seed` is used when no
    /// record exists yet.
    fn modify_video_progress(
        &self,
        seed: VideoProgress,
        apply: &mut dyn FnMut(&mut VideoProgress),
    ) -> Result<VideoProgress, RepositoryError>;
    fn video_progress(
        &self,
        user_id: &UserId,
        item_id: &ContentItemId,
    ) -> Result<Option<VideoProgress>, RepositoryError>;
    fn video_progress_for_item(
        &self,
        item_id: &ContentItemId,
    ) -> Result<Vec<VideoProgress>, RepositoryError>;
}

/// Attempt fields known before the store assigns the sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptDraft {
    pub user_id: UserId,
    pub test_id: TestId,
    pub score: f64,
    pub passed: bool,
    pub points_earned: u64,
    pub points_total: u64,
    pub time_spent_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

pub trait AttemptRepository: Send + Sync {
    /// Assign the next attempt number for (user, test) and persist, rejecting the draft once
    /// `max_attempts` numbers have been handed out.
    fn append_attempt(
        &self,
        draft: AttemptDraft,
        max_attempts: Option<u32>,
    ) -> Result<TestAttempt, RepositoryError>;
    /// Attempts for (user, test) ordered by attempt number.
    fn attempts(&self, user_id: &UserId, test_id: &TestId)
        -> Result<Vec<TestAttempt>, RepositoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

pub trait CompletionRepository: Send + Sync {
    /// Atomic keyed upsert. An existing `completed_at` is kept; a new score replaces the old.
    fn upsert_completion(
        &self,
        key: CompletionKey,
        completed_at: DateTime<Utc>,
        score: Option<f64>,
    ) -> Result<(Completion, UpsertOutcome), RepositoryError>;
    fn completion(&self, key: &CompletionKey) -> Result<Option<Completion>, RepositoryError>;
    fn completions_for_user(
        &self,
        user_id: &UserId,
        target: &Target,
    ) -> Result<Vec<Completion>, RepositoryError>;
    /// Set the certificate unless one is already present. Returns the stored record and whether
    /// this call set it.
    fn stamp_certificate(
        &self,
        key: &CompletionKey,
        url: String,
        at: DateTime<Utc>,
    ) -> Result<(Completion, bool), RepositoryError>;
    /// Set the badge flag unless already awarded. Returns the stored record and whether this
    /// call set it.
    fn stamp_badge(
        &self,
        key: &CompletionKey,
        at: DateTime<Utc>,
    ) -> Result<(Completion, bool), RepositoryError>;
}

/// Versioned engine settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub version: u64,
    pub default_completion_threshold: f64,
    pub video_completion_threshold: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: 1,
            default_completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            video_completion_threshold: VIDEO_COMPLETION_THRESHOLD,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

pub trait SettingsRepository: Send + Sync {
    fn settings(&self) -> Result<EngineSettings, RepositoryError>;
    /// Single-writer update: applies only when `expected_version` is current and bumps it.
    fn update_settings(
        &self,
        expected_version: u64,
        next: EngineSettings,
    ) -> Result<EngineSettings, RepositoryError>;
}

/// Everything the engine needs from the transactional record store.
pub trait RecordStore:
    CatalogRepository
    + EnrollmentRepository
    + ProgressRepository
    + AttemptRepository
    + CompletionRepository
    + SettingsRepository
{
}

impl<T> RecordStore for T where
    T: CatalogRepository
        + EnrollmentRepository
        + ProgressRepository
        + AttemptRepository
        + CompletionRepository
        + SettingsRepository
{
}

/// Outbound certificate rendering/storage hook.
pub trait ArtifactStore: Send + Sync {
    fn certificate_url(&self, completion: &Completion, title: &str)
        -> Result<String, ArtifactError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
}
