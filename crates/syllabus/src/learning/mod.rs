//! Enrollment, progress tracking, completion aggregation, and credential issuance.
//!
//! Components talk to storage only through the repository traits in [`repository`]; the
//! capacity, upsert, and attempt-numbering contracts are enforced inside the store.
//! [`LearningService`] composes everything and runs the completion cascade.

pub mod access;
pub mod artifacts;
pub mod assessment;
pub mod completion;
pub mod credentials;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod memory;
pub mod progress;
pub mod repository;
pub mod roster;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use access::{authorize, Action, Decision, Principal, Resource, Role};
pub use artifacts::TemplateArtifactStore;
pub use assessment::{
    best_attempt, Answer, AnswerOutcome, AttemptResult, AttemptSubmission, AttemptSummary,
    TestAttemptEvaluator,
};
pub use completion::{AggregateEvaluation, CompletionAggregator, PlanCourseProgress, PlanProgress};
pub use credentials::{BadgeIssuer, CertificateIssuer, CredentialIssue};
pub use domain::{
    Completion, CompletionKey, ContentItem, ContentItemId, ContentKind, ContentProgress, Course,
    CourseId, Enrollment, EnrollmentId, EnrollmentPolicy, EnrollmentStatus, EnrollmentType,
    LearningPlan, PageInfo, PlanCourse, PlanId, Question, QuestionKind, Target, TargetRecord, Test,
    TestAttempt, TestId, UserId, VideoProgress, DEFAULT_COMPLETION_THRESHOLD,
    VIDEO_COMPLETION_THRESHOLD,
};
pub use enrollment::{BulkEnrollmentResult, BulkEntry, BulkFailure, CourseAccess, EnrollmentManager};
pub use error::EngineError;
pub use memory::InMemoryStore;
pub use progress::{
    ContentProgressTracker, ContentProgressUpdate, HistogramBucket, VideoAnalytics, VideoEvent,
    VideoProgressTracker, VideoProgressUpdate,
};
pub use repository::{
    ArtifactError, ArtifactStore, AttemptDraft, AttemptRepository, CatalogRepository,
    CompletionRepository, EngineSettings, EnrollmentRepository, ProgressRepository, RecordStore,
    RepositoryError, SettingsRepository, StatusTransition, UpsertOutcome,
};
pub use roster::{parse_roster, RosterImportError};
pub use router::{learning_router, principal_from_headers, USER_ID_HEADER, USER_ROLES_HEADER};
pub use service::{
    CompletionCascade, LearningService, PendingCredential, ProgressReceipt, SettingsUpdate,
};
