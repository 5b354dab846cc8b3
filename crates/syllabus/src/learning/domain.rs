use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Item-level progress at or above this fraction counts as done when the item sets no threshold.
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 0.8;

/// Watch-time ratio at or above which a video counts as watched.
pub const VIDEO_COMPLETION_THRESHOLD: f64 = 0.8;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Learner or staff account reference.
    UserId
);
identifier!(CourseId);
identifier!(PlanId);
identifier!(ContentItemId);
identifier!(TestId);
identifier!(
    /// Store-assigned enrollment reference.
    EnrollmentId
);

/// The entity an enrollment or aggregate completion points at: a course XOR a learning plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Course(CourseId),
    Plan(PlanId),
}

impl Target {
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Target::Course(_) => "course",
            Target::Plan(_) => "plan",
        }
    }

    pub fn id_str(&self) -> &str {
        match self {
            Target::Course(id) => id.as_str(),
            Target::Plan(id) => id.as_str(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_label(), self.id_str())
    }
}

/// Enrollment configuration shared by courses and plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentPolicy {
    pub self_enrollment: bool,
    pub requires_approval: bool,
    pub max_enrollments: Option<u32>,
    pub has_certificate: bool,
    pub has_badge: bool,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            self_enrollment: true,
            requires_approval: false,
            max_enrollments: None,
            has_certificate: false,
            has_badge: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub created_by: UserId,
    #[serde(default)]
    pub instructors: Vec<UserId>,
    #[serde(default)]
    pub policy: EnrollmentPolicy,
}

/// Membership of a course inside a plan; insertion order is the plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCourse {
    pub course_id: CourseId,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPlan {
    pub id: PlanId,
    pub title: String,
    pub created_by: UserId,
    #[serde(default)]
    pub instructors: Vec<UserId>,
    #[serde(default)]
    pub policy: EnrollmentPolicy,
    pub courses: Vec<PlanCourse>,
    /// Courses unlock one after another for learners enrolled only through this plan.
    #[serde(default)]
    pub sequential: bool,
}

impl LearningPlan {
    pub fn contains(&self, course_id: &CourseId) -> bool {
        self.courses.iter().any(|entry| &entry.course_id == course_id)
    }
}

/// Whichever entity an enrollment targets, loaded from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRecord {
    Course(Course),
    Plan(LearningPlan),
}

impl TargetRecord {
    pub fn target(&self) -> Target {
        match self {
            TargetRecord::Course(course) => Target::Course(course.id.clone()),
            TargetRecord::Plan(plan) => Target::Plan(plan.id.clone()),
        }
    }

    pub fn policy(&self) -> &EnrollmentPolicy {
        match self {
            TargetRecord::Course(course) => &course.policy,
            TargetRecord::Plan(plan) => &plan.policy,
        }
    }

    pub fn created_by(&self) -> &UserId {
        match self {
            TargetRecord::Course(course) => &course.created_by,
            TargetRecord::Plan(plan) => &plan.created_by,
        }
    }

    pub fn instructors(&self) -> &[UserId] {
        match self {
            TargetRecord::Course(course) => &course.instructors,
            TargetRecord::Plan(plan) => &plan.instructors,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            TargetRecord::Course(course) => &course.title,
            TargetRecord::Plan(plan) => &plan.title,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Document,
    Page,
    Link,
    Scorm,
    Video,
    Test,
}

impl ContentKind {
    pub const fn label(self) -> &'static str {
        match self {
            ContentKind::Document => "document",
            ContentKind::Page => "page",
            ContentKind::Link => "link",
            ContentKind::Scorm => "scorm",
            ContentKind::Video => "video",
            ContentKind::Test => "test",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentItemId,
    pub course_id: CourseId,
    pub title: String,
    pub kind: ContentKind,
    #[serde(default = "required_by_default")]
    pub required: bool,
    #[serde(default)]
    pub completion_threshold: Option<f64>,
}

impl ContentItem {
    /// The item's own threshold, or `fallback` when unset or unusable.
    pub fn threshold(&self, fallback: f64) -> f64 {
        self.completion_threshold
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
    /// Indexes into `options` for choice questions.
    #[serde(default)]
    pub correct_options: Vec<usize>,
    /// Case-insensitive accepted responses for short answers.
    #[serde(default)]
    pub accepted_answers: Vec<String>,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub id: TestId,
    pub course_id: CourseId,
    /// Content item completed by a passing attempt.
    #[serde(default)]
    pub content_item_id: Option<ContentItemId>,
    pub title: String,
    /// Fraction of total points needed to pass.
    pub passing_score: f64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    PendingApproval,
    Enrolled,
    InProgress,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::PendingApproval => "PENDING_APPROVAL",
            EnrollmentStatus::Enrolled => "ENROLLED",
            EnrollmentStatus::InProgress => "IN_PROGRESS",
            EnrollmentStatus::Completed => "COMPLETED",
            EnrollmentStatus::Dropped => "DROPPED",
        }
    }

    /// Statuses counted against a target's capacity.
    pub const fn occupies_seat(self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled | EnrollmentStatus::InProgress)
    }

    /// Statuses under which content may be consumed.
    pub const fn grants_access(self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Enrolled | EnrollmentStatus::InProgress | EnrollmentStatus::Completed
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, EnrollmentStatus::Completed | EnrollmentStatus::Dropped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentType {
    Manual,
    #[serde(rename = "self")]
    SelfService,
    Group,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub target: Target,
    pub status: EnrollmentStatus,
    pub enrollment_type: EnrollmentType,
    pub enrolled_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentProgress {
    pub user_id: UserId,
    pub content_item_id: ContentItemId,
    pub course_id: CourseId,
    pub progress: f64,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProgress {
    pub user_id: UserId,
    pub content_item_id: ContentItemId,
    pub course_id: CourseId,
    pub watch_time_seconds: f64,
    pub total_duration_seconds: f64,
    pub last_position_seconds: f64,
    pub times_watched: u32,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl VideoProgress {
    pub fn watch_ratio(&self) -> Option<f64> {
        (self.total_duration_seconds > 0.0)
            .then(|| self.watch_time_seconds / self.total_duration_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestAttempt {
    pub user_id: UserId,
    pub test_id: TestId,
    pub attempt_number: u32,
    pub score: f64,
    pub passed: bool,
    pub points_earned: u64,
    pub points_total: u64,
    pub time_spent_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

/// Unique key of a completion: item-level when `content_item_id` is set, aggregate otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionKey {
    pub user_id: UserId,
    pub target: Target,
    #[serde(default)]
    pub content_item_id: Option<ContentItemId>,
}

impl CompletionKey {
    pub fn item(user_id: UserId, course_id: CourseId, content_item_id: ContentItemId) -> Self {
        Self {
            user_id,
            target: Target::Course(course_id),
            content_item_id: Some(content_item_id),
        }
    }

    pub fn aggregate(user_id: UserId, target: Target) -> Self {
        Self {
            user_id,
            target,
            content_item_id: None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.content_item_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub key: CompletionKey,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub certificate_url: Option<String>,
    pub certificate_generated_at: Option<DateTime<Utc>>,
    pub badge_awarded: bool,
    pub badge_awarded_at: Option<DateTime<Utc>>,
}

impl Completion {
    pub fn new(key: CompletionKey, completed_at: DateTime<Utc>, score: Option<f64>) -> Self {
        Self {
            key,
            completed_at: Some(completed_at),
            score,
            certificate_url: None,
            certificate_generated_at: None,
            badge_awarded: false,
            badge_awarded_at: None,
        }
    }
}
