use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use serde_json::Value;

use crate::learning::access::{Principal, Role};
use crate::learning::artifacts::TemplateArtifactStore;
use crate::learning::domain::{
    Completion, ContentItem, ContentItemId, ContentKind, Course, CourseId, Enrollment,
    EnrollmentPolicy, LearningPlan, PlanCourse, PlanId, Target, UserId,
};
use crate::learning::memory::InMemoryStore;
use crate::learning::repository::{ArtifactError, ArtifactStore};
use crate::learning::router::{USER_ID_HEADER, USER_ROLES_HEADER};
use crate::learning::service::LearningService;

pub(super) const CREATOR: &str = "creator-1";
pub(super) const INSTRUCTOR: &str = "teach-1";
pub(super) const CERT_BASE: &str = "https://certs.example.org";

pub(super) type Service = LearningService<InMemoryStore, TemplateArtifactStore>;

pub(super) struct Harness {
    pub store: Arc<InMemoryStore>,
    pub artifacts: Arc<TemplateArtifactStore>,
    pub service: Arc<Service>,
}

pub(super) fn build_service() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let artifacts = Arc::new(TemplateArtifactStore::new(CERT_BASE));
    let service = Arc::new(LearningService::new(store.clone(), artifacts.clone()));
    store.add_user(INSTRUCTOR);
    Harness {
        store,
        artifacts,
        service,
    }
}

pub(super) fn open_policy() -> EnrollmentPolicy {
    EnrollmentPolicy::default()
}

pub(super) fn approval_policy(max_enrollments: Option<u32>) -> EnrollmentPolicy {
    EnrollmentPolicy {
        requires_approval: true,
        max_enrollments,
        ..EnrollmentPolicy::default()
    }
}

pub(super) fn credential_policy() -> EnrollmentPolicy {
    EnrollmentPolicy {
        has_certificate: true,
        has_badge: true,
        ..EnrollmentPolicy::default()
    }
}

pub(super) fn course(id: &str, policy: EnrollmentPolicy) -> Course {
    Course {
        id: CourseId::new(id),
        title: format!("Course {id}"),
        created_by: UserId::new(CREATOR),
        instructors: vec![UserId::new(INSTRUCTOR)],
        policy,
    }
}

pub(super) fn item(id: &str, course_id: &str, kind: ContentKind) -> ContentItem {
    ContentItem {
        id: ContentItemId::new(id),
        course_id: CourseId::new(course_id),
        title: format!("Item {id}"),
        kind,
        required: true,
        completion_threshold: None,
    }
}

pub(super) fn plan(id: &str, courses: &[&str], sequential: bool, policy: EnrollmentPolicy) -> LearningPlan {
    LearningPlan {
        id: PlanId::new(id),
        title: format!("Plan {id}"),
        created_by: UserId::new(CREATOR),
        instructors: vec![UserId::new(INSTRUCTOR)],
        policy,
        courses: courses
            .iter()
            .map(|course_id| PlanCourse {
                course_id: CourseId::new(*course_id),
                required: true,
            })
            .collect(),
        sequential,
    }
}

/// Course with one required document per id in `items`.
pub(super) fn seed_course(harness: &Harness, id: &str, policy: EnrollmentPolicy, items: &[&str]) {
    harness.store.add_course(course(id, policy));
    for item_id in items {
        harness
            .store
            .add_content_item(item(item_id, id, ContentKind::Document));
    }
}

pub(super) fn course_target(id: &str) -> Target {
    Target::Course(CourseId::new(id))
}

pub(super) fn plan_target(id: &str) -> Target {
    Target::Plan(PlanId::new(id))
}

pub(super) fn creator() -> Principal {
    Principal::new(CREATOR, vec![Role::Instructor])
}

pub(super) fn instructor() -> Principal {
    Principal::new(INSTRUCTOR, vec![Role::Instructor])
}

pub(super) fn learner(id: &str) -> Principal {
    Principal::learner(id)
}

pub(super) fn admin() -> Principal {
    Principal::admin("admin-1")
}

pub(super) fn self_enroll(harness: &Harness, user: &str, target: &Target) -> Enrollment {
    harness.store.add_user(user);
    let principal = learner(user);
    harness
        .service
        .request_enrollment(&principal, &principal.id, target, None)
        .expect("self enrollment succeeds")
}

pub(super) fn finish_item(harness: &Harness, user: &str, item_id: &str) {
    harness
        .service
        .record_content_progress(&learner(user), &ContentItemId::new(item_id), 1.0, None)
        .expect("progress recorded");
}

/// Artifact store whose backend is down.
pub(super) struct BrokenArtifacts;

impl ArtifactStore for BrokenArtifacts {
    fn certificate_url(&self, _completion: &Completion, _title: &str) -> Result<String, ArtifactError> {
        Err(ArtifactError::Unavailable("renderer offline".to_string()))
    }
}

/// Artifact store that fails its first `failures` renders, then delegates to the template store.
pub(super) struct FlakyArtifacts {
    failures: AtomicU32,
    inner: TemplateArtifactStore,
}

impl FlakyArtifacts {
    pub(super) fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            inner: TemplateArtifactStore::new(CERT_BASE),
        }
    }
}

impl ArtifactStore for FlakyArtifacts {
    fn certificate_url(&self, completion: &Completion, title: &str) -> Result<String, ArtifactError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ArtifactError::Unavailable("renderer restarting".to_string()));
        }
        self.inner.certificate_url(completion, title)
    }
}

pub(super) fn request(method: &str, uri: &str, user: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, roles)) = user {
        builder = builder
            .header(USER_ID_HEADER, id)
            .header(USER_ROLES_HEADER, roles);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub(super) async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}
