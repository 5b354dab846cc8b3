//! End-to-end completion scenarios: mixed content kinds roll up into course and plan
//! completions, credentials follow, and the HTTP surface reports the same state.

mod common {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use syllabus::learning::{
        Answer, AttemptSubmission, ContentItem, ContentItemId, ContentKind, Course, CourseId,
        EnrollmentPolicy, InMemoryStore, LearningPlan, LearningService, PlanCourse, PlanId,
        Question, QuestionKind, TemplateArtifactStore, Test, TestId, UserId,
    };

    pub(super) type Service = LearningService<InMemoryStore, TemplateArtifactStore>;

    pub(super) struct Campus {
        pub store: Arc<InMemoryStore>,
        pub artifacts: Arc<TemplateArtifactStore>,
        pub service: Arc<Service>,
    }

    fn item(id: &str, course: &str, kind: ContentKind, required: bool) -> ContentItem {
        ContentItem {
            id: ContentItemId::new(id),
            course_id: CourseId::new(course),
            title: id.to_string(),
            kind,
            required,
            completion_threshold: None,
        }
    }

    fn course(id: &str, title: &str, policy: EnrollmentPolicy) -> Course {
        Course {
            id: CourseId::new(id),
            title: title.to_string(),
            created_by: UserId::new("dean"),
            instructors: vec![UserId::new("coach")],
            policy,
        }
    }

    /// Plan "backend-path" = [rust-basics (video + quiz + optional link), async-rust (doc)],
    /// sequential, issuing a certificate on completion.
    pub(super) fn campus() -> Campus {
        let store = Arc::new(InMemoryStore::new());
        let artifacts = Arc::new(TemplateArtifactStore::new("https://certs.example.org"));
        let service = Arc::new(LearningService::new(store.clone(), artifacts.clone()));

        store.add_course(course("rust-basics", "Rust Basics", EnrollmentPolicy::default()));
        store.add_content_item(item("intro-video", "rust-basics", ContentKind::Video, true));
        store.add_content_item(item("basics-quiz", "rust-basics", ContentKind::Test, true));
        store.add_content_item(item("further-reading", "rust-basics", ContentKind::Link, false));
        store.add_test(Test {
            id: TestId::new("basics-test"),
            course_id: CourseId::new("rust-basics"),
            content_item_id: Some(ContentItemId::new("basics-quiz")),
            title: "Basics check".to_string(),
            passing_score: 0.75,
            max_attempts: Some(3),
            questions: vec![
                Question {
                    id: "ownership".to_string(),
                    prompt: "Who frees a Box?".to_string(),
                    kind: QuestionKind::SingleChoice,
                    options: vec!["caller".into(), "owner".into(), "gc".into()],
                    correct_options: vec![1],
                    accepted_answers: Vec::new(),
                    points: 3,
                },
                Question {
                    id: "macro".to_string(),
                    prompt: "Name the macro that prints a line".to_string(),
                    kind: QuestionKind::ShortAnswer,
                    options: Vec::new(),
                    correct_options: Vec::new(),
                    accepted_answers: vec!["println!".to_string(), "println".to_string()],
                    points: 1,
                },
            ],
        });

        store.add_course(course("async-rust", "Async Rust", EnrollmentPolicy::default()));
        store.add_content_item(item("executors", "async-rust", ContentKind::Document, true));

        store.add_plan(LearningPlan {
            id: PlanId::new("backend-path"),
            title: "Backend Path".to_string(),
            created_by: UserId::new("dean"),
            instructors: vec![UserId::new("coach")],
            policy: EnrollmentPolicy {
                has_certificate: true,
                ..EnrollmentPolicy::default()
            },
            courses: vec![
                PlanCourse {
                    course_id: CourseId::new("rust-basics"),
                    required: true,
                },
                PlanCourse {
                    course_id: CourseId::new("async-rust"),
                    required: true,
                },
            ],
            sequential: true,
        });

        Campus {
            store,
            artifacts,
            service,
        }
    }

    pub(super) fn submission(ownership: usize, macro_name: &str) -> AttemptSubmission {
        AttemptSubmission {
            answers: BTreeMap::from([
                ("ownership".to_string(), Answer::Choices(vec![ownership])),
                ("macro".to_string(), Answer::Text(macro_name.to_string())),
            ]),
            started_at: None,
            time_spent_seconds: Some(120),
        }
    }
}

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::Value;
use syllabus::learning::{
    learning_router, CompletionKey, CompletionRepository, ContentItemId, CourseId, EngineError,
    EnrollmentStatus, PlanId, Principal, Target, TestId, UserId, VideoEvent, USER_ID_HEADER,
    USER_ROLES_HEADER,
};
use tower::ServiceExt;

fn plan_target() -> Target {
    Target::Plan(PlanId::new("backend-path"))
}

#[test]
fn plan_completion_flows_from_mixed_content() {
    let campus = campus();
    let learner = Principal::learner("riley");
    let enrollment = campus
        .service
        .request_enrollment(&learner, &learner.id, &plan_target(), None)
        .expect("plan enrollment");

    let locked = campus.service.record_content_progress(
        &learner,
        &ContentItemId::new("executors"),
        1.0,
        None,
    );
    assert!(matches!(locked, Err(EngineError::Forbidden(_))));

    let video = campus
        .service
        .record_video_progress(
            &learner,
            &ContentItemId::new("intro-video"),
            VideoEvent {
                watch_time_seconds: 540.0,
                total_duration_seconds: 600.0,
                position_seconds: 590.0,
                new_view: false,
            },
        )
        .expect("video heartbeat");
    assert!(video.update.newly_completed);
    assert!(video.cascade.completed.is_empty());

    let failed = campus
        .service
        .submit_test_attempt(&learner, &TestId::new("basics-test"), submission(0, "println!"))
        .expect("first attempt");
    assert!(!failed.update.attempt.passed);
    assert_eq!(failed.update.remaining_attempts, Some(2));

    let passed = campus
        .service
        .submit_test_attempt(&learner, &TestId::new("basics-test"), submission(1, " PrintLn! "))
        .expect("second attempt");
    assert!(passed.update.attempt.passed);
    assert_eq!(passed.cascade.completed.len(), 1);
    assert_eq!(
        passed.cascade.completed[0].target,
        Target::Course(CourseId::new("rust-basics"))
    );

    let receipt = campus
        .service
        .record_content_progress(&learner, &ContentItemId::new("executors"), 1.0, None)
        .expect("second course unlocked");
    let completed: Vec<_> = receipt
        .cascade
        .completed
        .iter()
        .map(|evaluation| evaluation.target.clone())
        .collect();
    assert_eq!(
        completed,
        vec![Target::Course(CourseId::new("async-rust")), plan_target()]
    );
    assert_eq!(receipt.cascade.credentials.len(), 1);

    let issued = campus.artifacts.issued();
    assert_eq!(issued.len(), 1);
    assert!(issued[0].contains("/certificates/riley/plan-backend-path/"));

    let plan_completion = campus
        .store
        .completion(&CompletionKey::aggregate(UserId::new("riley"), plan_target()))
        .expect("lookup")
        .expect("plan complete");
    assert_eq!(plan_completion.certificate_url.as_deref(), Some(issued[0].as_str()));

    let closed = campus.service.enrollment(&enrollment.id).expect("enrollment");
    assert_eq!(closed.status, EnrollmentStatus::Completed);

    let again = campus
        .service
        .issue_certificate(&learner, &CompletionKey::aggregate(learner.id.clone(), plan_target()))
        .expect("reissue");
    assert!(!again.newly_issued);
    assert_eq!(campus.artifacts.issued().len(), 1);
}

#[tokio::test]
async fn plan_progress_is_visible_over_http() {
    let campus = campus();
    let learner = Principal::learner("riley");
    campus
        .service
        .request_enrollment(&learner, &learner.id, &plan_target(), None)
        .expect("plan enrollment");

    let response = learning_router(campus.service.clone())
        .oneshot(
            Request::get("/api/v1/plans/backend-path/progress?user_id=riley")
                .header(USER_ID_HEADER, "coach")
                .header(USER_ROLES_HEADER, "instructor")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let payload: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(payload["sequential"], true);
    assert_eq!(payload["complete"], false);
    assert_eq!(payload["courses"][0]["locked"], false);
    assert_eq!(payload["courses"][1]["locked"], true);
}
