use super::common::*;
use crate::learning::domain::{
    CompletionKey, ContentItemId, CourseId, EnrollmentStatus, PlanId, UserId,
};
use crate::learning::error::EngineError;
use crate::learning::repository::{CompletionRepository, EnrollmentRepository};

fn aggregate_count(harness: &Harness, user: &str, target: &crate::learning::domain::Target) -> usize {
    harness
        .store
        .completions_for_user(&UserId::new(user), target)
        .expect("list")
        .into_iter()
        .filter(|completion| completion.key.is_aggregate())
        .count()
}

#[test]
fn course_completes_once_all_required_items_are_done() {
    let harness = build_service();
    seed_course(&harness, "rust-101", open_policy(), &["doc-a", "doc-b"]);
    let target = course_target("rust-101");
    let enrollment = self_enroll(&harness, "learner-1", &target);

    finish_item(&harness, "learner-1", "doc-a");
    let halfway = harness
        .service
        .is_course_complete(&learner("learner-1"), &UserId::new("learner-1"), &CourseId::new("rust-101"))
        .expect("evaluate");
    assert!(!halfway.complete);
    assert_eq!((halfway.satisfied, halfway.required), (1, 2));

    let receipt = harness
        .service
        .record_content_progress(&learner("learner-1"), &ContentItemId::new("doc-b"), 1.0, None)
        .expect("progress");
    assert_eq!(receipt.cascade.completed.len(), 1);
    assert!(receipt.cascade.credentials.is_empty());

    let again = harness
        .service
        .is_course_complete(&learner("learner-1"), &UserId::new("learner-1"), &CourseId::new("rust-101"))
        .expect("evaluate");
    assert!(again.complete);
    assert!(!again.newly_completed);
    assert_eq!(aggregate_count(&harness, "learner-1", &target), 1);

    let closed = harness
        .store
        .enrollment(&enrollment.id)
        .expect("lookup")
        .expect("present");
    assert_eq!(closed.status, EnrollmentStatus::Completed);
    assert!(closed.completed_at.is_some());
}

#[test]
fn courses_without_required_items_complete_on_evaluation() {
    let harness = build_service();
    harness.store.add_course(course("extras", open_policy()));
    let mut optional = item("extra", "extras", crate::learning::domain::ContentKind::Page);
    optional.required = false;
    harness.store.add_content_item(optional);
    self_enroll(&harness, "learner-1", &course_target("extras"));

    let evaluation = harness
        .service
        .is_course_complete(&learner("learner-1"), &UserId::new("learner-1"), &CourseId::new("extras"))
        .expect("evaluate");
    assert!(evaluation.complete);
    assert!(evaluation.newly_completed);
    assert_eq!((evaluation.satisfied, evaluation.required), (0, 0));
    assert!(evaluation.completion.is_some());
}

#[test]
fn optional_only_courses_do_not_lock_sequential_plans() {
    let harness = build_service();
    harness.store.add_course(course("warmup", open_policy()));
    let mut optional = item("welcome", "warmup", crate::learning::domain::ContentKind::Page);
    optional.required = false;
    harness.store.add_content_item(optional);
    seed_course(&harness, "course-b", open_policy(), &["b-1"]);
    harness
        .store
        .add_plan(plan("track", &["warmup", "course-b"], true, open_policy()));
    self_enroll(&harness, "learner-1", &plan_target("track"));
    let principal = learner("learner-1");

    let progress = harness
        .service
        .plan_progress(&principal, &principal.id, &PlanId::new("track"))
        .expect("progress");
    assert!(progress.courses[0].complete);
    assert!(!progress.courses[1].locked);

    let receipt = harness
        .service
        .record_content_progress(&principal, &ContentItemId::new("b-1"), 1.0, None)
        .expect("second course open");
    let targets: Vec<_> = receipt
        .cascade
        .completed
        .iter()
        .map(|evaluation| evaluation.target.clone())
        .collect();
    assert_eq!(targets, vec![course_target("course-b"), plan_target("track")]);
}

#[test]
fn optional_items_do_not_block_completion() {
    let harness = build_service();
    seed_course(&harness, "rust-101", open_policy(), &["doc-a"]);
    let mut optional = item("bonus", "rust-101", crate::learning::domain::ContentKind::Link);
    optional.required = false;
    harness.store.add_content_item(optional);
    self_enroll(&harness, "learner-1", &course_target("rust-101"));

    finish_item(&harness, "learner-1", "doc-a");
    let evaluation = harness
        .service
        .is_course_complete(&learner("learner-1"), &UserId::new("learner-1"), &CourseId::new("rust-101"))
        .expect("evaluate");
    assert!(evaluation.complete);
    assert_eq!(evaluation.required, 1);
}

#[test]
fn plan_completes_after_its_last_course() {
    let harness = build_service();
    seed_course(&harness, "course-a", open_policy(), &["a-1"]);
    seed_course(&harness, "course-b", open_policy(), &["b-1"]);
    harness
        .store
        .add_plan(plan("path", &["course-a", "course-b"], false, open_policy()));
    let enrollment = self_enroll(&harness, "learner-1", &plan_target("path"));

    finish_item(&harness, "learner-1", "a-1");
    let midway = harness
        .service
        .is_plan_complete(&learner("learner-1"), &UserId::new("learner-1"), &PlanId::new("path"))
        .expect("evaluate");
    assert!(!midway.complete);
    assert_eq!((midway.satisfied, midway.required), (1, 2));

    let receipt = harness
        .service
        .record_content_progress(&learner("learner-1"), &ContentItemId::new("b-1"), 1.0, None)
        .expect("progress");
    let targets: Vec<_> = receipt
        .cascade
        .completed
        .iter()
        .map(|evaluation| evaluation.target.clone())
        .collect();
    assert_eq!(targets, vec![course_target("course-b"), plan_target("path")]);

    let plan_completion = harness
        .store
        .completion(&CompletionKey::aggregate(UserId::new("learner-1"), plan_target("path")))
        .expect("lookup")
        .expect("plan completed");
    assert!(plan_completion.completed_at.is_some());
    assert_eq!(plan_completion.score, None);

    let closed = harness
        .store
        .enrollment(&enrollment.id)
        .expect("lookup")
        .expect("present");
    assert_eq!(closed.status, EnrollmentStatus::Completed);
}

#[test]
fn sequential_plans_lock_later_courses() {
    let harness = build_service();
    seed_course(&harness, "course-a", open_policy(), &["a-1"]);
    seed_course(&harness, "course-b", open_policy(), &["b-1"]);
    harness
        .store
        .add_plan(plan("track", &["course-a", "course-b"], true, open_policy()));
    self_enroll(&harness, "learner-1", &plan_target("track"));
    let principal = learner("learner-1");

    let locked = harness
        .service
        .record_content_progress(&principal, &ContentItemId::new("b-1"), 1.0, None);
    assert!(matches!(locked, Err(EngineError::Forbidden(_))));

    let progress = harness
        .service
        .plan_progress(&principal, &principal.id, &PlanId::new("track"))
        .expect("progress");
    assert!(!progress.courses[0].locked);
    assert!(progress.courses[1].locked);

    finish_item(&harness, "learner-1", "a-1");
    let progress = harness
        .service
        .plan_progress(&principal, &principal.id, &PlanId::new("track"))
        .expect("progress");
    assert!(progress.courses[0].complete);
    assert!(!progress.courses[1].locked);

    finish_item(&harness, "learner-1", "b-1");
    let progress = harness
        .service
        .plan_progress(&principal, &principal.id, &PlanId::new("track"))
        .expect("progress");
    assert!(progress.complete);
}

#[test]
fn direct_course_enrollment_bypasses_plan_locks() {
    let harness = build_service();
    seed_course(&harness, "course-a", open_policy(), &["a-1"]);
    seed_course(&harness, "course-b", open_policy(), &["b-1"]);
    harness
        .store
        .add_plan(plan("track", &["course-a", "course-b"], true, open_policy()));
    self_enroll(&harness, "learner-1", &plan_target("track"));
    self_enroll(&harness, "learner-1", &course_target("course-b"));

    let receipt = harness
        .service
        .record_content_progress(&learner("learner-1"), &ContentItemId::new("b-1"), 1.0, None)
        .expect("direct enrollment grants access");
    assert_eq!(receipt.cascade.completed.len(), 1);
}

#[test]
fn aggregate_score_is_the_mean_of_item_scores() {
    let harness = build_service();
    seed_course(&harness, "rust-101", open_policy(), &["doc-a", "doc-b"]);
    self_enroll(&harness, "learner-1", &course_target("rust-101"));
    for (item_id, score) in [("doc-a", 0.6), ("doc-b", 1.0)] {
        harness
            .store
            .upsert_completion(
                CompletionKey::item(
                    UserId::new("learner-1"),
                    CourseId::new("rust-101"),
                    ContentItemId::new(item_id),
                ),
                chrono::Utc::now(),
                Some(score),
            )
            .expect("item completion");
    }

    let evaluation = harness
        .service
        .is_course_complete(&learner("learner-1"), &UserId::new("learner-1"), &CourseId::new("rust-101"))
        .expect("evaluate");
    assert!(evaluation.newly_completed);
    let score = evaluation
        .completion
        .and_then(|completion| completion.score)
        .expect("score");
    assert!((score - 0.8).abs() < 1e-9);
}

#[test]
fn reading_another_learners_completion_needs_staff_rights() {
    let harness = build_service();
    seed_course(&harness, "rust-101", open_policy(), &["doc-a"]);
    self_enroll(&harness, "learner-1", &course_target("rust-101"));
    let learner_id = UserId::new("learner-1");
    let course_id = CourseId::new("rust-101");

    let peer = harness
        .service
        .is_course_complete(&learner("learner-2"), &learner_id, &course_id);
    assert!(matches!(peer, Err(EngineError::Forbidden(_))));

    let staff = harness
        .service
        .is_course_complete(&instructor(), &learner_id, &course_id)
        .expect("instructor reads");
    assert!(!staff.complete);

    let missing = harness
        .service
        .is_course_complete(&admin(), &learner_id, &CourseId::new("nope"));
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}
