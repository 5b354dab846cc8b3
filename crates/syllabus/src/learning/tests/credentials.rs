use std::sync::Arc;

use super::common::*;
use crate::learning::domain::{
    CompletionKey, ContentItemId, ContentKind, CourseId, EnrollmentStatus, UserId,
};
use crate::learning::error::EngineError;
use crate::learning::memory::InMemoryStore;
use crate::learning::repository::CompletionRepository;
use crate::learning::service::LearningService;

fn course_key(user: &str, course: &str) -> CompletionKey {
    CompletionKey::aggregate(UserId::new(user), course_target(course))
}

#[test]
fn completion_issues_certificate_and_badge_once() {
    let harness = build_service();
    seed_course(&harness, "rust-101", credential_policy(), &["doc-a"]);
    self_enroll(&harness, "learner-1", &course_target("rust-101"));

    let receipt = harness
        .service
        .record_content_progress(&learner("learner-1"), &ContentItemId::new("doc-a"), 1.0, None)
        .expect("progress");
    assert_eq!(receipt.cascade.credentials.len(), 2);
    assert!(receipt
        .cascade
        .credentials
        .iter()
        .all(|issue| issue.newly_issued));

    let issued = harness.artifacts.issued();
    assert_eq!(issued.len(), 1);
    assert!(issued[0].starts_with(&format!(
        "{CERT_BASE}/certificates/learner-1/course-course-rust-101/SYL-"
    )));

    let key = course_key("learner-1", "rust-101");
    let again = harness
        .service
        .issue_certificate(&learner("learner-1"), &key)
        .expect("certificate");
    assert!(!again.newly_issued);
    assert_eq!(again.completion.certificate_url.as_deref(), Some(issued[0].as_str()));
    assert_eq!(harness.artifacts.issued().len(), 1);

    let badge = harness
        .service
        .award_badge(&learner("learner-1"), &key)
        .expect("badge");
    assert!(!badge.newly_issued);
    assert!(badge.completion.badge_awarded);
    assert!(badge.completion.badge_awarded_at.is_some());
}

#[test]
fn manual_issue_after_a_pull_evaluation() {
    let harness = build_service();
    seed_course(&harness, "rust-101", credential_policy(), &["doc-a"]);
    self_enroll(&harness, "learner-1", &course_target("rust-101"));
    harness
        .store
        .upsert_completion(
            CompletionKey::item(
                UserId::new("learner-1"),
                CourseId::new("rust-101"),
                ContentItemId::new("doc-a"),
            ),
            chrono::Utc::now(),
            None,
        )
        .expect("item completion");
    harness
        .store
        .upsert_completion(course_key("learner-1", "rust-101"), chrono::Utc::now(), None)
        .expect("course completion");

    let first = harness
        .service
        .issue_certificate(&admin(), &course_key("learner-1", "rust-101"))
        .expect("admin issues");
    assert!(first.newly_issued);
    assert!(first.completion.certificate_generated_at.is_some());

    let second = harness
        .service
        .issue_certificate(&learner("learner-1"), &course_key("learner-1", "rust-101"))
        .expect("owner reissues");
    assert!(!second.newly_issued);
    assert_eq!(
        second.completion.certificate_url,
        first.completion.certificate_url
    );
}

#[test]
fn certificates_require_an_enabled_completed_aggregate() {
    let harness = build_service();
    seed_course(&harness, "plain", open_policy(), &["doc-a"]);
    seed_course(&harness, "fancy", credential_policy(), &["doc-b", "doc-c"]);
    self_enroll(&harness, "learner-1", &course_target("plain"));
    self_enroll(&harness, "learner-1", &course_target("fancy"));
    finish_item(&harness, "learner-1", "doc-a");
    finish_item(&harness, "learner-1", "doc-b");
    let owner = learner("learner-1");

    let disabled = harness
        .service
        .issue_certificate(&owner, &course_key("learner-1", "plain"));
    assert!(matches!(disabled, Err(EngineError::BadRequest(_))));

    let unfinished = harness
        .service
        .issue_certificate(&owner, &course_key("learner-1", "fancy"));
    assert!(matches!(unfinished, Err(EngineError::BadRequest(_))));

    let item_key = CompletionKey::item(
        UserId::new("learner-1"),
        CourseId::new("fancy"),
        ContentItemId::new("doc-b"),
    );
    let per_item = harness.service.award_badge(&owner, &item_key);
    assert!(matches!(per_item, Err(EngineError::BadRequest(_))));

    let missing = harness
        .service
        .issue_certificate(&owner, &course_key("learner-1", "ghost"));
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
    assert!(harness.artifacts.issued().is_empty());
}

#[test]
fn only_the_owner_or_an_admin_may_request_credentials() {
    let harness = build_service();
    seed_course(&harness, "rust-101", credential_policy(), &["doc-a"]);
    self_enroll(&harness, "learner-1", &course_target("rust-101"));
    finish_item(&harness, "learner-1", "doc-a");
    let key = course_key("learner-1", "rust-101");

    let peer = harness.service.issue_certificate(&learner("learner-2"), &key);
    assert!(matches!(peer, Err(EngineError::Forbidden(_))));
    let peer_badge = harness.service.award_badge(&learner("learner-2"), &key);
    assert!(matches!(peer_badge, Err(EngineError::Forbidden(_))));

    let by_admin = harness
        .service
        .issue_certificate(&admin(), &key)
        .expect("admin may issue");
    assert!(by_admin.completion.certificate_url.is_some());
}

#[test]
fn artifact_failures_surface_as_internal_errors() {
    let store = Arc::new(InMemoryStore::new());
    let service = LearningService::new(store.clone(), Arc::new(BrokenArtifacts));
    store.add_course(course("rust-101", credential_policy()));
    store
        .upsert_completion(course_key("learner-1", "rust-101"), chrono::Utc::now(), None)
        .expect("course completion");

    let result = service.issue_certificate(&learner("learner-1"), &course_key("learner-1", "rust-101"));
    assert!(matches!(result, Err(EngineError::Internal(_))));

    let stored = store
        .completion(&course_key("learner-1", "rust-101"))
        .expect("lookup")
        .expect("present");
    assert!(stored.certificate_url.is_none());

    let badge = service
        .award_badge(&learner("learner-1"), &course_key("learner-1", "rust-101"))
        .expect("badges need no artifact");
    assert!(badge.newly_issued);
}

#[test]
fn failed_auto_issuance_is_retried_on_the_next_event() {
    let store = Arc::new(InMemoryStore::new());
    let service = LearningService::new(store.clone(), Arc::new(FlakyArtifacts::new(1)));
    store.add_course(course("rust-101", credential_policy()));
    store.add_content_item(item("doc-a", "rust-101", ContentKind::Document));
    store.add_user("learner-1");
    let owner = learner("learner-1");
    let enrollment = service
        .request_enrollment(&owner, &owner.id, &course_target("rust-101"), None)
        .expect("enrolled");
    let item_id = ContentItemId::new("doc-a");

    let first = service
        .record_content_progress(&owner, &item_id, 1.0, None)
        .expect("progress survives a renderer outage");
    assert_eq!(first.cascade.completed.len(), 1);
    assert_eq!(first.cascade.credentials.len(), 1);
    assert!(first.cascade.credentials[0].completion.badge_awarded);
    assert_eq!(first.cascade.pending.len(), 1);
    assert_eq!(first.cascade.pending[0].credential, "certificate");
    let closed = service.enrollment(&enrollment.id).expect("enrollment");
    assert_eq!(closed.status, EnrollmentStatus::Completed);

    let retry = service
        .record_content_progress(&owner, &item_id, 1.0, None)
        .expect("progress");
    assert!(retry.cascade.completed.is_empty());
    assert!(retry.cascade.pending.is_empty());
    assert_eq!(retry.cascade.credentials.len(), 1);
    assert!(retry.cascade.credentials[0]
        .completion
        .certificate_url
        .as_deref()
        .is_some_and(|url| url.starts_with(&format!("{CERT_BASE}/certificates/learner-1/"))));

    let settled = service
        .record_content_progress(&owner, &item_id, 1.0, None)
        .expect("progress");
    assert!(settled.cascade.credentials.is_empty());
    assert!(settled.cascade.pending.is_empty());
}
