use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::{authorize, Action, Decision, Principal, Resource, Role};
use super::assessment::{AttemptResult, AttemptSubmission, AttemptSummary, TestAttemptEvaluator};
use super::completion::{AggregateEvaluation, CompletionAggregator, PlanProgress};
use super::credentials::{BadgeIssuer, CertificateIssuer, CredentialIssue};
use super::domain::{
    CompletionKey, ContentItem, ContentItemId, ContentProgress, Course, CourseId, Enrollment,
    EnrollmentId, PageInfo, PlanId, Target, TargetRecord, TestId, UserId, VideoProgress,
};
use super::enrollment::{BulkEnrollmentResult, BulkEntry, CourseAccess, EnrollmentManager};
use super::error::EngineError;
use super::progress::{
    ContentProgressTracker, ContentProgressUpdate, VideoAnalytics, VideoEvent,
    VideoProgressTracker, VideoProgressUpdate,
};
use super::repository::{ArtifactStore, EngineSettings, RecordStore};

/// Threshold changes accepted by [`LearningService::update_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub expected_version: u64,
    #[serde(default)]
    pub default_completion_threshold: Option<f64>,
    #[serde(default)]
    pub video_completion_threshold: Option<f64>,
}

/// Aggregate completions produced by one event, including plan fan-out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionCascade {
    pub completed: Vec<AggregateEvaluation>,
    /// Credentials issued by this event.
    pub credentials: Vec<CredentialIssue>,
    /// Credentials that could not be issued; the next event on the target retries them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingCredential>,
}

impl CompletionCascade {
    fn absorb(&mut self, other: CompletionCascade) {
        self.completed.extend(other.completed);
        self.credentials.extend(other.credentials);
        self.pending.extend(other.pending);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCredential {
    pub target: Target,
    pub credential: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReceipt<T> {
    #[serde(flatten)]
    pub update: T,
    pub cascade: CompletionCascade,
}

/// Facade composing enrollment, progress, assessment, completion, and credential components
/// over one record store and artifact store.
pub struct LearningService<S, A> {
    store: Arc<S>,
    enrollments: EnrollmentManager<S>,
    content: ContentProgressTracker<S>,
    videos: VideoProgressTracker<S>,
    tests: TestAttemptEvaluator<S>,
    aggregator: CompletionAggregator<S>,
    certificates: CertificateIssuer<S, A>,
    badges: BadgeIssuer<S>,
}

impl<S, A> LearningService<S, A>
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    pub fn new(store: Arc<S>, artifacts: Arc<A>) -> Self {
        Self {
            enrollments: EnrollmentManager::new(store.clone()),
            content: ContentProgressTracker::new(store.clone()),
            videos: VideoProgressTracker::new(store.clone()),
            tests: TestAttemptEvaluator::new(store.clone()),
            aggregator: CompletionAggregator::new(store.clone()),
            certificates: CertificateIssuer::new(store.clone(), artifacts),
            badges: BadgeIssuer::new(store.clone()),
            store,
        }
    }

    pub fn request_enrollment(
        &self,
        actor: &Principal,
        user_id: &UserId,
        target: &Target,
        due_date: Option<NaiveDate>,
    ) -> Result<Enrollment, EngineError> {
        self.enrollments
            .request_enrollment(actor, user_id, target, due_date)
    }

    pub fn approve_enrollment(
        &self,
        actor: &Principal,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EngineError> {
        self.enrollments.approve(actor, enrollment_id)
    }

    pub fn remove_enrollment(
        &self,
        actor: &Principal,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EngineError> {
        self.enrollments.remove(actor, enrollment_id)
    }

    pub fn drop_enrollment(
        &self,
        actor: &Principal,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EngineError> {
        self.enrollments.drop_enrollment(actor, enrollment_id)
    }

    pub fn purge_enrollments(
        &self,
        actor: &Principal,
        target: &Target,
    ) -> Result<Vec<Enrollment>, EngineError> {
        self.enrollments.purge_enrollments(actor, target)
    }

    pub fn bulk_enroll(
        &self,
        actor: &Principal,
        user_ids: &[UserId],
        target: &Target,
        due_date: Option<NaiveDate>,
    ) -> Result<BulkEnrollmentResult, EngineError> {
        self.enrollments
            .bulk_enroll(actor, user_ids, target, due_date)
    }

    /// Bulk enrollment with a due date per user, as read from a roster file.
    pub fn bulk_enroll_roster(
        &self,
        actor: &Principal,
        entries: &[BulkEntry],
        target: &Target,
    ) -> Result<BulkEnrollmentResult, EngineError> {
        self.enrollments.bulk_enroll_entries(actor, entries, target)
    }

    pub fn enrollment(&self, enrollment_id: &EnrollmentId) -> Result<Enrollment, EngineError> {
        self.enrollments.enrollment(enrollment_id)
    }

    pub fn record_content_progress(
        &self,
        actor: &Principal,
        item_id: &ContentItemId,
        progress: f64,
        page: Option<PageInfo>,
    ) -> Result<ProgressReceipt<ContentProgressUpdate>, EngineError> {
        let item = self.load_item(item_id)?;
        ContentProgressTracker::<S>::accepts(&item)?;
        let access = self.gate(&actor.id, &item)?;

        let update = self.content.record(&actor.id, &item, progress, page)?;
        self.touch(&access)?;
        let cascade = if update.completed {
            self.cascade_course(&actor.id, &item.course_id)?
        } else {
            CompletionCascade::default()
        };
        Ok(ProgressReceipt { update, cascade })
    }

    pub fn record_video_progress(
        &self,
        actor: &Principal,
        item_id: &ContentItemId,
        event: VideoEvent,
    ) -> Result<ProgressReceipt<VideoProgressUpdate>, EngineError> {
        let item = self.load_item(item_id)?;
        VideoProgressTracker::<S>::accepts(&item)?;
        let access = self.gate(&actor.id, &item)?;

        let update = self.videos.record(&actor.id, &item, event)?;
        self.touch(&access)?;
        let cascade = if update.record.completed {
            self.cascade_course(&actor.id, &item.course_id)?
        } else {
            CompletionCascade::default()
        };
        Ok(ProgressReceipt { update, cascade })
    }

    /// Stored progress on a document-like item. Reading another learner's needs staff rights
    /// on the course.
    pub fn content_progress(
        &self,
        actor: &Principal,
        user_id: &UserId,
        item_id: &ContentItemId,
    ) -> Result<Option<ContentProgress>, EngineError> {
        let item = self.load_item(item_id)?;
        ContentProgressTracker::<S>::accepts(&item)?;
        self.ensure_can_view(actor, user_id, &Target::Course(item.course_id.clone()))?;
        self.content.progress(user_id, &item)
    }

    /// Resume state of a video for one learner.
    pub fn video_progress(
        &self,
        actor: &Principal,
        user_id: &UserId,
        item_id: &ContentItemId,
    ) -> Result<Option<VideoProgress>, EngineError> {
        let item = self.load_item(item_id)?;
        VideoProgressTracker::<S>::accepts(&item)?;
        self.ensure_can_view(actor, user_id, &Target::Course(item.course_id.clone()))?;
        self.videos.progress(user_id, &item)
    }

    pub fn submit_test_attempt(
        &self,
        actor: &Principal,
        test_id: &TestId,
        submission: AttemptSubmission,
    ) -> Result<ProgressReceipt<AttemptResult>, EngineError> {
        let test = self.tests.load_test(test_id)?;
        let course = self.load_course(&test.course_id)?;
        let access = self.gate_course(&actor.id, &course)?;

        let result = self.tests.submit(&actor.id, &test, submission)?;
        self.touch(&access)?;
        let cascade = if result.completion.is_some() {
            self.cascade_course(&actor.id, &test.course_id)?
        } else {
            CompletionCascade::default()
        };
        Ok(ProgressReceipt {
            update: result,
            cascade,
        })
    }

    pub fn attempt_summary(
        &self,
        user_id: &UserId,
        test_id: &TestId,
    ) -> Result<AttemptSummary, EngineError> {
        let test = self.tests.load_test(test_id)?;
        self.tests.summary(user_id, &test)
    }

    /// Evaluate course completion for `user_id`. Reading someone else's completion needs staff
    /// rights on the course.
    pub fn is_course_complete(
        &self,
        actor: &Principal,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<AggregateEvaluation, EngineError> {
        self.ensure_can_view(actor, user_id, &Target::Course(course_id.clone()))?;
        let evaluation = self.aggregator.is_course_complete(user_id, course_id)?;
        if evaluation.complete {
            self.follow_up(&evaluation, &mut CompletionCascade::default())?;
            self.fan_out(user_id, course_id)?;
        }
        Ok(evaluation)
    }

    pub fn is_plan_complete(
        &self,
        actor: &Principal,
        user_id: &UserId,
        plan_id: &PlanId,
    ) -> Result<AggregateEvaluation, EngineError> {
        self.ensure_can_view(actor, user_id, &Target::Plan(plan_id.clone()))?;
        let evaluation = self.aggregator.is_plan_complete(user_id, plan_id)?;
        if evaluation.complete {
            self.follow_up(&evaluation, &mut CompletionCascade::default())?;
        }
        Ok(evaluation)
    }

    pub fn plan_progress(
        &self,
        actor: &Principal,
        user_id: &UserId,
        plan_id: &PlanId,
    ) -> Result<PlanProgress, EngineError> {
        self.ensure_can_view(actor, user_id, &Target::Plan(plan_id.clone()))?;
        self.aggregator.plan_progress(user_id, plan_id)
    }

    pub fn issue_certificate(
        &self,
        actor: &Principal,
        key: &CompletionKey,
    ) -> Result<CredentialIssue, EngineError> {
        self.certificates.issue(actor, key)
    }

    pub fn award_badge(
        &self,
        actor: &Principal,
        key: &CompletionKey,
    ) -> Result<CredentialIssue, EngineError> {
        self.badges.award(actor, key)
    }

    pub fn video_analytics(
        &self,
        actor: &Principal,
        item_id: &ContentItemId,
    ) -> Result<VideoAnalytics, EngineError> {
        let item = self.load_item(item_id)?;
        let course = self.load_course(&item.course_id)?;
        let record = TargetRecord::Course(course);
        if let Decision::Deny(reason) =
            authorize(actor, Action::ViewAnalytics, &Resource::target(&record))
        {
            warn!(actor = %actor.id, item = %item_id, "analytics denied");
            return Err(EngineError::forbidden(reason));
        }
        self.videos.analytics(&item)
    }

    pub fn settings(&self) -> Result<EngineSettings, EngineError> {
        Ok(self.store.settings()?)
    }

    /// Single-writer update guarded by the settings version.
    pub fn update_settings(
        &self,
        actor: &Principal,
        update: SettingsUpdate,
    ) -> Result<EngineSettings, EngineError> {
        if let Decision::Deny(reason) =
            authorize(actor, Action::ManageSettings, &Resource::default())
        {
            warn!(actor = %actor.id, "settings update denied");
            return Err(EngineError::forbidden(reason));
        }

        let current = self.store.settings()?;
        let next = EngineSettings {
            version: current.version,
            default_completion_threshold: validated_threshold(
                update.default_completion_threshold,
                current.default_completion_threshold,
            )?,
            video_completion_threshold: validated_threshold(
                update.video_completion_threshold,
                current.video_completion_threshold,
            )?,
            updated_at: Utc::now(),
        };
        let stored = self.store.update_settings(update.expected_version, next)?;
        info!(version = stored.version, actor = %actor.id, "engine settings updated");
        Ok(stored)
    }

    /// Progress needs an access-granting enrollment in the course or a plan containing it;
    /// sequential plans additionally lock courses behind unfinished earlier ones.
    fn gate(&self, user_id: &UserId, item: &ContentItem) -> Result<CourseAccess, EngineError> {
        let course = self.load_course(&item.course_id)?;
        self.gate_course(user_id, &course)
    }

    fn gate_course(&self, user_id: &UserId, course: &Course) -> Result<CourseAccess, EngineError> {
        let mut access = self.enrollments.access(user_id, course)?;
        if !access.is_granted() {
            warn!(user = %user_id, course = %course.id, "progress without an active enrollment");
            return Err(EngineError::forbidden(format!(
                "no active enrollment for course {}",
                course.id
            )));
        }
        if access.direct.is_some() {
            return Ok(access);
        }

        let mut unlocked = Vec::new();
        for (plan, enrollment) in access.via_plans {
            if self.aggregator.is_locked(user_id, &plan, &course.id)? {
                debug!(user = %user_id, plan = %plan.id, course = %course.id, "course locked in plan");
            } else {
                unlocked.push((plan, enrollment));
            }
        }
        if unlocked.is_empty() {
            warn!(user = %user_id, course = %course.id, "course locked behind earlier plan courses");
            return Err(EngineError::forbidden(format!(
                "course {} is locked until earlier plan courses are complete",
                course.id
            )));
        }
        access.via_plans = unlocked;
        Ok(access)
    }

    fn touch(&self, access: &CourseAccess) -> Result<(), EngineError> {
        for enrollment in access.enrollments() {
            self.enrollments.mark_in_progress(enrollment)?;
        }
        Ok(())
    }

    /// Evaluate the course and every plan above it. Credentials are issued on every complete
    /// evaluation, so a failed issuance is retried by the next event.
    fn cascade_course(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<CompletionCascade, EngineError> {
        let evaluation = self.aggregator.is_course_complete(user_id, course_id)?;
        let mut cascade = CompletionCascade::default();
        if !evaluation.complete {
            return Ok(cascade);
        }
        self.follow_up(&evaluation, &mut cascade)?;
        if evaluation.newly_completed {
            cascade.completed.push(evaluation);
        }
        cascade.absorb(self.fan_out(user_id, course_id)?);
        Ok(cascade)
    }

    /// Re-evaluate every plan containing the course in which the learner holds an enrollment.
    fn fan_out(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<CompletionCascade, EngineError> {
        let mut cascade = CompletionCascade::default();
        for plan in self.store.plans_containing(course_id)? {
            let target = Target::Plan(plan.id.clone());
            let enrolled = self
                .store
                .find_enrollment(user_id, &target)?
                .is_some_and(|enrollment| enrollment.status.grants_access());
            if !enrolled {
                continue;
            }
            let evaluation = self.aggregator.is_plan_complete(user_id, &plan.id)?;
            if !evaluation.complete {
                continue;
            }
            self.follow_up(&evaluation, &mut cascade)?;
            if evaluation.newly_completed {
                cascade.completed.push(evaluation);
            }
        }
        Ok(cascade)
    }

    /// Close the enrollment and issue whichever credentials the target offers, acting as the
    /// learner. Issuance failures are logged and reported as pending.
    fn follow_up(
        &self,
        evaluation: &AggregateEvaluation,
        cascade: &mut CompletionCascade,
    ) -> Result<(), EngineError> {
        self.enrollments
            .mark_completed(&evaluation.user_id, &evaluation.target)?;

        let Some(record) = self.store.target(&evaluation.target)? else {
            return Ok(());
        };
        let learner = Principal {
            id: evaluation.user_id.clone(),
            roles: vec![Role::Learner],
        };
        let key = CompletionKey::aggregate(evaluation.user_id.clone(), evaluation.target.clone());
        if record.policy().has_certificate {
            let issued = self.certificates.issue(&learner, &key);
            collect_credential(cascade, &key, "certificate", issued);
        }
        if record.policy().has_badge {
            let awarded = self.badges.award(&learner, &key);
            collect_credential(cascade, &key, "badge", awarded);
        }
        Ok(())
    }

    fn ensure_can_view(
        &self,
        actor: &Principal,
        user_id: &UserId,
        target: &Target,
    ) -> Result<(), EngineError> {
        if &actor.id == user_id {
            return Ok(());
        }
        let record = self
            .store
            .target(target)?
            .ok_or_else(|| EngineError::not_found(target.to_string()))?;
        match authorize(actor, Action::ViewAnalytics, &Resource::target(&record)) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                warn!(actor = %actor.id, user = %user_id, %target, "completion lookup denied");
                Err(EngineError::forbidden(reason))
            }
        }
    }

    fn load_item(&self, item_id: &ContentItemId) -> Result<ContentItem, EngineError> {
        self.store
            .content_item(item_id)?
            .ok_or_else(|| EngineError::not_found(format!("content item {item_id}")))
    }

    fn load_course(&self, course_id: &CourseId) -> Result<Course, EngineError> {
        self.store
            .course(course_id)?
            .ok_or_else(|| EngineError::not_found(format!("course {course_id}")))
    }
}

fn collect_credential(
    cascade: &mut CompletionCascade,
    key: &CompletionKey,
    credential: &str,
    result: Result<CredentialIssue, EngineError>,
) {
    match result {
        Ok(issue) if issue.newly_issued => cascade.credentials.push(issue),
        Ok(_) => {}
        Err(err) => {
            warn!(user = %key.user_id, target = %key.target, credential, error = %err, "credential issuance deferred");
            cascade.pending.push(PendingCredential {
                target: key.target.clone(),
                credential: credential.to_string(),
                reason: err.to_string(),
            });
        }
    }
}

fn validated_threshold(value: Option<f64>, current: f64) -> Result<f64, EngineError> {
    match value {
        None => Ok(current),
        Some(value) if value.is_finite() && value > 0.0 && value <= 1.0 => Ok(value),
        Some(value) => Err(EngineError::bad_request(format!(
            "threshold must be in (0, 1], got {value}"
        ))),
    }
}
