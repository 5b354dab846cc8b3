use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::access::{authorize, Action, Decision, Principal, Resource};
use super::domain::{
    Course, Enrollment, EnrollmentId, EnrollmentStatus, EnrollmentType, LearningPlan,
    Target, TargetRecord, UserId,
};
use super::error::EngineError;
use super::repository::{RecordStore, RepositoryError, StatusTransition};

/// One roster line for [`EnrollmentManager::bulk_enroll_entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEntry {
    pub user_id: UserId,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub user_id: UserId,
    pub reason: String,
}

/// Per-user outcome of a bulk enrollment; successes are never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEnrollmentResult {
    pub enrolled: u32,
    pub failed: u32,
    pub errors: Vec<BulkFailure>,
}

/// Enrollments through which a learner may consume a course.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseAccess {
    pub direct: Option<Enrollment>,
    pub via_plans: Vec<(LearningPlan, Enrollment)>,
}

impl CourseAccess {
    pub fn is_granted(&self) -> bool {
        self.direct.is_some() || !self.via_plans.is_empty()
    }

    pub fn enrollments(&self) -> impl Iterator<Item = &Enrollment> {
        self.direct
            .iter()
            .chain(self.via_plans.iter().map(|(_, enrollment)| enrollment))
    }
}

/// Enrollment state machine: create, approve, drop, remove, bulk operations, access checks.
pub struct EnrollmentManager<S> {
    store: Arc<S>,
}

impl<S> EnrollmentManager<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Enroll `user_id` in `target`. Acting for oneself needs self-enrollment on the target;
    /// acting for someone else needs staff rights on it.
    pub fn request_enrollment(
        &self,
        actor: &Principal,
        user_id: &UserId,
        target: &Target,
        due_date: Option<NaiveDate>,
    ) -> Result<Enrollment, EngineError> {
        let record = self.load_target(target)?;
        let resource = Resource::target(&record).owned_by(user_id);
        let staff = authorize(actor, Action::EnrollOnBehalf, &resource);

        let enrollment_type = if &actor.id == user_id && record.policy().self_enrollment {
            EnrollmentType::SelfService
        } else if let Decision::Deny(reason) = staff {
            warn!(actor = %actor.id, user = %user_id, %target, "enrollment request denied");
            if &actor.id == user_id {
                return Err(EngineError::forbidden(format!(
                    "self-enrollment is not enabled for {target}"
                )));
            }
            return Err(EngineError::forbidden(reason));
        } else {
            if &actor.id != user_id && !self.store.user_exists(user_id)? {
                return Err(EngineError::not_found(format!("user {user_id}")));
            }
            EnrollmentType::Manual
        };

        let enrollment = self.create(&record, user_id, enrollment_type, due_date)?;
        info!(
            enrollment = %enrollment.id,
            user = %user_id,
            %target,
            status = enrollment.status.label(),
            "enrollment created"
        );
        Ok(enrollment)
    }

    /// Move a pending enrollment to `ENROLLED`, re-checking capacity inside the store.
    pub fn approve(
        &self,
        actor: &Principal,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EngineError> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        if enrollment.status != EnrollmentStatus::PendingApproval {
            return Err(EngineError::bad_request(format!(
                "enrollment {enrollment_id} is {}, not PENDING_APPROVAL",
                enrollment.status.label()
            )));
        }

        let record = self.load_target(&enrollment.target)?;
        let resource = Resource::target(&record).owned_by(&enrollment.user_id);
        if let Decision::Deny(reason) = authorize(actor, Action::ApproveEnrollment, &resource) {
            warn!(actor = %actor.id, enrollment = %enrollment_id, "approval denied");
            return Err(EngineError::forbidden(reason));
        }

        let approved = self.store.transition(
            enrollment_id,
            StatusTransition {
                expected: EnrollmentStatus::PendingApproval,
                next: EnrollmentStatus::Enrolled,
                actor: Some(actor.id.clone()),
                at: Utc::now(),
            },
            record.policy().max_enrollments,
        );
        match approved {
            Ok(enrollment) => {
                info!(enrollment = %enrollment_id, approver = %actor.id, "enrollment approved");
                Ok(enrollment)
            }
            Err(RepositoryError::CapacityReached { limit }) => {
                warn!(enrollment = %enrollment_id, limit, "approval refused at capacity");
                Err(RepositoryError::CapacityReached { limit }.into())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Delete an enrollment regardless of its status.
    pub fn remove(
        &self,
        actor: &Principal,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EngineError> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        let record = self.store.target(&enrollment.target)?;
        let resource = match &record {
            Some(record) => Resource::target(record),
            None => Resource::default(),
        }
        .owned_by(&enrollment.user_id);
        if let Decision::Deny(reason) = authorize(actor, Action::RemoveEnrollment, &resource) {
            warn!(actor = %actor.id, enrollment = %enrollment_id, "removal denied");
            return Err(EngineError::forbidden(reason));
        }

        if enrollment.status == EnrollmentStatus::InProgress {
            warn!(
                enrollment = %enrollment_id,
                user = %enrollment.user_id,
                "removing an enrollment with recorded progress"
            );
        }
        let removed = self.store.delete_enrollment(enrollment_id).map_err(|err| match err {
            RepositoryError::NotFound => EngineError::not_found(format!("enrollment {enrollment_id}")),
            other => other.into(),
        })?;
        info!(enrollment = %enrollment_id, actor = %actor.id, "enrollment removed");
        Ok(removed)
    }

    /// Move a non-terminal enrollment to `DROPPED`.
    pub fn drop_enrollment(
        &self,
        actor: &Principal,
        enrollment_id: &EnrollmentId,
    ) -> Result<Enrollment, EngineError> {
        let enrollment = self.load_enrollment(enrollment_id)?;
        if enrollment.status.is_terminal() {
            return Err(EngineError::bad_request(format!(
                "enrollment {enrollment_id} is already {}",
                enrollment.status.label()
            )));
        }

        let record = self.load_target(&enrollment.target)?;
        let resource = Resource::target(&record).owned_by(&enrollment.user_id);
        if let Decision::Deny(reason) = authorize(actor, Action::DropEnrollment, &resource) {
            warn!(actor = %actor.id, enrollment = %enrollment_id, "drop denied");
            return Err(EngineError::forbidden(reason));
        }

        let dropped = self.store.transition(
            enrollment_id,
            StatusTransition {
                expected: enrollment.status,
                next: EnrollmentStatus::Dropped,
                actor: Some(actor.id.clone()),
                at: Utc::now(),
            },
            None,
        )?;
        info!(enrollment = %enrollment_id, actor = %actor.id, "enrollment dropped");
        Ok(dropped)
    }

    /// Delete every enrollment of `target`; refused while any of them is `IN_PROGRESS`.
    pub fn purge_enrollments(
        &self,
        actor: &Principal,
        target: &Target,
    ) -> Result<Vec<Enrollment>, EngineError> {
        let record = self.load_target(target)?;
        if let Decision::Deny(reason) =
            authorize(actor, Action::PurgeEnrollments, &Resource::target(&record))
        {
            warn!(actor = %actor.id, %target, "purge denied");
            return Err(EngineError::forbidden(reason));
        }

        let removed = self
            .store
            .delete_enrollments_for(target, EnrollmentStatus::InProgress)?;
        info!(%target, removed = removed.len(), actor = %actor.id, "enrollments purged");
        Ok(removed)
    }

    pub fn bulk_enroll(
        &self,
        actor: &Principal,
        user_ids: &[UserId],
        target: &Target,
        due_date: Option<NaiveDate>,
    ) -> Result<BulkEnrollmentResult, EngineError> {
        let entries: Vec<BulkEntry> = user_ids
            .iter()
            .map(|user_id| BulkEntry {
                user_id: user_id.clone(),
                due_date,
            })
            .collect();
        self.bulk_enroll_entries(actor, &entries, target)
    }

    /// Create one group enrollment per entry. Only an empty or unauthorized request fails as a
    /// whole; everything else is reported per user.
    pub fn bulk_enroll_entries(
        &self,
        actor: &Principal,
        entries: &[BulkEntry],
        target: &Target,
    ) -> Result<BulkEnrollmentResult, EngineError> {
        if entries.is_empty() {
            return Err(EngineError::bad_request("bulk enrollment needs at least one user"));
        }
        let record = self.load_target(target)?;
        if let Decision::Deny(reason) =
            authorize(actor, Action::EnrollOnBehalf, &Resource::target(&record))
        {
            warn!(actor = %actor.id, %target, "bulk enrollment denied");
            return Err(EngineError::forbidden(reason));
        }

        let mut result = BulkEnrollmentResult::default();
        for entry in entries {
            match self.bulk_entry(&record, entry) {
                Ok(enrollment) => {
                    debug!(enrollment = %enrollment.id, user = %entry.user_id, "bulk entry enrolled");
                    result.enrolled += 1;
                }
                Err(reason) => {
                    result.failed += 1;
                    result.errors.push(BulkFailure {
                        user_id: entry.user_id.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            %target,
            enrolled = result.enrolled,
            failed = result.failed,
            "bulk enrollment finished"
        );
        Ok(result)
    }

    /// Access-granting enrollments for `course`, directly or through plans containing it.
    pub fn access(&self, user_id: &UserId, course: &Course) -> Result<CourseAccess, EngineError> {
        let direct = self
            .store
            .find_enrollment(user_id, &Target::Course(course.id.clone()))?
            .filter(|enrollment| enrollment.status.grants_access());

        let mut via_plans = Vec::new();
        for plan in self.store.plans_containing(&course.id)? {
            let target = Target::Plan(plan.id.clone());
            if let Some(enrollment) = self.store.find_enrollment(user_id, &target)? {
                if enrollment.status.grants_access() {
                    via_plans.push((plan, enrollment));
                }
            }
        }

        Ok(CourseAccess { direct, via_plans })
    }

    /// `ENROLLED` to `IN_PROGRESS` on first recorded activity.
    pub fn mark_in_progress(&self, enrollment: &Enrollment) -> Result<(), EngineError> {
        if enrollment.status != EnrollmentStatus::Enrolled {
            return Ok(());
        }
        self.advance(enrollment, EnrollmentStatus::InProgress)
    }

    /// Close out the learner's enrollment once the target is complete.
    pub fn mark_completed(&self, user_id: &UserId, target: &Target) -> Result<(), EngineError> {
        match self.store.find_enrollment(user_id, target)? {
            Some(enrollment) if enrollment.status.occupies_seat() => {
                self.advance(&enrollment, EnrollmentStatus::Completed)
            }
            _ => Ok(()),
        }
    }

    pub fn enrollment(&self, enrollment_id: &EnrollmentId) -> Result<Enrollment, EngineError> {
        self.load_enrollment(enrollment_id)
    }

    pub fn enrollments_for(&self, target: &Target) -> Result<Vec<Enrollment>, EngineError> {
        Ok(self.store.enrollments_for(target)?)
    }

    fn advance(&self, enrollment: &Enrollment, next: EnrollmentStatus) -> Result<(), EngineError> {
        let change = StatusTransition {
            expected: enrollment.status,
            next,
            actor: None,
            at: Utc::now(),
        };
        match self.store.transition(&enrollment.id, change, None) {
            Ok(updated) => {
                info!(
                    enrollment = %updated.id,
                    user = %updated.user_id,
                    status = updated.status.label(),
                    "enrollment advanced"
                );
                Ok(())
            }
            Err(RepositoryError::StaleStatus { found, .. }) => {
                debug!(enrollment = %enrollment.id, status = found.label(), "enrollment already moved");
                Ok(())
            }
            Err(RepositoryError::NotFound) => {
                debug!(enrollment = %enrollment.id, "enrollment removed concurrently");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn bulk_entry(&self, record: &TargetRecord, entry: &BulkEntry) -> Result<Enrollment, String> {
        match self.store.user_exists(&entry.user_id) {
            Ok(true) => {}
            Ok(false) => return Err("user not found".to_string()),
            Err(err) => return Err(EngineError::from(err).to_string()),
        }
        self.create(record, &entry.user_id, EnrollmentType::Group, entry.due_date)
            .map_err(|err| match err {
                EngineError::Conflict(_) => "already enrolled".to_string(),
                EngineError::Forbidden(reason) => reason,
                other => {
                    error!(user = %entry.user_id, error = %other, "bulk entry failed");
                    other.to_string()
                }
            })
    }

    fn create(
        &self,
        record: &TargetRecord,
        user_id: &UserId,
        enrollment_type: EnrollmentType,
        due_date: Option<NaiveDate>,
    ) -> Result<Enrollment, EngineError> {
        let policy = record.policy();
        let target = record.target();
        let status = if policy.requires_approval {
            EnrollmentStatus::PendingApproval
        } else {
            EnrollmentStatus::Enrolled
        };
        let draft = Enrollment {
            id: EnrollmentId::new(String::new()),
            user_id: user_id.clone(),
            target: target.clone(),
            status,
            enrollment_type,
            enrolled_at: Utc::now(),
            approved_by: None,
            approved_at: None,
            due_date,
            completed_at: None,
        };

        self.store
            .insert_enrollment(draft, policy.max_enrollments)
            .map_err(|err| match err {
                RepositoryError::Conflict => {
                    EngineError::Conflict(format!("{user_id} is already enrolled in {target}"))
                }
                other => other.into(),
            })
    }

    fn load_target(&self, target: &Target) -> Result<TargetRecord, EngineError> {
        self.store
            .target(target)?
            .ok_or_else(|| EngineError::not_found(target.to_string()))
    }

    fn load_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<Enrollment, EngineError> {
        self.store
            .enrollment(enrollment_id)?
            .ok_or_else(|| EngineError::not_found(format!("enrollment {enrollment_id}")))
    }
}
