//! Process-local [`RecordStore`] used by the API binary, the demo, and the tests.
//!
//! Every repository call takes the single state lock, so each call is one serializable unit.
//! That is what makes the capacity, upsert, and attempt-sequence contracts atomic here.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    Completion, CompletionKey, ContentItem, ContentItemId, ContentProgress, Course, CourseId,
    Enrollment, EnrollmentId, EnrollmentStatus, LearningPlan, PlanId, Target, Test, TestAttempt,
    TestId, UserId, VideoProgress,
};
use super::repository::{
    AttemptDraft, AttemptRepository, CatalogRepository, CompletionRepository, EngineSettings,
    EnrollmentRepository, ProgressRepository, RepositoryError, SettingsRepository,
    StatusTransition, UpsertOutcome,
};

static ENROLLMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_enrollment_id() -> EnrollmentId {
    let id = ENROLLMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EnrollmentId(format!("enr-{id:06}"))
}

#[derive(Default)]
struct StoreState {
    users: HashSet<UserId>,
    courses: BTreeMap<CourseId, Course>,
    plans: BTreeMap<PlanId, LearningPlan>,
    items: BTreeMap<ContentItemId, ContentItem>,
    tests: HashMap<TestId, Test>,
    enrollments: BTreeMap<EnrollmentId, Enrollment>,
    enrollment_index: HashMap<(UserId, Target), EnrollmentId>,
    content_progress: HashMap<(UserId, ContentItemId), ContentProgress>,
    video_progress: HashMap<(UserId, ContentItemId), VideoProgress>,
    attempts: HashMap<(UserId, TestId), Vec<TestAttempt>>,
    completions: BTreeMap<CompletionKey, Completion>,
    settings: EngineSettings,
}

impl StoreState {
    fn occupied_seats(&self, target: &Target) -> u32 {
        self.enrollments
            .values()
            .filter(|enrollment| &enrollment.target == target && enrollment.status.occupies_seat())
            .count() as u32
    }

    fn check_capacity(&self, target: &Target, capacity: Option<u32>) -> Result<(), RepositoryError> {
        match capacity {
            Some(limit) if self.occupied_seats(target) >= limit => {
                Err(RepositoryError::CapacityReached { limit })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = Self::default();
        store.lock_unpoisoned().settings = settings;
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    fn lock_unpoisoned(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_user(&self, id: impl Into<String>) -> UserId {
        let id = UserId::new(id);
        self.lock_unpoisoned().users.insert(id.clone());
        id
    }

    pub fn add_course(&self, course: Course) {
        let mut state = self.lock_unpoisoned();
        state.users.insert(course.created_by.clone());
        state.courses.insert(course.id.clone(), course);
    }

    pub fn add_plan(&self, plan: LearningPlan) {
        let mut state = self.lock_unpoisoned();
        state.users.insert(plan.created_by.clone());
        state.plans.insert(plan.id.clone(), plan);
    }

    pub fn add_content_item(&self, item: ContentItem) {
        self.lock_unpoisoned().items.insert(item.id.clone(), item);
    }

    pub fn add_test(&self, test: Test) {
        self.lock_unpoisoned().tests.insert(test.id.clone(), test);
    }
}

impl CatalogRepository for InMemoryStore {
    fn course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        Ok(self.lock()?.courses.get(id).cloned())
    }

    fn plan(&self, id: &PlanId) -> Result<Option<LearningPlan>, RepositoryError> {
        Ok(self.lock()?.plans.get(id).cloned())
    }

    fn plans_containing(&self, course_id: &CourseId) -> Result<Vec<LearningPlan>, RepositoryError> {
        Ok(self
            .lock()?
            .plans
            .values()
            .filter(|plan| plan.contains(course_id))
            .cloned()
            .collect())
    }

    fn content_item(&self, id: &ContentItemId) -> Result<Option<ContentItem>, RepositoryError> {
        Ok(self.lock()?.items.get(id).cloned())
    }

    fn content_items(&self, course_id: &CourseId) -> Result<Vec<ContentItem>, RepositoryError> {
        Ok(self
            .lock()?
            .items
            .values()
            .filter(|item| &item.course_id == course_id)
            .cloned()
            .collect())
    }

    fn test(&self, id: &TestId) -> Result<Option<Test>, RepositoryError> {
        Ok(self.lock()?.tests.get(id).cloned())
    }

    fn user_exists(&self, id: &UserId) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.users.contains(id))
    }
}

impl EnrollmentRepository for InMemoryStore {
    fn insert_enrollment(
        &self,
        mut enrollment: Enrollment,
        capacity: Option<u32>,
    ) -> Result<Enrollment, RepositoryError> {
        let mut state = self.lock()?;
        let index_key = (enrollment.user_id.clone(), enrollment.target.clone());
        if state.enrollment_index.contains_key(&index_key) {
            return Err(RepositoryError::Conflict);
        }
        if enrollment.status.occupies_seat() {
            state.check_capacity(&enrollment.target, capacity)?;
        }

        enrollment.id = next_enrollment_id();
        state.enrollment_index.insert(index_key, enrollment.id.clone());
        state
            .enrollments
            .insert(enrollment.id.clone(), enrollment.clone());
        Ok(enrollment)
    }

    fn transition(
        &self,
        id: &EnrollmentId,
        change: StatusTransition,
        capacity: Option<u32>,
    ) -> Result<Enrollment, RepositoryError> {
        let mut state = self.lock()?;
        let current = state
            .enrollments
            .get(id)
            .ok_or(RepositoryError::NotFound)?;
        if current.status != change.expected {
            return Err(RepositoryError::StaleStatus {
                expected: change.expected,
                found: current.status,
            });
        }
        let target = current.target.clone();
        if change.next.occupies_seat() && !change.expected.occupies_seat() {
            state.check_capacity(&target, capacity)?;
        }

        let enrollment = state
            .enrollments
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        enrollment.status = change.next;
        match change.next {
            EnrollmentStatus::Enrolled if change.expected == EnrollmentStatus::PendingApproval => {
                enrollment.approved_by = change.actor;
                enrollment.approved_at = Some(change.at);
            }
            EnrollmentStatus::Completed => enrollment.completed_at = Some(change.at),
            _ => {}
        }
        Ok(enrollment.clone())
    }

    fn enrollment(&self, id: &EnrollmentId) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self.lock()?.enrollments.get(id).cloned())
    }

    fn find_enrollment(
        &self,
        user_id: &UserId,
        target: &Target,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .enrollment_index
            .get(&(user_id.clone(), target.clone()))
            .and_then(|id| state.enrollments.get(id))
            .cloned())
    }

    fn enrollments_for(&self, target: &Target) -> Result<Vec<Enrollment>, RepositoryError> {
        Ok(self
            .lock()?
            .enrollments
            .values()
            .filter(|enrollment| &enrollment.target == target)
            .cloned()
            .collect())
    }

    fn delete_enrollment(&self, id: &EnrollmentId) -> Result<Enrollment, RepositoryError> {
        let mut state = self.lock()?;
        let removed = state
            .enrollments
            .remove(id)
            .ok_or(RepositoryError::NotFound)?;
        state
            .enrollment_index
            .remove(&(removed.user_id.clone(), removed.target.clone()));
        Ok(removed)
    }

    fn delete_enrollments_for(
        &self,
        target: &Target,
        blocking: EnrollmentStatus,
    ) -> Result<Vec<Enrollment>, RepositoryError> {
        let mut state = self.lock()?;
        let matching: Vec<EnrollmentId> = state
            .enrollments
            .values()
            .filter(|enrollment| &enrollment.target == target)
            .map(|enrollment| enrollment.id.clone())
            .collect();

        if let Some(blocked) = matching
            .iter()
            .filter_map(|id| state.enrollments.get(id))
            .find(|enrollment| enrollment.status == blocking)
        {
            return Err(RepositoryError::Blocked(blocked.status));
        }

        let mut removed = Vec::with_capacity(matching.len());
        for id in matching {
            if let Some(enrollment) = state.enrollments.remove(&id) {
                state
                    .enrollment_index
                    .remove(&(enrollment.user_id.clone(), enrollment.target.clone()));
                removed.push(enrollment);
            }
        }
        Ok(removed)
    }
}

impl ProgressRepository for InMemoryStore {
    fn content_progress(
        &self,
        user_id: &UserId,
        item_id: &ContentItemId,
    ) -> Result<Option<ContentProgress>, RepositoryError> {
        Ok(self
            .lock()?
            .content_progress
            .get(&(user_id.clone(), item_id.clone()))
            .cloned())
    }

    fn save_content_progress(&self, progress: ContentProgress) -> Result<(), RepositoryError> {
        let key = (progress.user_id.clone(), progress.content_item_id.clone());
        self.lock()?.content_progress.insert(key, progress);
        Ok(())
    }

    fn modify_video_progress(
        &self,
        seed: VideoProgress,
        apply: &mut dyn FnMut(&mut VideoProgress),
    ) -> Result<VideoProgress, RepositoryError> {
        let mut state = self.lock()?;
        let key = (seed.user_id.clone(), seed.content_item_id.clone());
        let record = state.video_progress.entry(key).or_insert(seed);
        apply(record);
        Ok(record.clone())
    }

    fn video_progress(
        &self,
        user_id: &UserId,
        item_id: &ContentItemId,
    ) -> Result<Option<VideoProgress>, RepositoryError> {
        Ok(self
            .lock()?
            .video_progress
            .get(&(user_id.clone(), item_id.clone()))
            .cloned())
    }

    fn video_progress_for_item(
        &self,
        item_id: &ContentItemId,
    ) -> Result<Vec<VideoProgress>, RepositoryError> {
        let mut records: Vec<VideoProgress> = self
            .lock()?
            .video_progress
            .values()
            .filter(|record| &record.content_item_id == item_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(records)
    }
}

impl AttemptRepository for InMemoryStore {
    fn append_attempt(
        &self,
        draft: AttemptDraft,
        max_attempts: Option<u32>,
    ) -> Result<TestAttempt, RepositoryError> {
        let mut state = self.lock()?;
        let sequence = state
            .attempts
            .entry((draft.user_id.clone(), draft.test_id.clone()))
            .or_default();
        let attempt_number = sequence.len() as u32 + 1;
        if let Some(limit) = max_attempts {
            if attempt_number > limit {
                return Err(RepositoryError::AttemptsExhausted { limit });
            }
        }

        let attempt = TestAttempt {
            user_id: draft.user_id,
            test_id: draft.test_id,
            attempt_number,
            score: draft.score,
            passed: draft.passed,
            points_earned: draft.points_earned,
            points_total: draft.points_total,
            time_spent_seconds: draft.time_spent_seconds,
            started_at: draft.started_at,
            submitted_at: draft.submitted_at,
        };
        sequence.push(attempt.clone());
        Ok(attempt)
    }

    fn attempts(
        &self,
        user_id: &UserId,
        test_id: &TestId,
    ) -> Result<Vec<TestAttempt>, RepositoryError> {
        Ok(self
            .lock()?
            .attempts
            .get(&(user_id.clone(), test_id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

impl CompletionRepository for InMemoryStore {
    fn upsert_completion(
        &self,
        key: CompletionKey,
        completed_at: DateTime<Utc>,
        score: Option<f64>,
    ) -> Result<(Completion, UpsertOutcome), RepositoryError> {
        let mut state = self.lock()?;
        match state.completions.get_mut(&key) {
            Some(existing) => {
                if existing.completed_at.is_none() {
                    existing.completed_at = Some(completed_at);
                }
                if score.is_some() {
                    existing.score = score;
                }
                Ok((existing.clone(), UpsertOutcome::Updated))
            }
            None => {
                let completion = Completion::new(key.clone(), completed_at, score);
                state.completions.insert(key, completion.clone());
                Ok((completion, UpsertOutcome::Created))
            }
        }
    }

    fn completion(&self, key: &CompletionKey) -> Result<Option<Completion>, RepositoryError> {
        Ok(self.lock()?.completions.get(key).cloned())
    }

    fn completions_for_user(
        &self,
        user_id: &UserId,
        target: &Target,
    ) -> Result<Vec<Completion>, RepositoryError> {
        Ok(self
            .lock()?
            .completions
            .values()
            .filter(|completion| {
                &completion.key.user_id == user_id && &completion.key.target == target
            })
            .cloned()
            .collect())
    }

    fn stamp_certificate(
        &self,
        key: &CompletionKey,
        url: String,
        at: DateTime<Utc>,
    ) -> Result<(Completion, bool), RepositoryError> {
        let mut state = self.lock()?;
        let completion = state
            .completions
            .get_mut(key)
            .ok_or(RepositoryError::NotFound)?;
        let stamped = completion.certificate_url.is_none();
        if stamped {
            completion.certificate_url = Some(url);
            completion.certificate_generated_at = Some(at);
        }
        Ok((completion.clone(), stamped))
    }

    fn stamp_badge(
        &self,
        key: &CompletionKey,
        at: DateTime<Utc>,
    ) -> Result<(Completion, bool), RepositoryError> {
        let mut state = self.lock()?;
        let completion = state
            .completions
            .get_mut(key)
            .ok_or(RepositoryError::NotFound)?;
        let stamped = !completion.badge_awarded;
        if stamped {
            completion.badge_awarded = true;
            completion.badge_awarded_at = Some(at);
        }
        Ok((completion.clone(), stamped))
    }
}

impl SettingsRepository for InMemoryStore {
    fn settings(&self) -> Result<EngineSettings, RepositoryError> {
        Ok(self.lock()?.settings.clone())
    }

    fn update_settings(
        &self,
        expected_version: u64,
        mut next: EngineSettings,
    ) -> Result<EngineSettings, RepositoryError> {
        let mut state = self.lock()?;
        if state.settings.version != expected_version {
            return Err(RepositoryError::StaleSettings {
                expected: expected_version,
                current: state.settings.version,
            });
        }
        next.version = expected_version + 1;
        state.settings = next.clone();
        Ok(next)
    }
}
