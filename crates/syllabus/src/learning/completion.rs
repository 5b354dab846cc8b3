use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{
    Completion, CompletionKey, ContentItemId, CourseId, LearningPlan, PlanId, Target, UserId,
};
use super::error::EngineError;
use super::repository::{RecordStore, UpsertOutcome};

/// Result of evaluating a course or plan for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateEvaluation {
    pub user_id: UserId,
    pub target: Target,
    pub required: u32,
    pub satisfied: u32,
    pub complete: bool,
    /// Set when this evaluation created the aggregate completion.
    pub newly_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCourseProgress {
    pub course_id: CourseId,
    pub required: bool,
    pub complete: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub plan_id: PlanId,
    pub sequential: bool,
    pub complete: bool,
    pub courses: Vec<PlanCourseProgress>,
}

struct Tally {
    required: u32,
    satisfied: u32,
    scores: Vec<f64>,
}

impl Tally {
    /// Vacuously true when nothing is required.
    fn complete(&self) -> bool {
        self.satisfied >= self.required
    }

    fn mean_score(&self) -> Option<f64> {
        if self.scores.is_empty() {
            None
        } else {
            Some(self.scores.iter().sum::<f64>() / self.scores.len() as f64)
        }
    }
}

/// Pull-based authority for course and plan completion. Evaluation is idempotent: the
/// aggregate completion is upserted only when the target is complete and kept afterwards.
pub struct CompletionAggregator<S> {
    store: Arc<S>,
}

impl<S> CompletionAggregator<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every required item of the course has an item completion. A course whose items are all
    /// optional is complete as soon as it is evaluated.
    pub fn is_course_complete(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<AggregateEvaluation, EngineError> {
        if self.store.course(course_id)?.is_none() {
            return Err(EngineError::not_found(format!("course {course_id}")));
        }
        let tally = self.course_tally(user_id, course_id)?;
        self.settle(user_id, Target::Course(course_id.clone()), tally)
    }

    /// Every required course of the plan is complete.
    pub fn is_plan_complete(
        &self,
        user_id: &UserId,
        plan_id: &PlanId,
    ) -> Result<AggregateEvaluation, EngineError> {
        let plan = self.load_plan(plan_id)?;
        let mut tally = Tally {
            required: 0,
            satisfied: 0,
            scores: Vec::new(),
        };
        for entry in plan.courses.iter().filter(|entry| entry.required) {
            tally.required += 1;
            if self.course_satisfied(user_id, &entry.course_id)? {
                tally.satisfied += 1;
                let key =
                    CompletionKey::aggregate(user_id.clone(), Target::Course(entry.course_id.clone()));
                if let Some(score) = self.store.completion(&key)?.and_then(|c| c.score) {
                    tally.scores.push(score);
                }
            }
        }
        self.settle(user_id, Target::Plan(plan_id.clone()), tally)
    }

    /// Read-only check: an aggregate completion exists or every required item is completed.
    pub fn course_satisfied(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<bool, EngineError> {
        let key = CompletionKey::aggregate(user_id.clone(), Target::Course(course_id.clone()));
        if self.store.completion(&key)?.is_some() {
            return Ok(true);
        }
        Ok(self.course_tally(user_id, course_id)?.complete())
    }

    /// Per-course completion of a plan; in sequential plans a course stays locked until every
    /// earlier required course is complete.
    pub fn plan_progress(
        &self,
        user_id: &UserId,
        plan_id: &PlanId,
    ) -> Result<PlanProgress, EngineError> {
        let plan = self.load_plan(plan_id)?;
        self.progress_for(user_id, &plan)
    }

    pub fn progress_for(
        &self,
        user_id: &UserId,
        plan: &LearningPlan,
    ) -> Result<PlanProgress, EngineError> {
        let mut courses = Vec::with_capacity(plan.courses.len());
        let mut blocked = false;
        for entry in &plan.courses {
            let complete = self.course_satisfied(user_id, &entry.course_id)?;
            courses.push(PlanCourseProgress {
                course_id: entry.course_id.clone(),
                required: entry.required,
                complete,
                locked: plan.sequential && blocked,
            });
            if entry.required && !complete {
                blocked = true;
            }
        }
        let complete = courses
            .iter()
            .filter(|course| course.required)
            .all(|course| course.complete);

        Ok(PlanProgress {
            plan_id: plan.id.clone(),
            sequential: plan.sequential,
            complete,
            courses,
        })
    }

    /// Whether `course_id` is still locked for a learner reaching it through `plan`.
    pub fn is_locked(
        &self,
        user_id: &UserId,
        plan: &LearningPlan,
        course_id: &CourseId,
    ) -> Result<bool, EngineError> {
        if !plan.sequential {
            return Ok(false);
        }
        for entry in &plan.courses {
            if &entry.course_id == course_id {
                return Ok(false);
            }
            if entry.required && !self.course_satisfied(user_id, &entry.course_id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn course_tally(&self, user_id: &UserId, course_id: &CourseId) -> Result<Tally, EngineError> {
        let required: Vec<ContentItemId> = self
            .store
            .content_items(course_id)?
            .into_iter()
            .filter(|item| item.required)
            .map(|item| item.id)
            .collect();

        let completions = self
            .store
            .completions_for_user(user_id, &Target::Course(course_id.clone()))?;
        let mut done = HashSet::new();
        let mut scores = Vec::new();
        for completion in completions {
            let Some(item_id) = completion.key.content_item_id else {
                continue;
            };
            if completion.completed_at.is_some() && required.contains(&item_id) {
                if let Some(score) = completion.score {
                    scores.push(score);
                }
                done.insert(item_id);
            }
        }

        Ok(Tally {
            required: required.len() as u32,
            satisfied: done.len() as u32,
            scores,
        })
    }

    fn settle(
        &self,
        user_id: &UserId,
        target: Target,
        tally: Tally,
    ) -> Result<AggregateEvaluation, EngineError> {
        let key = CompletionKey::aggregate(user_id.clone(), target.clone());
        let (completion, newly_completed) = if tally.complete() {
            let (completion, outcome) =
                self.store
                    .upsert_completion(key, Utc::now(), tally.mean_score())?;
            let created = outcome == UpsertOutcome::Created;
            if created {
                info!(user = %user_id, %target, score = ?completion.score, "target completed");
            } else {
                debug!(user = %user_id, %target, "target already completed");
            }
            (Some(completion), created)
        } else {
            (self.store.completion(&key)?, false)
        };

        Ok(AggregateEvaluation {
            user_id: user_id.clone(),
            target,
            required: tally.required,
            satisfied: tally.satisfied,
            complete: tally.complete() || completion.is_some(),
            newly_completed,
            completion,
        })
    }

    fn load_plan(&self, plan_id: &PlanId) -> Result<LearningPlan, EngineError> {
        self.store
            .plan(plan_id)?
            .ok_or_else(|| EngineError::not_found(format!("plan {plan_id}")))
    }
}
