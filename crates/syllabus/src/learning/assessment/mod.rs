//! Test attempts: scoring, attempt limits, and the item completion a passing attempt earns.

pub mod scoring;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use scoring::{score_test, Answer, AnswerOutcome, Scorecard};

use super::domain::{Completion, CompletionKey, Test, TestAttempt, TestId, UserId};
use super::error::EngineError;
use super::repository::{AttemptDraft, RecordStore, UpsertOutcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptSubmission {
    pub answers: BTreeMap<String, Answer>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_spent_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt: TestAttempt,
    pub breakdown: Vec<AnswerOutcome>,
    /// `None` when the test has no attempt limit.
    pub remaining_attempts: Option<u32>,
    pub can_retake: bool,
    pub newly_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub test_id: TestId,
    pub attempts_taken: u32,
    pub best_attempt: Option<TestAttempt>,
    pub remaining_attempts: Option<u32>,
    pub can_retake: bool,
}

/// Highest score wins; the earliest attempt wins a tie.
pub fn best_attempt(attempts: &[TestAttempt]) -> Option<&TestAttempt> {
    attempts.iter().fold(None, |best: Option<&TestAttempt>, attempt| match best {
        Some(current) if attempt.score <= current.score => Some(current),
        _ => Some(attempt),
    })
}

pub fn remaining_attempts(max_attempts: Option<u32>, taken: u32) -> Option<u32> {
    max_attempts.map(|max| max.saturating_sub(taken))
}

pub fn can_retake(remaining: Option<u32>) -> bool {
    remaining.map_or(true, |left| left > 0)
}

pub struct TestAttemptEvaluator<S> {
    store: Arc<S>,
}

impl<S> TestAttemptEvaluator<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn load_test(&self, test_id: &TestId) -> Result<Test, EngineError> {
        self.store
            .test(test_id)?
            .ok_or_else(|| EngineError::not_found(format!("test {test_id}")))
    }

    /// Score and persist one attempt. The store hands out the attempt number and refuses it
    /// once the test's limit is used up.
    pub fn submit(
        &self,
        user_id: &UserId,
        test: &Test,
        submission: AttemptSubmission,
    ) -> Result<AttemptResult, EngineError> {
        let card = score_test(test, &submission.answers);
        let score = card.score();
        let passed = score >= test.passing_score;
        let submitted_at = Utc::now();
        let started_at = submission.started_at.unwrap_or(submitted_at);
        let time_spent_seconds = submission.time_spent_seconds.unwrap_or_else(|| {
            u32::try_from((submitted_at - started_at).num_seconds().max(0)).unwrap_or(u32::MAX)
        });

        let attempt = self.store.append_attempt(
            AttemptDraft {
                user_id: user_id.clone(),
                test_id: test.id.clone(),
                score,
                passed,
                points_earned: card.points_earned,
                points_total: card.points_total,
                time_spent_seconds,
                started_at,
                submitted_at,
            },
            test.max_attempts,
        )?;
        info!(
            user = %user_id,
            test = %test.id,
            attempt = attempt.attempt_number,
            score,
            passed,
            "test attempt recorded"
        );

        let remaining = remaining_attempts(test.max_attempts, attempt.attempt_number);
        let (completion, newly_completed) = match (&test.content_item_id, passed) {
            (Some(item_id), true) => {
                let attempts = self.store.attempts(user_id, &test.id)?;
                let best_score = best_attempt(&attempts).map_or(score, |best| best.score);
                let key = CompletionKey::item(
                    user_id.clone(),
                    test.course_id.clone(),
                    item_id.clone(),
                );
                let (completion, outcome) =
                    self.store.upsert_completion(key, submitted_at, Some(best_score))?;
                let created = outcome == UpsertOutcome::Created;
                if !created {
                    debug!(user = %user_id, item = %item_id, "test item already completed");
                }
                (Some(completion), created)
            }
            _ => (None, false),
        };

        Ok(AttemptResult {
            attempt,
            breakdown: card.breakdown,
            remaining_attempts: remaining,
            can_retake: can_retake(remaining),
            newly_completed,
            completion,
        })
    }

    pub fn summary(&self, user_id: &UserId, test: &Test) -> Result<AttemptSummary, EngineError> {
        let attempts = self.store.attempts(user_id, &test.id)?;
        let taken = attempts.len() as u32;
        let remaining = remaining_attempts(test.max_attempts, taken);
        Ok(AttemptSummary {
            test_id: test.id.clone(),
            attempts_taken: taken,
            best_attempt: best_attempt(&attempts).cloned(),
            remaining_attempts: remaining,
            can_retake: can_retake(remaining),
        })
    }
}
