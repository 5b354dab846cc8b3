use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::learning::domain::{Question, QuestionKind, Test};

/// A learner's response to one question. Choice questions answer with option indexes; for
/// true/false questions index 0 is "true" and index 1 is "false".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choices(Vec<usize>),
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub question_id: String,
    pub correct: bool,
    pub points_earned: u32,
    pub points_possible: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub points_earned: u64,
    pub points_total: u64,
    pub breakdown: Vec<AnswerOutcome>,
}

impl Scorecard {
    /// Earned over total points; a test worth nothing scores zero.
    pub fn score(&self) -> f64 {
        if self.points_total == 0 {
            0.0
        } else {
            self.points_earned as f64 / self.points_total as f64
        }
    }
}

pub fn score_test(test: &Test, answers: &BTreeMap<String, Answer>) -> Scorecard {
    let mut card = Scorecard {
        points_earned: 0,
        points_total: 0,
        breakdown: Vec::with_capacity(test.questions.len()),
    };
    for question in &test.questions {
        let correct = answers
            .get(&question.id)
            .is_some_and(|answer| is_correct(question, answer));
        let points_earned = if correct { question.points } else { 0 };
        card.points_total += u64::from(question.points);
        card.points_earned += u64::from(points_earned);
        card.breakdown.push(AnswerOutcome {
            question_id: question.id.clone(),
            correct,
            points_earned,
            points_possible: question.points,
        });
    }
    card
}

fn is_correct(question: &Question, answer: &Answer) -> bool {
    match (question.kind, answer) {
        (QuestionKind::SingleChoice, Answer::Choices(chosen)) => {
            chosen.len() == 1 && question.correct_options == *chosen
        }
        (QuestionKind::MultipleChoice, Answer::Choices(chosen)) => {
            let chosen: BTreeSet<usize> = chosen.iter().copied().collect();
            let expected: BTreeSet<usize> = question.correct_options.iter().copied().collect();
            !expected.is_empty() && chosen == expected
        }
        (QuestionKind::TrueFalse, Answer::Flag(value)) => {
            let index = if *value { 0 } else { 1 };
            question.correct_options == [index]
        }
        (QuestionKind::TrueFalse, Answer::Choices(chosen)) => {
            chosen.len() == 1 && question.correct_options == *chosen
        }
        (QuestionKind::ShortAnswer, Answer::Text(text)) => {
            let response = text.trim();
            !response.is_empty()
                && question
                    .accepted_answers
                    .iter()
                    .any(|accepted| accepted.trim().eq_ignore_ascii_case(response))
        }
        _ => false,
    }
}
