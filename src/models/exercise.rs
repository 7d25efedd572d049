// src/models/exercise.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::grader::{AnswerOptionSet, GradeError, SubmissionResult};

/// A single fill-in-the-blank question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// Sentence with a blank, e.g. "The ___ is red."
    #[validate(length(max = 1000))]
    pub question: String,

    /// The word that completes the sentence.
    #[validate(length(max = 200))]
    pub answer: String,
}

impl Question {
    /// A question is blank when either side has no content.
    /// Blank questions are dropped when an exercise is saved.
    pub fn is_blank(&self) -> bool {
        self.question.trim().is_empty() || self.answer.trim().is_empty()
    }
}

/// Represents an exercise document stored under a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub group_id: String,

    /// Ordered questions. Order is significant: submissions are keyed by index.
    pub questions: Vec<Question>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Exercise {
    /// Checks that the exercise can be attempted.
    ///
    /// An exercise with no questions is never gradable, and a question without
    /// an answer is rejected here rather than being silently scored.
    pub fn validate_for_attempt(&self) -> Result<(), GradeError> {
        if self.questions.is_empty() {
            return Err(GradeError::NoQuestions);
        }
        if let Some(index) = self.questions.iter().position(|q| q.answer.trim().is_empty()) {
            return Err(GradeError::MalformedQuestion(index));
        }
        Ok(())
    }
}

/// Summary row for the exercise list on a group page.
#[derive(Debug, Serialize)]
pub struct ExerciseSummary {
    pub id: String,
    /// 1-based position within the group.
    pub number: usize,
    pub question_count: usize,
}

/// DTO for creating or replacing an exercise's questions.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveExerciseRequest {
    #[validate(length(max = 200), nested)]
    pub questions: Vec<Question>,
}

/// Question as sent to learners (answer hidden).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub index: usize,
    pub question: String,
}

/// DTO for submitting an attempt.
///
/// Key: question index. Value: the selected word, or "" when left blank.
#[derive(Debug, Deserialize)]
pub struct SubmitAttemptRequest {
    #[serde(default)]
    pub answers: HashMap<usize, String>,
}

impl PublicQuestion {
    pub fn from_questions(questions: &[Question]) -> Vec<Self> {
        questions
            .iter()
            .enumerate()
            .map(|(index, q)| PublicQuestion {
                index,
                question: q.question.clone(),
            })
            .collect()
    }
}

/// Attempt as rendered to the learner.
#[derive(Debug, Serialize)]
pub struct AttemptView {
    pub attempt_id: String,
    pub exercise_id: String,
    pub questions: Vec<PublicQuestion>,
    /// Pool of words to pick from, in display order.
    pub options: AnswerOptionSet,
    pub result: Option<SubmissionResult>,
}
