// src/services/grader.rs

//! Exercise grading.
//!
//! Every question in an exercise shares one option pool built from the
//! distinct answers of the whole exercise. Grading happens once per explicit
//! submission and the result lives only as long as the attempt does.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;

use crate::models::exercise::{Exercise, Question};

/// Errors raised while preparing or grading an attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GradeError {
    #[error("exercise has no questions")]
    NoQuestions,

    #[error("question {0} has no answer")]
    MalformedQuestion(usize),

    #[error("answer submitted for unknown question {0}")]
    UnknownQuestion(usize),

    #[error("a submission is already being graded")]
    SubmissionInProgress,

    #[error("attempt already graded, restart to try again")]
    AlreadyGraded,
}

/// Outcome of a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOutcome {
    Correct,
    Incorrect,
    Unanswered,
}

/// The randomized pool of selectable answers for an exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnswerOptionSet(Vec<String>);

impl AnswerOptionSet {
    /// Collects the distinct answers, keeping first-seen order.
    pub fn distinct(questions: &[Question]) -> Self {
        let mut seen = HashSet::new();
        let options = questions
            .iter()
            .filter(|q| seen.insert(q.answer.as_str()))
            .map(|q| q.answer.clone())
            .collect();
        Self(options)
    }

    /// Distinct answers in a uniformly shuffled order.
    pub fn shuffled<R: Rng + ?Sized>(questions: &[Question], rng: &mut R) -> Self {
        let mut set = Self::distinct(questions);
        set.0.shuffle(rng);
        set
    }

    pub fn options(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Graded result of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    pub outcomes: Vec<QuestionOutcome>,
    pub correct: usize,
    pub incorrect: usize,
    pub unanswered: usize,
    /// Percentage in `0..=100`.
    pub score: u8,
}

/// `round(100 * correct / total)` with halves rounded up.
fn percentage(correct: usize, total: usize) -> u8 {
    debug_assert!(total > 0 && correct <= total);
    ((200 * correct + total) / (2 * total)) as u8
}

/// Grades a submission against the answer key.
///
/// A missing index or an empty value counts as unanswered.
pub fn grade(
    questions: &[Question],
    submission: &HashMap<usize, String>,
) -> Result<SubmissionResult, GradeError> {
    if questions.is_empty() {
        return Err(GradeError::NoQuestions);
    }
    if let Some(&index) = submission.keys().find(|&&i| i >= questions.len()) {
        return Err(GradeError::UnknownQuestion(index));
    }

    let mut outcomes = Vec::with_capacity(questions.len());
    let mut correct = 0;
    let mut incorrect = 0;
    let mut unanswered = 0;

    for (index, question) in questions.iter().enumerate() {
        let outcome = match submission.get(&index).map(String::as_str) {
            None | Some("") => {
                unanswered += 1;
                QuestionOutcome::Unanswered
            }
            Some(selected) if selected == question.answer => {
                correct += 1;
                QuestionOutcome::Correct
            }
            Some(_) => {
                incorrect += 1;
                QuestionOutcome::Incorrect
            }
        };
        outcomes.push(outcome);
    }

    Ok(SubmissionResult {
        outcomes,
        correct,
        incorrect,
        unanswered,
        score: percentage(correct, questions.len()),
    })
}

#[derive(Debug)]
struct AttemptInner {
    options: AnswerOptionSet,
    result: Option<SubmissionResult>,
}

/// Snapshot of an attempt for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSnapshot {
    pub options: AnswerOptionSet,
    pub result: Option<SubmissionResult>,
}

/// One learner's pass through an exercise.
///
/// The option order is fixed between lifecycle points (start and restart) so
/// the options never reorder mid-attempt.
#[derive(Debug)]
pub struct ExerciseAttempt {
    exercise_id: String,
    questions: Vec<Question>,
    inner: Mutex<AttemptInner>,
    submitting: AtomicBool,
}

/// Clears the submitting flag when grading finishes, even on early return.
struct SubmittingGuard<'a>(&'a AtomicBool);

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExerciseAttempt {
    /// Starts an attempt. Fails for exercises that cannot be graded.
    pub fn start<R: Rng + ?Sized>(exercise: &Exercise, rng: &mut R) -> Result<Self, GradeError> {
        exercise.validate_for_attempt()?;
        let options = AnswerOptionSet::shuffled(&exercise.questions, rng);
        Ok(Self {
            exercise_id: exercise.id.clone(),
            questions: exercise.questions.clone(),
            inner: Mutex::new(AttemptInner {
                options,
                result: None,
            }),
            submitting: AtomicBool::new(false),
        })
    }

    pub fn exercise_id(&self) -> &str {
        &self.exercise_id
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        let inner = self.lock();
        AttemptSnapshot {
            options: inner.options.clone(),
            result: inner.result.clone(),
        }
    }

    /// Grades the submission. Only one submission may be graded at a time,
    /// and a graded attempt must be restarted before it is submitted again.
    pub fn submit(&self, answers: &HashMap<usize, String>) -> Result<SubmissionResult, GradeError> {
        if self.submitting.swap(true, Ordering::AcqRel) {
            return Err(GradeError::SubmissionInProgress);
        }
        let _guard = SubmittingGuard(&self.submitting);

        if self.lock().result.is_some() {
            return Err(GradeError::AlreadyGraded);
        }

        let result = grade(&self.questions, answers)?;
        self.lock().result = Some(result.clone());
        Ok(result)
    }

    /// Clears the result and draws a fresh option order. Refused while a
    /// submission is being graded.
    pub fn restart<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<AttemptSnapshot, GradeError> {
        if self.submitting.swap(true, Ordering::AcqRel) {
            return Err(GradeError::SubmissionInProgress);
        }
        let _guard = SubmittingGuard(&self.submitting);

        let mut inner = self.lock();
        inner.result = None;
        inner.options = AnswerOptionSet::shuffled(&self.questions, rng);
        Ok(AttemptSnapshot {
            options: inner.options.clone(),
            result: None,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AttemptInner> {
        // Poisoning only happens if grading panicked; the state is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
