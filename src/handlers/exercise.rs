// src/handlers/exercise.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    handlers::catalog::required_product,
    models::exercise::{AttemptView, PublicQuestion, SubmitAttemptRequest},
    services::{
        entitlement::ContentGate,
        grader::{AttemptSnapshot, ExerciseAttempt},
    },
    state::AppState,
    utils::jwt::CurrentAccount,
};

fn attempt_view(attempt_id: String, attempt: &ExerciseAttempt, snapshot: AttemptSnapshot) -> AttemptView {
    AttemptView {
        attempt_id,
        exercise_id: attempt.exercise_id().to_string(),
        questions: PublicQuestion::from_questions(attempt.questions()),
        options: snapshot.options,
        result: snapshot.result,
    }
}

/// Starts an attempt with a freshly shuffled option pool.
pub async fn start_attempt(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(exercise_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let exercise = state
        .content
        .get_exercise(&exercise_id)
        .await?
        .ok_or(AppError::NotFound("Exercise not found".to_string()))?;
    let group = state
        .content
        .get_group(&exercise.group_id)
        .await?
        .ok_or_else(|| AppError::InternalServerError(format!("exercise {} has no group", exercise.id)))?;

    let product = required_product(&state, &group).await?;
    let subscription = state.subscription_for(&account).await?;
    let gate = ContentGate {
        free: group.free,
        required_product: product.as_deref(),
    };
    if !state.evaluator.can_view(gate, &subscription) {
        return Err(AppError::Forbidden(
            "A subscription is required for this exercise.".to_string(),
        ));
    }

    let attempt = ExerciseAttempt::start(&exercise, &mut rand::rng())?;
    let (attempt_id, attempt) = state.attempts.insert(attempt);
    tracing::debug!("attempt {} started on exercise {}", attempt_id, exercise.id);

    let snapshot = attempt.snapshot();
    Ok((StatusCode::CREATED, Json(attempt_view(attempt_id, &attempt, snapshot))))
}

/// Grades an attempt. Answers are keyed by question index.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = state
        .attempts
        .get(&attempt_id)
        .ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    let result = attempt.submit(&payload.answers)?;
    tracing::info!(
        "attempt {} graded: {}/{} ({}%)",
        attempt_id,
        result.correct,
        attempt.questions().len(),
        result.score
    );
    Ok(Json(result))
}

/// Clears the result and reshuffles the options.
pub async fn restart_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = state
        .attempts
        .get(&attempt_id)
        .ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    let snapshot = attempt.restart(&mut rand::rng())?;
    Ok(Json(attempt_view(attempt_id, &attempt, snapshot)))
}

pub async fn discard_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.attempts.remove(&attempt_id) {
        return Err(AppError::NotFound("Attempt not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}
