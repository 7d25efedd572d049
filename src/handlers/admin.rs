// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        category::{SaveCategoryRequest, SaveSubcategoryRequest},
        exercise::{Question, SaveExerciseRequest},
        group::{SaveGroupRequest, SaveWordRequest, WordEntry, WordList, apply_word_edit},
    },
    state::AppState,
    utils::html::clean_html,
};

/// Creates a top level category.
/// Admin only.
pub async fn create_category(
    State(state): State<AppState>,
    Json(payload): Json<SaveCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let category = state
        .content
        .create_category(payload.name.trim(), payload.product.as_deref())
        .await?;
    tracing::info!("category created: {}", category.name);
    Ok((StatusCode::CREATED, Json(json!({"id": category.id}))))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let category = state
        .content
        .update_category(&id, payload.name.trim(), payload.product.as_deref())
        .await?;
    Ok(Json(category))
}

/// Deletes a category with everything under it.
pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.content.delete_category(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_subcategory(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
    Json(payload): Json<SaveSubcategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let subcategory = state
        .content
        .create_subcategory(&category_id, payload.name.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({"id": subcategory.id}))))
}

pub async fn delete_subcategory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.content.delete_subcategory(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_group(
    State(state): State<AppState>,
    Path(subcategory_id): Path<String>,
    Json(payload): Json<SaveGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let group = state
        .content
        .create_group(&subcategory_id, payload.number, payload.free)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({"id": group.id}))))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let group = state.content.update_group(&id, payload.number, payload.free).await?;
    Ok(Json(group))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.content.delete_group(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_words(state: &AppState, group_id: &str) -> Result<WordList, AppError> {
    Ok(state
        .content
        .get_group(group_id)
        .await?
        .ok_or(AppError::NotFound("Group not found".to_string()))?
        .words)
}

/// Adds, updates or renames a word in a group's list.
pub async fn save_word(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(payload): Json<SaveWordRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut words = load_words(&state, &group_id).await?;
    let entry = WordEntry {
        custom_definition: clean_html(&payload.custom_definition),
        dictionary_url: payload.dictionary_url.filter(|u| !u.trim().is_empty()),
        api_definitions: payload.api_definitions,
    };
    let message = apply_word_edit(&mut words, payload.original.as_deref(), &payload.word, entry)?;
    state.content.set_words(&group_id, &words).await?;

    tracing::info!("group {}: {}", group_id, message);
    Ok(Json(json!({"message": message})))
}

pub async fn delete_word(
    State(state): State<AppState>,
    Path((group_id, word)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let mut words = load_words(&state, &group_id).await?;
    if words.remove(&word).is_none() {
        return Err(AppError::NotFound(format!("Word not found: {}", word)));
    }
    state.content.set_words(&group_id, &words).await?;
    Ok(Json(json!({"message": format!("Word deleted: {}", word)})))
}

/// Drops blank questions and checks every answer is in the word list.
fn prepare_questions(questions: Vec<Question>, words: &WordList) -> Result<Vec<Question>, AppError> {
    let questions: Vec<Question> = questions
        .into_iter()
        .filter(|q| !q.is_blank())
        .map(|q| Question {
            question: q.question.trim().to_string(),
            answer: q.answer.trim().to_string(),
        })
        .collect();

    if questions.is_empty() {
        return Err(AppError::BadRequest("Please add at least one question.".to_string()));
    }
    if let Some(q) = questions.iter().find(|q| !words.contains_key(&q.answer)) {
        return Err(AppError::BadRequest(format!(
            "'{}' is not in this group's word list.",
            q.answer
        )));
    }
    Ok(questions)
}

pub async fn create_exercise(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(payload): Json<SaveExerciseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let words = load_words(&state, &group_id).await?;
    let questions = prepare_questions(payload.questions, &words)?;

    let exercise = state.content.create_exercise(&group_id, &questions).await?;
    Ok((StatusCode::CREATED, Json(json!({"id": exercise.id}))))
}

/// Replaces an exercise's questions. Attempts already started keep the old set.
pub async fn update_exercise(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveExerciseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let exercise = state
        .content
        .get_exercise(&id)
        .await?
        .ok_or(AppError::NotFound("Exercise not found".to_string()))?;
    let words = load_words(&state, &exercise.group_id).await?;
    let questions = prepare_questions(payload.questions, &words)?;

    let exercise = state.content.update_exercise(&id, &questions).await?;
    Ok(Json(exercise))
}

pub async fn delete_exercise(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.content.delete_exercise(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Looks a word up in the external dictionary for the word editor.
pub async fn lookup_word(
    State(state): State<AppState>,
    Path(word): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let definitions = state.dictionary.lookup(&word).await?;
    Ok(Json(definitions))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(question: &str, answer: &str) -> Question {
        Question {
            question: question.to_string(),
            answer: answer.to_string(),
        }
    }

    fn words(list: &[&str]) -> WordList {
        list.iter().map(|w| (w.to_string(), WordEntry::default())).collect()
    }

    #[test]
    fn test_blank_questions_dropped() {
        let prepared = prepare_questions(
            vec![q("The ___ is red.", " apple "), q("  ", "water"), q("Drink ___.", "")],
            &words(&["apple", "water"]),
        )
        .unwrap();
        assert_eq!(prepared, vec![q("The ___ is red.", "apple")]);
    }

    #[test]
    fn test_answer_must_be_in_word_list() {
        let err = prepare_questions(vec![q("The ___ is red.", "cherry")], &words(&["apple"])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("cherry")));
    }

    #[test]
    fn test_all_blank_rejected() {
        assert!(prepare_questions(vec![q("", "")], &words(&["apple"])).is_err());
    }
}
