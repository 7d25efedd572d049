// src/handlers/catalog.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::{
        category::{Subcategory, sort_subcategories},
        exercise::ExerciseSummary,
        group::{Group, GroupSummary, GroupView},
    },
    services::entitlement::ContentGate,
    state::AppState,
    utils::jwt::CurrentAccount,
};

/// Product that unlocks the groups of a subcategory, taken from its top level category.
async fn category_product(state: &AppState, subcategory: &Subcategory) -> Result<Option<String>, AppError> {
    let category = state
        .content
        .get_category(&subcategory.parent)
        .await?
        .ok_or_else(|| AppError::InternalServerError(format!("subcategory {} has no category", subcategory.id)))?;
    Ok(category.product)
}

/// Product that unlocks a group.
pub(crate) async fn required_product(state: &AppState, group: &Group) -> Result<Option<String>, AppError> {
    let subcategory = state
        .content
        .get_subcategory(&group.subcategory_id)
        .await?
        .ok_or_else(|| AppError::InternalServerError(format!("group {} has no subcategory", group.id)))?;
    category_product(state, &subcategory).await
}

pub async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let categories = state.content.list_categories().await?;
    Ok(Json(categories))
}

/// Subcategories of a category, regular sublists before "More" ones.
pub async fn list_subcategories(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .content
        .get_category(&category_id)
        .await?
        .ok_or(AppError::NotFound("Category not found".to_string()))?;

    let mut subcategories = state.content.list_subcategories(&category_id).await?;
    sort_subcategories(&mut subcategories);
    Ok(Json(subcategories))
}

pub async fn list_groups(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(subcategory_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let subcategory = state
        .content
        .get_subcategory(&subcategory_id)
        .await?
        .ok_or(AppError::NotFound("Subcategory not found".to_string()))?;
    let product = category_product(&state, &subcategory).await?;

    let subscription = state.subscription_for(&account).await?;
    let groups = state.content.list_groups(&subcategory_id).await?;

    let summaries: Vec<GroupSummary> = groups
        .into_iter()
        .map(|g| GroupSummary {
            locked: !state.evaluator.can_view(
                ContentGate {
                    free: g.free,
                    required_product: product.as_deref(),
                },
                &subscription,
            ),
            word_count: g.words.len(),
            id: g.id,
            number: g.number,
            free: g.free,
        })
        .collect();

    Ok(Json(summaries))
}

/// Group page: sorted word list, word details and exercises.
/// Non-free groups need an unlocking subscription.
pub async fn get_group(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let group = state
        .content
        .get_group(&group_id)
        .await?
        .ok_or(AppError::NotFound("Group not found".to_string()))?;

    let product = required_product(&state, &group).await?;
    let subscription = state.subscription_for(&account).await?;
    let gate = ContentGate {
        free: group.free,
        required_product: product.as_deref(),
    };
    if !state.evaluator.can_view(gate, &subscription) {
        tracing::debug!("group {} refused to {:?}", group.id, account.uid);
        return Err(AppError::Forbidden(
            "A subscription is required to view this group.".to_string(),
        ));
    }

    let subcategory = state
        .content
        .get_subcategory(&group.subcategory_id)
        .await?
        .map(|s| s.name)
        .unwrap_or_default();

    let exercises = state
        .content
        .list_exercises(&group.id)
        .await?
        .into_iter()
        .enumerate()
        .map(|(i, e)| ExerciseSummary {
            id: e.id,
            number: i + 1,
            question_count: e.questions.len(),
        })
        .collect();

    Ok(Json(GroupView {
        word_list: group.words.keys().cloned().collect(),
        id: group.id,
        number: group.number,
        free: group.free,
        subcategory,
        words: group.words,
        exercises,
    }))
}
