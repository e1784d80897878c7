use crate::db;
use crate::domain::models::Question;
use crate::domain::survey::QuestionInput;
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::surveys::{load_questions, require_owned_survey};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_BULK_QUESTIONS: usize = 50;

#[derive(Debug, Deserialize)]
struct BulkQuestionsPayload {
    questions: Vec<QuestionInput>,
}

#[derive(Debug, Deserialize)]
struct ReorderPayload {
    question_ids: Vec<Uuid>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/:id/questions", post(add_question))
        .route("/:id/questions/bulk", post(add_questions_bulk))
        .route("/:id/questions/order", put(reorder_questions))
        .route("/:id/questions/:qid", put(update_question).delete(delete_question))
        .with_state(state)
}

fn normalize(input: QuestionInput) -> Result<QuestionInput, StatusCode> {
    input.normalized().map_err(|e| {
        tracing::debug!("Rejected question input: {}", e);
        StatusCode::BAD_REQUEST
    })
}

async fn add_question(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
    Json(payload): Json<QuestionInput>,
) -> Result<(StatusCode, Json<Question>), StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let input = normalize(payload)?;

    let mut created = db::append_questions(&state.pool, survey_id, std::slice::from_ref(&input))
        .await
        .map_err(|e| {
            tracing::error!("Failed to add question to survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    let question = created.pop().ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn add_questions_bulk(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
    Json(payload): Json<BulkQuestionsPayload>,
) -> Result<(StatusCode, Json<Vec<Question>>), StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    if payload.questions.is_empty() || payload.questions.len() > MAX_BULK_QUESTIONS {
        return Err(StatusCode::BAD_REQUEST);
    }
    let inputs = payload
        .questions
        .into_iter()
        .map(normalize)
        .collect::<Result<Vec<_>, _>>()?;

    let created = db::append_questions(&state.pool, survey_id, &inputs)
        .await
        .map_err(|e| {
            tracing::error!("Failed to bulk add questions to survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    tracing::info!("Added {} questions to survey {}", created.len(), survey_id);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_question(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path((survey_id, question_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<QuestionInput>,
) -> Result<Json<Question>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let input = normalize(payload)?;

    let question = db::update_question(&state.pool, survey_id, question_id, &input)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update question {}: {}", question_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(question))
}

async fn delete_question(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path((survey_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let deleted = db::delete_question(&state.pool, survey_id, question_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete question {}: {}", question_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn reorder_questions(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
    Json(payload): Json<ReorderPayload>,
) -> Result<Json<Vec<Question>>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let current = load_questions(&state, survey_id).await?;
    let existing: Vec<Uuid> = current.iter().map(|q| q.id).collect();

    if !is_permutation(&existing, &payload.question_ids) {
        return Err(StatusCode::BAD_REQUEST);
    }

    db::reorder_questions(&state.pool, survey_id, &payload.question_ids)
        .await
        .map_err(|e| {
            tracing::error!("Failed to reorder questions for survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(load_questions(&state, survey_id).await?))
}

/// True when `proposed` names every id in `existing` exactly once.
fn is_permutation(existing: &[Uuid], proposed: &[Uuid]) -> bool {
    if existing.len() != proposed.len() {
        return false;
    }
    let known: HashSet<&Uuid> = existing.iter().collect();
    let mut seen = HashSet::with_capacity(proposed.len());
    proposed.iter().all(|id| known.contains(id) && seen.insert(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_check() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(is_permutation(&[a, b, c], &[c, a, b]));
        assert!(is_permutation(&[], &[]));
        assert!(!is_permutation(&[a, b], &[a]));
        assert!(!is_permutation(&[a, b], &[a, a]));
        assert!(!is_permutation(&[a, b], &[a, c]));
    }
}
