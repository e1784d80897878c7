use crate::db;
use crate::domain::models::{AiSuggestion, QuestionType};
use crate::services::ai::{GeneratedQuestion, ImprovedQuestion, InvitationEmail};
use crate::state::SharedState;
use crate::web::analytics::ai_status;
use crate::web::session::UserSession;
use crate::web::surveys::require_owned_survey;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_PROMPT_CHARS: usize = 500;
const DEFAULT_QUESTION_COUNT: usize = 5;
const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
struct GenerateQuestionsPayload {
    topic: String,
    count: Option<usize>,
    survey_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct GenerateQuestionsResponse {
    suggestion_id: Uuid,
    questions: Vec<GeneratedQuestion>,
}

#[derive(Debug, Deserialize)]
struct ImprovePayload {
    question_text: String,
    question_type: QuestionType,
}

#[derive(Debug, Deserialize)]
struct EmailPayload {
    survey_id: Uuid,
    tone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/questions", post(generate_questions))
        .route("/improve", post(improve_question))
        .route("/email", post(generate_email))
        .route("/suggestions", get(list_suggestions))
        .with_state(state)
}

fn validate_prompt(text: &str) -> Result<&str, StatusCode> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > MAX_PROMPT_CHARS {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(text)
}

async fn generate_questions(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<GenerateQuestionsPayload>,
) -> Result<Json<GenerateQuestionsResponse>, StatusCode> {
    let topic = validate_prompt(&payload.topic)?;
    if let Some(survey_id) = payload.survey_id {
        require_owned_survey(&state, survey_id, user_id).await?;
    }

    let count = payload.count.unwrap_or(DEFAULT_QUESTION_COUNT);
    let questions = state.ai.generate_questions(topic, count).await.map_err(|e| {
        tracing::error!("Question generation failed for user {}: {}", user_id, e);
        ai_status(&e)
    })?;

    let suggested = serde_json::to_value(&questions).map_err(|e| {
        tracing::error!("Failed to serialise generated questions: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let suggestion_id = db::insert_ai_suggestion(&state.pool, user_id, payload.survey_id, topic, &suggested)
        .await
        .map_err(|e| {
            tracing::error!("Failed to record AI suggestion: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(GenerateQuestionsResponse {
        suggestion_id,
        questions,
    }))
}

async fn improve_question(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<ImprovePayload>,
) -> Result<Json<ImprovedQuestion>, StatusCode> {
    let text = validate_prompt(&payload.question_text)?;
    let improved = state
        .ai
        .improve_question(text, payload.question_type)
        .await
        .map_err(|e| {
            tracing::error!("Question improvement failed for user {}: {}", user_id, e);
            ai_status(&e)
        })?;
    Ok(Json(improved))
}

async fn generate_email(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<EmailPayload>,
) -> Result<Json<InvitationEmail>, StatusCode> {
    let survey = require_owned_survey(&state, payload.survey_id, user_id).await?;
    let link = state.config.survey_link(survey.id);
    let tone = payload.tone.unwrap_or_default();

    let email = state
        .ai
        .generate_email(&survey, &link, &tone)
        .await
        .map_err(|e| {
            tracing::error!("Invitation email generation failed for survey {}: {}", survey.id, e);
            ai_status(&e)
        })?;
    Ok(Json(email))
}

async fn list_suggestions(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AiSuggestion>>, StatusCode> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let suggestions = db::list_ai_suggestions(&state.pool, user_id, limit)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list AI suggestions for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(suggestions))
}
