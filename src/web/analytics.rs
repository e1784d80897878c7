use crate::analytics::summary::{build_summary, SurveyAnalytics};
use crate::db;
use crate::domain::models::{Question, Response, SurveySession};
use crate::services::ai::{AiError, SurveyInsights};
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::surveys::require_owned_survey;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

/// Everything collected for one survey, with respondent PII decrypted.
pub(crate) struct SurveyResults {
    pub questions: Vec<Question>,
    pub sessions: Vec<SurveySession>,
    pub responses: Vec<Response>,
}

#[derive(Serialize)]
struct InsightsResponse {
    analytics: SurveyAnalytics,
    insights: SurveyInsights,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/:id/analytics", get(get_analytics))
        .route("/:id/insights", get(get_insights))
        .with_state(state)
}

pub(crate) async fn load_results(state: &SharedState, survey_id: Uuid) -> Result<SurveyResults, StatusCode> {
    let (questions, sessions, responses) = futures::try_join!(
        db::list_questions(&state.pool, survey_id),
        db::list_sessions(&state.pool, survey_id),
        db::list_responses_for_survey(&state.pool, survey_id)
    )
    .map_err(|e| {
        tracing::error!("Failed to load results for survey {}: {}", survey_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(SurveyResults {
        questions,
        sessions: sessions.into_iter().map(|row| row.open(&state.crypto)).collect(),
        responses,
    })
}

pub(crate) fn ai_status(err: &AiError) -> StatusCode {
    match err {
        AiError::Backend(_) => StatusCode::BAD_GATEWAY,
        AiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

async fn get_analytics(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<SurveyAnalytics>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let results = load_results(&state, survey_id).await?;
    Ok(Json(build_summary(
        &results.questions,
        &results.sessions,
        &results.responses,
    )))
}

async fn get_insights(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<InsightsResponse>, StatusCode> {
    let survey = require_owned_survey(&state, survey_id, user_id).await?;
    let results = load_results(&state, survey_id).await?;
    let analytics = build_summary(&results.questions, &results.sessions, &results.responses);

    let insights = state
        .ai
        .generate_insights(&survey, &analytics)
        .await
        .map_err(|e| {
            tracing::error!("Insights generation failed for survey {}: {}", survey_id, e);
            ai_status(&e)
        })?;

    Ok(Json(InsightsResponse { analytics, insights }))
}
