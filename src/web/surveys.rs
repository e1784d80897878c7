use crate::db;
use crate::domain::models::{Question, Response, Survey, SurveyListItem, SurveySession};
use crate::domain::survey::{SurveyInput, MAX_TITLE};
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SurveyDetail {
    #[serde(flatten)]
    pub survey: Survey,
    pub questions: Vec<Question>,
    pub public_url: String,
}

#[derive(Debug, Serialize)]
struct SessionWithAnswers {
    #[serde(flatten)]
    session: SurveySession,
    answers: Vec<Response>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_surveys).post(create_survey))
        .route("/:id", get(get_survey).put(update_survey).delete(delete_survey))
        .route("/:id/publish", post(publish_survey))
        .route("/:id/unpublish", post(unpublish_survey))
        .route("/:id/duplicate", post(duplicate_survey))
        .route("/:id/responses", get(list_responses))
        .with_state(state)
}

/// Loads a survey the caller owns. Surveys owned by someone else are
/// reported as missing so ids cannot be probed.
pub(crate) async fn require_owned_survey(
    state: &SharedState,
    survey_id: Uuid,
    user_id: Uuid,
) -> Result<Survey, StatusCode> {
    let survey = db::find_survey(&state.pool, survey_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    if survey.owner_id != user_id {
        tracing::warn!("User {} tried to access survey {} they do not own", user_id, survey_id);
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(survey)
}

pub(crate) async fn load_questions(state: &SharedState, survey_id: Uuid) -> Result<Vec<Question>, StatusCode> {
    db::list_questions(&state.pool, survey_id).await.map_err(|e| {
        tracing::error!("Failed to load questions for survey {}: {}", survey_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn list_surveys(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
) -> Result<Json<Vec<SurveyListItem>>, StatusCode> {
    let surveys = db::list_surveys_for_owner(&state.pool, user_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list surveys for {}: {}", user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(surveys))
}

async fn create_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<SurveyInput>,
) -> Result<(StatusCode, Json<Survey>), StatusCode> {
    let input = payload.normalized().map_err(|e| {
        tracing::debug!("Rejected survey input: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let survey = db::create_survey(&state.pool, user_id, &input)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create survey: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!("User {} created survey {}", user_id, survey.id);
    Ok((StatusCode::CREATED, Json(survey)))
}

async fn get_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<SurveyDetail>, StatusCode> {
    let survey = require_owned_survey(&state, survey_id, user_id).await?;
    let questions = load_questions(&state, survey_id).await?;
    Ok(Json(SurveyDetail {
        public_url: state.config.survey_link(survey.id),
        survey,
        questions,
    }))
}

async fn update_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
    Json(payload): Json<SurveyInput>,
) -> Result<Json<Survey>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let input = payload.normalized().map_err(|e| {
        tracing::debug!("Rejected survey input: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let survey = db::update_survey(&state.pool, survey_id, &input)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(survey))
}

async fn delete_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    let deleted = db::delete_survey(&state.pool, survey_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }
    tracing::info!("User {} deleted survey {}", user_id, survey_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<Survey>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    check_publishable(&load_questions(&state, survey_id).await?)?;
    set_published(&state, survey_id, true).await
}

/// A survey needs at least one question before it can go live.
fn check_publishable(questions: &[Question]) -> Result<(), StatusCode> {
    if questions.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    Ok(())
}

async fn unpublish_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<Survey>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;
    set_published(&state, survey_id, false).await
}

async fn set_published(state: &SharedState, survey_id: Uuid, published: bool) -> Result<Json<Survey>, StatusCode> {
    let survey = db::set_survey_published(&state.pool, survey_id, published)
        .await
        .map_err(|e| {
            tracing::error!("Failed to set published={} on survey {}: {}", published, survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    tracing::info!("Survey {} published={}", survey_id, published);
    Ok(Json(survey))
}

async fn duplicate_survey(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Survey>), StatusCode> {
    let original = require_owned_survey(&state, survey_id, user_id).await?;
    let title = copy_title(&original.title);

    let copy = db::duplicate_survey(&state.pool, survey_id, user_id, &title)
        .await
        .map_err(|e| {
            tracing::error!("Failed to duplicate survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok((StatusCode::CREATED, Json(copy)))
}

fn copy_title(title: &str) -> String {
    const SUFFIX: &str = " (copy)";
    let keep = MAX_TITLE - SUFFIX.len();
    let base: String = title.chars().take(keep).collect();
    format!("{base}{SUFFIX}")
}

async fn list_responses(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<Vec<SessionWithAnswers>>, StatusCode> {
    require_owned_survey(&state, survey_id, user_id).await?;

    let (sessions, responses) = futures::try_join!(
        db::list_sessions(&state.pool, survey_id),
        db::list_responses_for_survey(&state.pool, survey_id)
    )
    .map_err(|e| {
        tracing::error!("Failed to load responses for survey {}: {}", survey_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut by_session: HashMap<Uuid, Vec<Response>> = HashMap::new();
    for response in responses {
        by_session.entry(response.session_id).or_default().push(response);
    }

    let items = sessions
        .into_iter()
        .map(|row| {
            let session = row.open(&state.crypto);
            let answers = by_session.remove(&session.id).unwrap_or_default();
            SessionWithAnswers { session, answers }
        })
        .collect();
    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QuestionType;

    #[test]
    fn copy_title_stays_within_limit() {
        assert_eq!(copy_title("Onboarding"), "Onboarding (copy)");
        let long = "x".repeat(MAX_TITLE);
        let copied = copy_title(&long);
        assert_eq!(copied.chars().count(), MAX_TITLE);
        assert!(copied.ends_with(" (copy)"));
    }

    #[test]
    fn publishing_needs_a_question() {
        assert_eq!(check_publishable(&[]), Err(StatusCode::UNPROCESSABLE_ENTITY));

        let question = Question {
            id: Uuid::new_v4(),
            survey_id: Uuid::new_v4(),
            question_text: "How did it go?".into(),
            question_type: QuestionType::Rating,
            options: Vec::new(),
            required: true,
            order_index: 0,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(check_publishable(&[question]), Ok(()));
    }
}
