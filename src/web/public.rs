//! Anonymous respondent endpoints: view a published survey, start a
//! session, autosave a draft, submit answers and complete.

use crate::db::{self, SessionRow};
use crate::domain::answer::{is_valid_email, validate_answer, AnswerError};
use crate::domain::models::{AnswerValue, Question, Survey};
use crate::domain::wizard::{ResponseWizard, WizardSnapshot};
use crate::middleware::{client_ip, RateLimiter};
use crate::state::SharedState;
use crate::web::surveys::load_questions;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use uuid::Uuid;

const MAX_USER_AGENT: usize = 512;

// 20 new sessions per minute per IP
static SESSION_START_LIMITER: Lazy<RateLimiter> = Lazy::new(|| RateLimiter::new(20, 60));

pub fn session_start_limiter() -> &'static RateLimiter {
    &SESSION_START_LIMITER
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AnswerIssue {
    pub question_id: Uuid,
    pub error: String,
}

/// Answers that passed validation, plus optional questions whose answer
/// was sent blank and should be removed.
#[derive(Debug, Default, PartialEq)]
pub struct ValidatedBatch {
    pub answers: Vec<(Uuid, AnswerValue)>,
    pub cleared: Vec<Uuid>,
}

#[derive(Debug)]
pub enum PublicError {
    Status(StatusCode),
    InvalidAnswers(Vec<AnswerIssue>),
    MissingRequired(Vec<Uuid>),
}

impl From<StatusCode> for PublicError {
    fn from(status: StatusCode) -> Self {
        PublicError::Status(status)
    }
}

impl IntoResponse for PublicError {
    fn into_response(self) -> Response {
        match self {
            PublicError::Status(status) => status.into_response(),
            PublicError::InvalidAnswers(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "errors": errors })),
            )
                .into_response(),
            PublicError::MissingRequired(missing) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "missing_required": missing })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PublicSurvey {
    id: Uuid,
    title: String,
    description: Option<String>,
    questions: Vec<Question>,
}

#[derive(Debug, Default, Deserialize)]
struct StartSessionPayload {
    respondent_email: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartSessionResponse {
    session_id: Uuid,
    survey_id: Uuid,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DraftPayload {
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub answers: HashMap<Uuid, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct DraftResponse {
    session_id: Uuid,
    draft: Option<WizardSnapshot>,
    progress: f64,
    answered: usize,
    complete: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnswerPayload {
    pub question_id: Uuid,
    pub value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SubmitPayload {
    answers: Vec<AnswerPayload>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    saved: usize,
    cleared: usize,
}

#[derive(Debug, Default, Deserialize)]
struct CompletePayload {
    respondent_email: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompleteResponse {
    session_id: Uuid,
    completed_at: DateTime<Utc>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/surveys/:id", get(get_public_survey))
        .route("/surveys/:id/sessions", post(start_session))
        .route("/sessions/:id/draft", get(get_draft).put(save_draft))
        .route("/sessions/:id/responses", post(submit_responses))
        .route("/sessions/:id/complete", post(complete_session))
        .with_state(state)
}

async fn load_published_survey(state: &SharedState, survey_id: Uuid) -> Result<Survey, StatusCode> {
    let survey = db::find_survey(&state.pool, survey_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load survey {}: {}", survey_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !survey.is_published {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(survey)
}

/// Loads a session whose survey is still published.
async fn load_session(state: &SharedState, session_id: Uuid) -> Result<SessionRow, StatusCode> {
    let session = db::find_session(&state.pool, session_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load session {}: {}", session_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    load_published_survey(state, session.survey_id).await?;
    Ok(session)
}

/// Same as [`load_session`] but rejects completed sessions with 409.
async fn load_open_session(state: &SharedState, session_id: Uuid) -> Result<SessionRow, StatusCode> {
    let session = load_session(state, session_id).await?;
    if session.completed_at.is_some() {
        return Err(StatusCode::CONFLICT);
    }
    Ok(session)
}

fn normalize_email(raw: Option<&str>) -> Result<Option<String>, StatusCode> {
    match raw.map(str::trim).filter(|e| !e.is_empty()) {
        None => Ok(None),
        Some(email) => {
            let email = email.to_lowercase();
            if is_valid_email(&email) {
                Ok(Some(email))
            } else {
                Err(StatusCode::BAD_REQUEST)
            }
        }
    }
}

fn seal(state: &SharedState, value: Option<&str>) -> Result<Option<String>, StatusCode> {
    state.crypto.seal_optional(value).map_err(|e| {
        tracing::error!("Failed to encrypt respondent data: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Validates a batch of answers against the survey's questions. A blank
/// answer to an optional question clears any earlier answer.
pub fn validate_batch(
    questions: &[Question],
    answers: &[AnswerPayload],
) -> Result<ValidatedBatch, Vec<AnswerIssue>> {
    let by_id: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let mut batch = ValidatedBatch::default();
    let mut issues = Vec::new();

    for answer in answers {
        let Some(question) = by_id.get(&answer.question_id) else {
            issues.push(AnswerIssue {
                question_id: answer.question_id,
                error: "unknown question".to_string(),
            });
            continue;
        };
        match validate_answer(question, &answer.value) {
            Ok(value) => batch.answers.push((question.id, value)),
            Err(AnswerError::Empty) if !question.required => batch.cleared.push(question.id),
            Err(e) => issues.push(AnswerIssue {
                question_id: question.id,
                error: e.to_string(),
            }),
        }
    }

    if issues.is_empty() {
        Ok(batch)
    } else {
        Err(issues)
    }
}

/// Builds the snapshot to persist from an autosave payload. Drafts are
/// partial by nature, so answers that do not validate yet are dropped
/// instead of rejected.
pub fn draft_snapshot(questions: Vec<Question>, payload: DraftPayload) -> ResponseWizard {
    let mut wizard = ResponseWizard::new(questions);
    let accepted: Vec<(Uuid, AnswerValue)> = wizard
        .questions()
        .iter()
        .filter_map(|q| {
            let raw = payload.answers.get(&q.id)?;
            validate_answer(q, raw).ok().map(|v| (q.id, v))
        })
        .collect();
    for (id, value) in accepted {
        wizard.set_answer(id, value);
    }
    // a draft never sits past a required question that is still unanswered
    while wizard.current_index() < payload.current_index && wizard.next() {}
    wizard
}

async fn get_public_survey(
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
) -> Result<Json<PublicSurvey>, StatusCode> {
    let survey = load_published_survey(&state, survey_id).await?;
    let questions = load_questions(&state, survey_id).await?;
    Ok(Json(PublicSurvey {
        id: survey.id,
        title: survey.title,
        description: survey.description,
        questions,
    }))
}

async fn start_session(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<StartSessionPayload>>,
) -> Result<(StatusCode, Json<StartSessionResponse>), StatusCode> {
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    if !SESSION_START_LIMITER.check(&ip).await {
        tracing::warn!("Session start rate limit exceeded for IP: {}", ip);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    let survey = load_published_survey(&state, survey_id).await?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let email = normalize_email(payload.respondent_email.as_deref())?;

    let enc_email = seal(&state, email.as_deref())?;
    let enc_ip = seal(&state, Some(ip.as_str()))?;
    let user_agent: Option<String> = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT).collect());

    let session = db::create_session(
        &state.pool,
        survey.id,
        enc_email.as_deref(),
        enc_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to start session for survey {}: {}", survey.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!("Started session {} for survey {}", session.id, survey.id);
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: session.id,
            survey_id: survey.id,
            started_at: session.started_at,
        }),
    ))
}

async fn get_draft(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<DraftResponse>, StatusCode> {
    let session = load_open_session(&state, session_id).await?;
    let questions = load_questions(&state, session.survey_id).await?;

    let snapshot = session
        .draft
        .and_then(|raw| match serde_json::from_value::<WizardSnapshot>(raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Discarding unreadable draft for session {}: {}", session_id, e);
                None
            }
        });

    let Some(snapshot) = snapshot else {
        let wizard = ResponseWizard::new(questions);
        return Ok(Json(DraftResponse {
            session_id,
            draft: None,
            progress: wizard.progress(),
            answered: 0,
            complete: wizard.is_complete(),
        }));
    };

    let saved_at = session.draft_saved_at.unwrap_or(snapshot.saved_at);
    // questions may have changed since the draft was saved
    let wizard = ResponseWizard::restore(questions, snapshot);
    let mut restored = wizard.snapshot();
    restored.saved_at = saved_at;

    Ok(Json(DraftResponse {
        session_id,
        draft: Some(restored),
        progress: wizard.progress(),
        answered: wizard.answered_count(),
        complete: wizard.is_complete(),
    }))
}

async fn save_draft(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<DraftPayload>,
) -> Result<Json<DraftResponse>, StatusCode> {
    let session = load_open_session(&state, session_id).await?;
    let questions = load_questions(&state, session.survey_id).await?;

    let wizard = draft_snapshot(questions, payload);
    let mut snapshot = wizard.snapshot();
    let raw = serde_json::to_value(&snapshot).map_err(|e| {
        tracing::error!("Failed to serialise draft: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let saved_at = db::save_draft(&state.pool, session_id, &raw)
        .await
        .map_err(|e| {
            tracing::error!("Failed to save draft for session {}: {}", session_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        // completed between the load and the write
        .ok_or(StatusCode::CONFLICT)?;
    snapshot.saved_at = saved_at;

    tracing::debug!("Autosaved session {} at step {}", session_id, wizard.current_index());
    Ok(Json(DraftResponse {
        session_id,
        draft: Some(snapshot),
        progress: wizard.progress(),
        answered: wizard.answered_count(),
        complete: wizard.is_complete(),
    }))
}

async fn submit_responses(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitPayload>,
) -> Result<Json<SubmitResponse>, PublicError> {
    let session = load_open_session(&state, session_id).await?;
    let questions = load_questions(&state, session.survey_id).await?;

    let batch = validate_batch(&questions, &payload.answers).map_err(|issues| {
        tracing::debug!("Rejected {} answers for session {}", issues.len(), session_id);
        PublicError::InvalidAnswers(issues)
    })?;

    db::save_responses(&state.pool, session_id, &batch.answers, &batch.cleared)
        .await
        .map_err(|e| {
            tracing::error!("Failed to save responses for session {}: {}", session_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(SubmitResponse {
        saved: batch.answers.len(),
        cleared: batch.cleared.len(),
    }))
}

async fn complete_session(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<CompletePayload>>,
) -> Result<Json<CompleteResponse>, PublicError> {
    let session = load_open_session(&state, session_id).await?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let email = normalize_email(payload.respondent_email.as_deref())?;

    let (questions, responses) = futures::try_join!(
        db::list_questions(&state.pool, session.survey_id),
        db::list_responses_for_session(&state.pool, session_id)
    )
    .map_err(|e| {
        tracing::error!("Failed to load answers for session {}: {}", session_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let answers = responses
        .into_iter()
        .map(|r| (r.question_id, r.value))
        .collect();
    let wizard = ResponseWizard::with_answers(questions, answers);
    let missing = wizard.missing_required();
    if !missing.is_empty() {
        return Err(PublicError::MissingRequired(missing));
    }

    let enc_email = seal(&state, email.as_deref())?;
    let completed_at = db::complete_session(&state.pool, session_id, enc_email.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Failed to complete session {}: {}", session_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::CONFLICT)?;

    tracing::info!("Session {} completed", session_id);
    Ok(Json(CompleteResponse {
        session_id,
        completed_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QuestionType;
    use serde_json::json;

    fn question(order_index: i32, question_type: QuestionType, required: bool) -> Question {
        Question {
            id: Uuid::new_v4(),
            survey_id: Uuid::nil(),
            question_text: format!("Q{order_index}"),
            question_type,
            options: if question_type == QuestionType::MultipleChoice {
                vec!["Red".into(), "Blue".into()]
            } else {
                vec![]
            },
            required,
            order_index,
            created_at: Utc::now(),
        }
    }

    fn answer(question_id: Uuid, value: serde_json::Value) -> AnswerPayload {
        AnswerPayload { question_id, value }
    }

    #[test]
    fn batch_accepts_valid_and_skips_blank_optional() {
        let rating = question(0, QuestionType::Rating, true);
        let comment = question(1, QuestionType::Text, false);
        let batch = validate_batch(
            &[rating.clone(), comment.clone()],
            &[answer(rating.id, json!("4")), answer(comment.id, json!("   "))],
        )
        .unwrap();
        assert_eq!(batch.answers, vec![(rating.id, AnswerValue::Number(4.0))]);
        assert_eq!(batch.cleared, vec![comment.id]);
    }

    #[test]
    fn blank_optional_answer_clears_previous_one() {
        let comment = question(0, QuestionType::Text, false);
        let colour = question(1, QuestionType::MultipleChoice, false);
        let batch = validate_batch(
            &[comment.clone(), colour.clone()],
            &[answer(comment.id, json!(null)), answer(colour.id, json!(""))],
        )
        .unwrap();
        assert!(batch.answers.is_empty());
        assert_eq!(batch.cleared, vec![comment.id, colour.id]);
    }

    #[test]
    fn mistyped_optional_answers_are_rejected() {
        let comment = question(0, QuestionType::Text, false);
        let colour = question(1, QuestionType::MultipleChoice, false);
        let issues = validate_batch(
            &[comment.clone(), colour.clone()],
            &[answer(comment.id, json!(true)), answer(colour.id, json!(["Red"]))],
        )
        .unwrap_err();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.error == AnswerError::NotText.to_string()));
    }

    #[test]
    fn batch_reports_every_problem() {
        let choice = question(0, QuestionType::MultipleChoice, true);
        let yes_no = question(1, QuestionType::YesNo, true);
        let stranger = Uuid::new_v4();
        let issues = validate_batch(
            &[choice.clone(), yes_no.clone()],
            &[
                answer(choice.id, json!("Green")),
                answer(yes_no.id, json!(null)),
                answer(stranger, json!("x")),
            ],
        )
        .unwrap_err();

        let ids: Vec<Uuid> = issues.iter().map(|i| i.question_id).collect();
        assert_eq!(ids, vec![choice.id, yes_no.id, stranger]);
        assert_eq!(issues[0].error, AnswerError::UnknownOption.to_string());
        assert_eq!(issues[2].error, "unknown question");
    }

    #[test]
    fn draft_keeps_valid_answers_and_clamps_index() {
        let first = question(0, QuestionType::Number, true);
        let second = question(1, QuestionType::Email, false);
        let mut answers = HashMap::new();
        answers.insert(first.id, json!(12));
        answers.insert(second.id, json!("not-an-email"));
        answers.insert(Uuid::new_v4(), json!("orphan"));

        let wizard = draft_snapshot(
            vec![second.clone(), first.clone()],
            DraftPayload {
                current_index: 9,
                answers,
            },
        );
        let snapshot = wizard.snapshot();
        assert_eq!(snapshot.current_index, 1);
        assert_eq!(snapshot.answers.len(), 1);
        assert_eq!(snapshot.answers.get(&first.id), Some(&AnswerValue::Number(12.0)));
        assert!(wizard.is_complete());
    }

    #[test]
    fn draft_stops_at_unanswered_required_question() {
        let intro = question(0, QuestionType::Text, false);
        let rating = question(1, QuestionType::Rating, true);
        let closing = question(2, QuestionType::Text, false);
        let wizard = draft_snapshot(
            vec![intro, rating.clone(), closing],
            DraftPayload {
                current_index: 2,
                answers: HashMap::new(),
            },
        );
        assert_eq!(wizard.current_index(), 1);
        assert_eq!(wizard.current_question().map(|q| q.id), Some(rating.id));
        assert!(!wizard.is_complete());
    }

    #[test]
    fn optional_email_is_normalised() {
        assert_eq!(normalize_email(None), Ok(None));
        assert_eq!(normalize_email(Some("  ")), Ok(None));
        assert_eq!(
            normalize_email(Some(" Ana@Example.com ")),
            Ok(Some("ana@example.com".to_string()))
        );
        assert_eq!(normalize_email(Some("nope")), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn validation_errors_render_as_422() {
        let response = PublicError::MissingRequired(vec![Uuid::nil()]).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let response = PublicError::from(StatusCode::CONFLICT).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
