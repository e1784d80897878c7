use crate::services::export::{ExportDataset, ExportFormat};
use crate::state::SharedState;
use crate::web::analytics::load_results;
use crate::web::session::UserSession;
use crate::web::surveys::require_owned_survey;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/:id/export", get(export_responses))
        .with_state(state)
}

async fn export_responses(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Path(survey_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let format = ExportFormat::try_from(query.format.as_deref().unwrap_or("csv"))
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let survey = require_owned_survey(&state, survey_id, user_id).await?;
    let results = load_results(&state, survey_id).await?;
    let dataset = ExportDataset {
        survey,
        questions: results.questions,
        sessions: results.sessions,
        responses: results.responses,
    };

    let body = dataset.render(format).map_err(|e| {
        tracing::error!("Failed to render {:?} export for survey {}: {}", format, survey_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let disposition = format!("attachment; filename=\"{}\"", dataset.filename(format));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );

    tracing::info!(
        "Exported {} sessions of survey {} as {}",
        dataset.sessions.len(),
        survey_id,
        format.extension()
    );
    Ok((headers, body))
}
