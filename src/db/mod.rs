pub mod seed;

use crate::crypto::Crypto;
use crate::domain::models::{
    AiSuggestion, AnswerValue, Question, QuestionType, Response, Survey, SurveyListItem,
    SurveySession, User,
};
use crate::domain::survey::{QuestionInput, SurveyInput};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub struct QuestionRow {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Json<Vec<String>>,
    pub required: bool,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: row.id,
            survey_id: row.survey_id,
            question_text: row.question_text,
            question_type: row.question_type,
            options: row.options.0,
            required: row.required,
            order_index: row.order_index,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub enc_respondent_email: Option<String>,
    pub enc_ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub draft: Option<serde_json::Value>,
    pub draft_saved_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    pub fn open(self, crypto: &Crypto) -> SurveySession {
        SurveySession {
            id: self.id,
            survey_id: self.survey_id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            respondent_email: crypto.open_optional(self.enc_respondent_email.as_deref()),
            ip_address: crypto.open_optional(self.enc_ip_address.as_deref()),
            user_agent: self.user_agent,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ResponseRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question_id: Uuid,
    pub answer_text: Option<String>,
    pub answer_number: Option<f64>,
    pub answer_boolean: Option<bool>,
    pub created_at: DateTime<Utc>,
}

impl ResponseRow {
    pub fn into_response(self) -> Option<Response> {
        let value = AnswerValue::from_columns(self.answer_text, self.answer_number, self.answer_boolean)?;
        Some(Response {
            id: self.id,
            session_id: self.session_id,
            question_id: self.question_id,
            value,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AiSuggestionRow {
    id: Uuid,
    user_id: Uuid,
    survey_id: Option<Uuid>,
    prompt: String,
    suggested_questions: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

// ============================================
// Users
// ============================================

pub async fn create_user(pool: &PgPool, email: &str, hash: &str, display_name: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, hash, display_name)
        VALUES ($1, $2, $3)
        RETURNING id, email, hash, display_name, created_at
        "#,
    )
    .bind(email)
    .bind(hash)
    .bind(display_name)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, hash, display_name, created_at FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, hash, display_name, created_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

// ============================================
// Surveys
// ============================================

const SURVEY_COLUMNS: &str = "id, owner_id, title, description, is_published, created_at, updated_at";

pub async fn list_surveys_for_owner(pool: &PgPool, owner_id: Uuid) -> Result<Vec<SurveyListItem>> {
    let rows = sqlx::query_as::<_, SurveyListItem>(
        r#"
        SELECT
            s.id,
            s.title,
            s.description,
            s.is_published,
            s.created_at,
            s.updated_at,
            (SELECT COUNT(*) FROM questions q WHERE q.survey_id = s.id) AS question_count,
            (SELECT COUNT(*) FROM survey_sessions ss WHERE ss.survey_id = s.id) AS session_count,
            (SELECT COUNT(*) FROM survey_sessions ss
              WHERE ss.survey_id = s.id AND ss.completed_at IS NOT NULL) AS completed_count
        FROM surveys s
        WHERE s.owner_id = $1
        ORDER BY s.updated_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_survey(pool: &PgPool, id: Uuid) -> Result<Option<Survey>> {
    let survey = sqlx::query_as::<_, Survey>(&format!(
        "SELECT {SURVEY_COLUMNS} FROM surveys WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(survey)
}

pub async fn create_survey(pool: &PgPool, owner_id: Uuid, input: &SurveyInput) -> Result<Survey> {
    let survey = sqlx::query_as::<_, Survey>(&format!(
        r#"
        INSERT INTO surveys (owner_id, title, description)
        VALUES ($1, $2, $3)
        RETURNING {SURVEY_COLUMNS}
        "#
    ))
    .bind(owner_id)
    .bind(&input.title)
    .bind(&input.description)
    .fetch_one(pool)
    .await?;
    Ok(survey)
}

pub async fn update_survey(pool: &PgPool, id: Uuid, input: &SurveyInput) -> Result<Survey> {
    let survey = sqlx::query_as::<_, Survey>(&format!(
        r#"
        UPDATE surveys
        SET title = $2, description = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {SURVEY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(&input.title)
    .bind(&input.description)
    .fetch_one(pool)
    .await?;
    Ok(survey)
}

pub async fn set_survey_published(pool: &PgPool, id: Uuid, published: bool) -> Result<Survey> {
    let survey = sqlx::query_as::<_, Survey>(&format!(
        r#"
        UPDATE surveys
        SET is_published = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {SURVEY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(published)
    .fetch_one(pool)
    .await?;
    Ok(survey)
}

pub async fn delete_survey(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM surveys WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Copies a survey and its questions. The copy starts unpublished and
/// carries no sessions.
pub async fn duplicate_survey(pool: &PgPool, id: Uuid, owner_id: Uuid, title: &str) -> Result<Survey> {
    let mut tx = pool.begin().await?;

    let copy = sqlx::query_as::<_, Survey>(&format!(
        r#"
        INSERT INTO surveys (owner_id, title, description)
        SELECT $2, $3, description FROM surveys WHERE id = $1
        RETURNING {SURVEY_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner_id)
    .bind(title)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO questions (survey_id, question_text, question_type, options, required, order_index)
        SELECT $2, question_text, question_type, options, required, order_index
        FROM questions
        WHERE survey_id = $1
        "#,
    )
    .bind(id)
    .bind(copy.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(copy)
}

async fn touch_survey<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query("UPDATE surveys SET updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

// Serialises writers that read and rewrite a survey's question order.
const LOCK_SURVEY: &str = "SELECT 1 FROM surveys WHERE id = $1 FOR UPDATE";

async fn lock_survey<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(LOCK_SURVEY).bind(id).execute(executor).await?;
    Ok(())
}

// ============================================
// Questions
// ============================================

const QUESTION_COLUMNS: &str =
    "id, survey_id, question_text, question_type, options, required, order_index, created_at";

pub async fn list_questions(pool: &PgPool, survey_id: Uuid) -> Result<Vec<Question>> {
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        r#"
        SELECT {QUESTION_COLUMNS}
        FROM questions
        WHERE survey_id = $1
        ORDER BY order_index, created_at
        "#
    ))
    .bind(survey_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Question::from).collect())
}

/// Appends questions after the current last one, in the given order.
pub async fn append_questions(
    pool: &PgPool,
    survey_id: Uuid,
    inputs: &[QuestionInput],
) -> Result<Vec<Question>> {
    let mut tx = pool.begin().await?;
    lock_survey(&mut *tx, survey_id).await?;

    let next_index: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(order_index) + 1, 0) FROM questions WHERE survey_id = $1",
    )
    .bind(survey_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut created = Vec::with_capacity(inputs.len());
    for (offset, input) in inputs.iter().enumerate() {
        let row = sqlx::query_as::<_, QuestionRow>(&format!(
            r#"
            INSERT INTO questions (survey_id, question_text, question_type, options, required, order_index)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {QUESTION_COLUMNS}
            "#
        ))
        .bind(survey_id)
        .bind(&input.question_text)
        .bind(input.question_type)
        .bind(Json(input.options.clone()))
        .bind(input.required)
        .bind(next_index + offset as i32)
        .fetch_one(&mut *tx)
        .await?;
        created.push(Question::from(row));
    }

    touch_survey(&mut *tx, survey_id).await?;
    tx.commit().await?;
    Ok(created)
}

pub async fn update_question(
    pool: &PgPool,
    survey_id: Uuid,
    id: Uuid,
    input: &QuestionInput,
) -> Result<Option<Question>> {
    let row = sqlx::query_as::<_, QuestionRow>(&format!(
        r#"
        UPDATE questions
        SET question_text = $3, question_type = $4, options = $5, required = $6
        WHERE id = $1 AND survey_id = $2
        RETURNING {QUESTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(survey_id)
    .bind(&input.question_text)
    .bind(input.question_type)
    .bind(Json(input.options.clone()))
    .bind(input.required)
    .fetch_optional(pool)
    .await?;
    if row.is_some() {
        touch_survey(pool, survey_id).await?;
    }
    Ok(row.map(Question::from))
}

/// Deletes a question and closes the gap in `order_index`.
pub async fn delete_question(pool: &PgPool, survey_id: Uuid, id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;
    lock_survey(&mut *tx, survey_id).await?;

    let deleted = sqlx::query("DELETE FROM questions WHERE id = $1 AND survey_id = $2")
        .bind(id)
        .bind(survey_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
        > 0;

    if deleted {
        sqlx::query(
            r#"
            UPDATE questions q
            SET order_index = (r.rn - 1)::int
            FROM (
                SELECT id, ROW_NUMBER() OVER (ORDER BY order_index, created_at) AS rn
                FROM questions
                WHERE survey_id = $1
            ) r
            WHERE q.id = r.id
            "#,
        )
        .bind(survey_id)
        .execute(&mut *tx)
        .await?;
        touch_survey(&mut *tx, survey_id).await?;
    }

    tx.commit().await?;
    Ok(deleted)
}

/// Rewrites `order_index` so that `ordered_ids[i]` gets index `i`.
/// Callers check that the ids are a permutation of the survey's questions.
pub async fn reorder_questions(pool: &PgPool, survey_id: Uuid, ordered_ids: &[Uuid]) -> Result<()> {
    let indexes: Vec<i32> = (0..ordered_ids.len() as i32).collect();
    let mut tx = pool.begin().await?;
    lock_survey(&mut *tx, survey_id).await?;
    sqlx::query(
        r#"
        UPDATE questions q
        SET order_index = v.idx
        FROM UNNEST($1::uuid[], $2::int4[]) AS v(id, idx)
        WHERE q.id = v.id AND q.survey_id = $3
        "#,
    )
    .bind(ordered_ids)
    .bind(&indexes)
    .bind(survey_id)
    .execute(&mut *tx)
    .await?;
    touch_survey(&mut *tx, survey_id).await?;
    tx.commit().await?;
    Ok(())
}

// ============================================
// Sessions
// ============================================

const SESSION_COLUMNS: &str = "id, survey_id, started_at, completed_at, enc_respondent_email, \
    enc_ip_address, user_agent, draft, draft_saved_at";

pub async fn create_session(
    pool: &PgPool,
    survey_id: Uuid,
    enc_email: Option<&str>,
    enc_ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<SessionRow> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        r#"
        INSERT INTO survey_sessions (survey_id, enc_respondent_email, enc_ip_address, user_agent)
        VALUES ($1, $2, $3, $4)
        RETURNING {SESSION_COLUMNS}
        "#
    ))
    .bind(survey_id)
    .bind(enc_email)
    .bind(enc_ip)
    .bind(user_agent)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn find_session(pool: &PgPool, id: Uuid) -> Result<Option<SessionRow>> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM survey_sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_sessions(pool: &PgPool, survey_id: Uuid) -> Result<Vec<SessionRow>> {
    let rows = sqlx::query_as::<_, SessionRow>(&format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM survey_sessions
        WHERE survey_id = $1
        ORDER BY started_at
        "#
    ))
    .bind(survey_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn save_draft(pool: &PgPool, id: Uuid, draft: &serde_json::Value) -> Result<Option<DateTime<Utc>>> {
    let saved_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        UPDATE survey_sessions
        SET draft = $2, draft_saved_at = NOW()
        WHERE id = $1 AND completed_at IS NULL
        RETURNING draft_saved_at
        "#,
    )
    .bind(id)
    .bind(draft)
    .fetch_optional(pool)
    .await?;
    Ok(saved_at)
}

/// Marks a session completed and clears its draft. Returns `None` when the
/// session was already completed.
pub async fn complete_session(
    pool: &PgPool,
    id: Uuid,
    enc_email: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    let completed_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        UPDATE survey_sessions
        SET completed_at = NOW(),
            draft = NULL,
            draft_saved_at = NULL,
            enc_respondent_email = COALESCE($2, enc_respondent_email)
        WHERE id = $1 AND completed_at IS NULL
        RETURNING completed_at
        "#,
    )
    .bind(id)
    .bind(enc_email)
    .fetch_optional(pool)
    .await?;
    Ok(completed_at)
}

// ============================================
// Responses
// ============================================

const RESPONSE_COLUMNS: &str =
    "r.id, r.session_id, r.question_id, r.answer_text, r.answer_number, r.answer_boolean, r.created_at";

/// Upserts a batch of answers for one session; a re-submitted answer
/// replaces the previous one. Answers listed in `cleared` are removed.
pub async fn save_responses(
    pool: &PgPool,
    session_id: Uuid,
    answers: &[(Uuid, AnswerValue)],
    cleared: &[Uuid],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    if !cleared.is_empty() {
        sqlx::query("DELETE FROM responses WHERE session_id = $1 AND question_id = ANY($2)")
            .bind(session_id)
            .bind(cleared)
            .execute(&mut *tx)
            .await?;
    }
    for (question_id, value) in answers {
        let (text, number, boolean) = value.to_columns();
        sqlx::query(
            r#"
            INSERT INTO responses (session_id, question_id, answer_text, answer_number, answer_boolean)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, question_id) DO UPDATE
            SET answer_text = EXCLUDED.answer_text,
                answer_number = EXCLUDED.answer_number,
                answer_boolean = EXCLUDED.answer_boolean,
                created_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(question_id)
        .bind(text)
        .bind(number)
        .bind(boolean)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn list_responses_for_session(pool: &PgPool, session_id: Uuid) -> Result<Vec<Response>> {
    let rows = sqlx::query_as::<_, ResponseRow>(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM responses r WHERE r.session_id = $1"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(ResponseRow::into_response).collect())
}

pub async fn list_responses_for_survey(pool: &PgPool, survey_id: Uuid) -> Result<Vec<Response>> {
    let rows = sqlx::query_as::<_, ResponseRow>(&format!(
        r#"
        SELECT {RESPONSE_COLUMNS}
        FROM responses r
        JOIN survey_sessions s ON s.id = r.session_id
        WHERE s.survey_id = $1
        ORDER BY r.created_at
        "#
    ))
    .bind(survey_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().filter_map(ResponseRow::into_response).collect())
}

// ============================================
// AI suggestions
// ============================================

pub async fn insert_ai_suggestion(
    pool: &PgPool,
    user_id: Uuid,
    survey_id: Option<Uuid>,
    prompt: &str,
    suggested_questions: &serde_json::Value,
) -> Result<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO ai_suggestions (user_id, survey_id, prompt, suggested_questions)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(survey_id)
    .bind(prompt)
    .bind(suggested_questions)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn list_ai_suggestions(pool: &PgPool, user_id: Uuid, limit: i64) -> Result<Vec<AiSuggestion>> {
    let rows = sqlx::query_as::<_, AiSuggestionRow>(
        r#"
        SELECT id, user_id, survey_id, prompt, suggested_questions, created_at
        FROM ai_suggestions
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| AiSuggestion {
            id: row.id,
            user_id: row.user_id,
            survey_id: row.survey_id,
            prompt: row.prompt,
            suggested_questions: row.suggested_questions.0,
            created_at: row.created_at,
        })
        .collect())
}
