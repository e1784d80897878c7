use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    MultipleChoice,
    Rating,
    YesNo,
    Email,
    Number,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Text => "text",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Rating => "rating",
            QuestionType::YesNo => "yes_no",
            QuestionType::Email => "email",
            QuestionType::Number => "number",
        }
    }

    pub fn has_options(&self) -> bool {
        matches!(self, QuestionType::MultipleChoice)
    }
}

impl TryFrom<&str> for QuestionType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "text" | "short_text" | "long_text" | "textarea" => Ok(QuestionType::Text),
            "multiple_choice" | "choice" | "select" | "radio" => Ok(QuestionType::MultipleChoice),
            "rating" | "scale" => Ok(QuestionType::Rating),
            "yes_no" | "boolean" | "yesno" => Ok(QuestionType::YesNo),
            "email" => Ok(QuestionType::Email),
            "number" | "numeric" => Ok(QuestionType::Number),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub hash: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Survey {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Survey row with aggregate counts for the owner's list view.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SurveyListItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub question_count: i64,
    pub session_count: i64,
    pub completed_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub required: bool,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveySession {
    pub id: Uuid,
    pub survey_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub respondent_email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl SurveySession {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn completion_seconds(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_seconds().max(0))
    }
}

/// A single stored answer. Exactly one of the value columns is set,
/// matching the question type it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl AnswerValue {
    pub fn to_columns(&self) -> (Option<String>, Option<f64>, Option<bool>) {
        match self {
            AnswerValue::Text(text) => (Some(text.clone()), None, None),
            AnswerValue::Number(n) => (None, Some(*n), None),
            AnswerValue::Boolean(b) => (None, None, Some(*b)),
        }
    }

    pub fn from_columns(
        text: Option<String>,
        number: Option<f64>,
        boolean: Option<bool>,
    ) -> Option<Self> {
        if let Some(b) = boolean {
            return Some(AnswerValue::Boolean(b));
        }
        if let Some(n) = number {
            return Some(AnswerValue::Number(n));
        }
        text.map(AnswerValue::Text)
    }

    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(text) => text.trim().is_empty(),
            AnswerValue::Number(n) => !n.is_finite(),
            AnswerValue::Boolean(_) => false,
        }
    }

    /// Human readable rendering used by exports.
    pub fn display(&self) -> String {
        match self {
            AnswerValue::Text(text) => text.clone(),
            AnswerValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            AnswerValue::Number(n) => n.to_string(),
            AnswerValue::Boolean(true) => "yes".to_string(),
            AnswerValue::Boolean(false) => "no".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question_id: Uuid,
    pub value: AnswerValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSuggestion {
    pub id: Uuid,
    pub user_id: Uuid,
    pub survey_id: Option<Uuid>,
    pub prompt: String,
    pub suggested_questions: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
