use crate::domain::models::{AnswerValue, Question, QuestionType};
use serde_json::Value;
use thiserror::Error;

pub const MAX_TEXT_ANSWER: usize = 5000;
pub const RATING_MIN: i64 = 1;
pub const RATING_MAX: i64 = 5;

#[derive(Error, Debug, PartialEq)]
pub enum AnswerError {
    #[error("answer is empty")]
    Empty,
    #[error("answer is too long")]
    TooLong,
    #[error("expected text")]
    NotText,
    #[error("expected a number")]
    NotANumber,
    #[error("rating must be a whole number between 1 and 5")]
    RatingOutOfRange,
    #[error("expected yes or no")]
    NotABoolean,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("answer is not one of the options")]
    UnknownOption,
}

/// Normalises a raw JSON answer for the given question.
pub fn validate_answer(question: &Question, raw: &Value) -> Result<AnswerValue, AnswerError> {
    match question.question_type {
        QuestionType::Text => {
            let text = as_trimmed_str(raw)?;
            if text.chars().count() > MAX_TEXT_ANSWER {
                return Err(AnswerError::TooLong);
            }
            Ok(AnswerValue::Text(text))
        }
        QuestionType::Email => {
            let email = as_trimmed_str(raw)?.to_lowercase();
            if !is_valid_email(&email) {
                return Err(AnswerError::InvalidEmail);
            }
            Ok(AnswerValue::Text(email))
        }
        QuestionType::Number => as_number(raw).map(AnswerValue::Number),
        QuestionType::Rating => {
            let n = as_number(raw)?;
            if n.fract() != 0.0 || (n as i64) < RATING_MIN || (n as i64) > RATING_MAX {
                return Err(AnswerError::RatingOutOfRange);
            }
            Ok(AnswerValue::Number(n))
        }
        QuestionType::YesNo => as_bool(raw).map(AnswerValue::Boolean),
        QuestionType::MultipleChoice => {
            let choice = as_trimmed_str(raw)?;
            question
                .options
                .iter()
                .find(|opt| opt.trim() == choice)
                .map(|opt| AnswerValue::Text(opt.clone()))
                .ok_or(AnswerError::UnknownOption)
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
            .unwrap_or(false)
}

fn as_trimmed_str(raw: &Value) -> Result<String, AnswerError> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => return Err(AnswerError::NotText),
    };
    if text.is_empty() {
        return Err(AnswerError::Empty);
    }
    Ok(text)
}

fn as_number(raw: &Value) -> Result<f64, AnswerError> {
    let n = match raw {
        Value::Number(n) => n.as_f64().ok_or(AnswerError::NotANumber)?,
        Value::String(s) if s.trim().is_empty() => return Err(AnswerError::Empty),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| AnswerError::NotANumber)?,
        Value::Null => return Err(AnswerError::Empty),
        _ => return Err(AnswerError::NotANumber),
    };
    if !n.is_finite() {
        return Err(AnswerError::NotANumber);
    }
    Ok(n)
}

fn as_bool(raw: &Value) -> Result<bool, AnswerError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "true" | "y" => Ok(true),
            "no" | "false" | "n" => Ok(false),
            "" => Err(AnswerError::Empty),
            _ => Err(AnswerError::NotABoolean),
        },
        Value::Null => Err(AnswerError::Empty),
        _ => Err(AnswerError::NotABoolean),
    }
}
