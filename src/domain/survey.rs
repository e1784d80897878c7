use crate::domain::models::QuestionType;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

pub const MAX_TITLE: usize = 200;
pub const MAX_DESCRIPTION: usize = 2000;
pub const MAX_QUESTION_TEXT: usize = 1000;
pub const MAX_OPTIONS: usize = 50;

#[derive(Error, Debug, PartialEq)]
pub enum InputError {
    #[error("title is required")]
    EmptyTitle,
    #[error("title is too long")]
    TitleTooLong,
    #[error("description is too long")]
    DescriptionTooLong,
    #[error("question text is required")]
    EmptyQuestion,
    #[error("question text is too long")]
    QuestionTooLong,
    #[error("multiple choice questions need at least two options")]
    MissingOptions,
    #[error("too many options")]
    TooManyOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurveyInput {
    pub title: String,
    pub description: Option<String>,
}

impl SurveyInput {
    pub fn normalized(self) -> Result<Self, InputError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(InputError::EmptyTitle);
        }
        if title.chars().count() > MAX_TITLE {
            return Err(InputError::TitleTooLong);
        }
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION)
        {
            return Err(InputError::DescriptionTooLong);
        }
        Ok(Self { title, description })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QuestionInput {
    pub question_text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

impl QuestionInput {
    /// Trims text, drops blank and duplicate options, and clears options
    /// for types that do not use them.
    pub fn normalized(self) -> Result<Self, InputError> {
        let question_text = self.question_text.trim().to_string();
        if question_text.is_empty() {
            return Err(InputError::EmptyQuestion);
        }
        if question_text.chars().count() > MAX_QUESTION_TEXT {
            return Err(InputError::QuestionTooLong);
        }

        let options = if self.question_type.has_options() {
            // Options compare case-insensitively; the first spelling wins.
            let mut seen: Vec<String> = Vec::new();
            let mut keys: HashSet<String> = HashSet::new();
            for opt in self.options {
                let opt = opt.trim().to_string();
                if !opt.is_empty() && keys.insert(opt.to_lowercase()) {
                    seen.push(opt);
                }
            }
            if seen.len() < 2 {
                return Err(InputError::MissingOptions);
            }
            if seen.len() > MAX_OPTIONS {
                return Err(InputError::TooManyOptions);
            }
            seen
        } else {
            Vec::new()
        };

        Ok(Self {
            question_text,
            question_type: self.question_type,
            options,
            required: self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survey_input_trims() {
        let input = SurveyInput {
            title: "  Team pulse ".into(),
            description: Some("   ".into()),
        }
        .normalized()
        .unwrap();
        assert_eq!(input.title, "Team pulse");
        assert_eq!(input.description, None);

        let empty = SurveyInput {
            title: " ".into(),
            description: None,
        };
        assert_eq!(empty.normalized().unwrap_err(), InputError::EmptyTitle);
    }

    #[test]
    fn choice_options_are_cleaned() {
        let input = QuestionInput {
            question_text: "Favourite colour?".into(),
            question_type: QuestionType::MultipleChoice,
            options: vec![" Red".into(), "".into(), "Red".into(), "Blue ".into()],
            required: true,
        }
        .normalized()
        .unwrap();
        assert_eq!(input.options, vec!["Red".to_string(), "Blue".to_string()]);
    }

    #[test]
    fn choice_needs_two_options() {
        let input = QuestionInput {
            question_text: "Pick".into(),
            question_type: QuestionType::MultipleChoice,
            options: vec!["Only".into(), " only ".into()],
            required: false,
        };
        assert_eq!(input.normalized().unwrap_err(), InputError::MissingOptions);
    }

    #[test]
    fn option_case_variants_keep_first_spelling() {
        let input = QuestionInput {
            question_text: "Team?".into(),
            question_type: QuestionType::MultipleChoice,
            options: vec!["Platform".into(), "PLATFORM ".into(), "Mobile".into(), "mobile".into()],
            required: true,
        }
        .normalized()
        .unwrap();
        assert_eq!(input.options, vec!["Platform".to_string(), "Mobile".to_string()]);
    }

    #[test]
    fn non_choice_options_dropped() {
        let input = QuestionInput {
            question_text: "Rate us".into(),
            question_type: QuestionType::Rating,
            options: vec!["1".into(), "2".into()],
            required: false,
        }
        .normalized()
        .unwrap();
        assert!(input.options.is_empty());
    }
}
