//! Step-by-step survey response flow.
//!
//! The browser drives one question at a time and autosaves a
//! [`WizardSnapshot`] every few seconds; the server restores snapshots for
//! resume and uses [`ResponseWizard::missing_required`] to gate completion.

use crate::domain::models::{AnswerValue, Question};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WizardSnapshot {
    pub current_index: usize,
    pub answers: HashMap<Uuid, AnswerValue>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ResponseWizard {
    questions: Vec<Question>,
    current: usize,
    answers: HashMap<Uuid, AnswerValue>,
}

impl ResponseWizard {
    pub fn new(mut questions: Vec<Question>) -> Self {
        questions.sort_by_key(|q| q.order_index);
        Self {
            questions,
            current: 0,
            answers: HashMap::new(),
        }
    }

    /// Rebuilds a wizard from an autosaved snapshot. Answers for questions
    /// that no longer exist are dropped and the index is clamped.
    pub fn restore(questions: Vec<Question>, snapshot: WizardSnapshot) -> Self {
        let mut wizard = Self::new(questions);
        wizard.answers = snapshot
            .answers
            .into_iter()
            .filter(|(id, _)| wizard.questions.iter().any(|q| q.id == *id))
            .collect();
        wizard.go_to(snapshot.current_index);
        wizard
    }

    pub fn with_answers(questions: Vec<Question>, answers: HashMap<Uuid, AnswerValue>) -> Self {
        Self::restore(
            questions,
            WizardSnapshot {
                current_index: 0,
                answers,
                saved_at: Utc::now(),
            },
        )
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current)
    }

    #[cfg(test)]
    pub fn answer(&self, question_id: Uuid) -> Option<&AnswerValue> {
        self.answers.get(&question_id)
    }

    #[cfg(test)]
    pub fn answers(&self) -> &HashMap<Uuid, AnswerValue> {
        &self.answers
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.questions.len()
    }

    /// Percentage of the flow reached, counting the current step.
    pub fn progress(&self) -> f64 {
        if self.questions.is_empty() {
            return 0.0;
        }
        (self.current + 1) as f64 / self.questions.len() as f64 * 100.0
    }

    pub fn answered_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| self.has_answer(q.id))
            .count()
    }

    pub fn can_proceed(&self) -> bool {
        match self.current_question() {
            Some(q) => !q.required || self.has_answer(q.id),
            None => false,
        }
    }

    /// Moves forward one step. Returns false when blocked on a required
    /// question or already at the end.
    pub fn next(&mut self) -> bool {
        if !self.can_proceed() || self.is_last() {
            return false;
        }
        self.current += 1;
        true
    }

    // Backward moves happen in the browser; the server only walks forward.
    #[cfg(test)]
    pub fn previous(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    pub fn go_to(&mut self, index: usize) {
        self.current = index.min(self.questions.len().saturating_sub(1));
    }

    /// Stores an answer. Answers for unknown questions are ignored.
    pub fn set_answer(&mut self, question_id: Uuid, value: AnswerValue) -> bool {
        if !self.questions.iter().any(|q| q.id == question_id) {
            return false;
        }
        self.answers.insert(question_id, value);
        true
    }

    #[cfg(test)]
    pub fn clear_answer(&mut self, question_id: Uuid) {
        self.answers.remove(&question_id);
    }

    pub fn missing_required(&self) -> Vec<Uuid> {
        self.questions
            .iter()
            .filter(|q| q.required && !self.has_answer(q.id))
            .map(|q| q.id)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            current_index: self.current,
            answers: self.answers.clone(),
            saved_at: Utc::now(),
        }
    }

    fn has_answer(&self, question_id: Uuid) -> bool {
        self.answers
            .get(&question_id)
            .map(|v| !v.is_blank())
            .unwrap_or(false)
    }
}
