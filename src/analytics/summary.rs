//! Per-survey aggregates shown on the results page and fed to AI insights.

use crate::domain::answer::{RATING_MAX, RATING_MIN};
use crate::domain::models::{AnswerValue, Question, QuestionType, Response, SurveySession};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const RECENT_TEXT_ANSWERS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyAnalytics {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub completion_rate: f64,
    pub avg_completion_seconds: Option<f64>,
    pub sessions_by_day: Vec<DayCount>,
    pub questions: Vec<QuestionStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayCount {
    pub date: NaiveDate,
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionStats {
    pub question_id: Uuid,
    pub question_text: String,
    pub question_type: QuestionType,
    pub response_count: usize,
    #[serde(flatten)]
    pub breakdown: Breakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Breakdown {
    Choice {
        options: Vec<ValueCount>,
    },
    Numeric {
        average: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        distribution: Vec<ValueCount>,
    },
    YesNo {
        yes: usize,
        no: usize,
    },
    Text {
        recent: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

pub fn build_summary(
    questions: &[Question],
    sessions: &[SurveySession],
    responses: &[Response],
) -> SurveyAnalytics {
    let total_sessions = sessions.len();
    let completion_times: Vec<i64> = sessions
        .iter()
        .filter_map(SurveySession::completion_seconds)
        .collect();
    let completed_sessions = completion_times.len();

    let completion_rate = if total_sessions == 0 {
        0.0
    } else {
        round2(completed_sessions as f64 / total_sessions as f64 * 100.0)
    };
    let avg_completion_seconds = if completion_times.is_empty() {
        None
    } else {
        Some(round2(
            completion_times.iter().sum::<i64>() as f64 / completion_times.len() as f64,
        ))
    };

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for session in sessions {
        *per_day.entry(session.started_at.date_naive()).or_insert(0) += 1;
    }
    let sessions_by_day = per_day
        .into_iter()
        .map(|(date, sessions)| DayCount { date, sessions })
        .collect();

    let mut by_question: HashMap<Uuid, Vec<&Response>> = HashMap::new();
    for response in responses {
        by_question.entry(response.question_id).or_default().push(response);
    }

    let mut ordered: Vec<&Question> = questions.iter().collect();
    ordered.sort_by_key(|q| q.order_index);

    let stats = ordered
        .into_iter()
        .map(|question| {
            let answers = by_question.remove(&question.id).unwrap_or_default();
            question_stats(question, answers)
        })
        .collect();

    SurveyAnalytics {
        total_sessions,
        completed_sessions,
        completion_rate,
        avg_completion_seconds,
        sessions_by_day,
        questions: stats,
    }
}

fn question_stats(question: &Question, mut answers: Vec<&Response>) -> QuestionStats {
    let breakdown = match question.question_type {
        QuestionType::MultipleChoice => {
            let mut options: Vec<ValueCount> = question
                .options
                .iter()
                .map(|o| ValueCount {
                    value: o.clone(),
                    count: 0,
                })
                .collect();
            for answer in &answers {
                let value = answer.value.display();
                match options.iter().position(|o| o.value == value) {
                    Some(i) => options[i].count += 1,
                    // option was renamed or removed after answers came in
                    None => options.push(ValueCount { value, count: 1 }),
                }
            }
            Breakdown::Choice { options }
        }
        QuestionType::Rating | QuestionType::Number => {
            let values: Vec<f64> = answers
                .iter()
                .filter_map(|a| match a.value {
                    AnswerValue::Number(n) => Some(n),
                    _ => None,
                })
                .collect();
            numeric_breakdown(&values, question.question_type == QuestionType::Rating)
        }
        QuestionType::YesNo => {
            let yes = answers
                .iter()
                .filter(|a| a.value == AnswerValue::Boolean(true))
                .count();
            let no = answers
                .iter()
                .filter(|a| a.value == AnswerValue::Boolean(false))
                .count();
            Breakdown::YesNo { yes, no }
        }
        QuestionType::Text | QuestionType::Email => {
            answers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Breakdown::Text {
                recent: answers
                    .iter()
                    .take(RECENT_TEXT_ANSWERS)
                    .map(|a| a.value.display())
                    .collect(),
            }
        }
    };

    QuestionStats {
        question_id: question.id,
        question_text: question.question_text.clone(),
        question_type: question.question_type,
        response_count: answers.len(),
        breakdown,
    }
}

fn numeric_breakdown(values: &[f64], rating_scale: bool) -> Breakdown {
    let mut counts: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    if rating_scale {
        for r in RATING_MIN..=RATING_MAX {
            counts.insert(r * 1000, (r as f64, 0));
        }
    }
    for v in values {
        // keyed on thousandths so 2.5 and 2.5000001 share a bucket
        let key = (v * 1000.0).round() as i64;
        counts.entry(key).or_insert((*v, 0)).1 += 1;
    }

    let distribution = counts
        .into_values()
        .map(|(value, count)| ValueCount {
            value: AnswerValue::Number(value).display(),
            count,
        })
        .collect();

    let (average, min, max) = if values.is_empty() {
        (None, None, None)
    } else {
        let sum: f64 = values.iter().sum();
        (
            Some(round2(sum / values.len() as f64)),
            values.iter().copied().reduce(f64::min),
            values.iter().copied().reduce(f64::max),
        )
    };

    Breakdown::Numeric {
        average,
        min,
        max,
        distribution,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn question(order_index: i32, question_type: QuestionType, options: &[&str]) -> Question {
        Question {
            id: Uuid::new_v4(),
            survey_id: Uuid::nil(),
            question_text: format!("Q{order_index}"),
            question_type,
            options: options.iter().map(|s| s.to_string()).collect(),
            required: false,
            order_index,
            created_at: Utc::now(),
        }
    }

    fn session(day: u32, minutes: Option<i64>) -> SurveySession {
        let started_at = Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap();
        SurveySession {
            id: Uuid::new_v4(),
            survey_id: Uuid::nil(),
            started_at,
            completed_at: minutes.map(|m| started_at + Duration::minutes(m)),
            respondent_email: None,
            ip_address: None,
            user_agent: None,
        }
    }

    fn response(session: &SurveySession, question: &Question, value: AnswerValue, offset: i64) -> Response {
        Response {
            id: Uuid::new_v4(),
            session_id: session.id,
            question_id: question.id,
            value,
            created_at: session.started_at + Duration::seconds(offset),
        }
    }

    #[test]
    fn empty_survey() {
        let summary = build_summary(&[], &[], &[]);
        assert_eq!(summary.total_sessions, 0);
        assert_eq!(summary.completion_rate, 0.0);
        assert_eq!(summary.avg_completion_seconds, None);
        assert!(summary.questions.is_empty());
    }

    #[test]
    fn session_level_aggregates() {
        let sessions = vec![session(1, Some(2)), session(1, None), session(3, Some(4))];
        let summary = build_summary(&[], &sessions, &[]);
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.completed_sessions, 2);
        assert_eq!(summary.completion_rate, 66.67);
        assert_eq!(summary.avg_completion_seconds, Some(180.0));
        assert_eq!(summary.sessions_by_day.len(), 2);
        assert_eq!(summary.sessions_by_day[0].sessions, 2);
    }

    #[test]
    fn per_question_breakdowns() {
        let choice = question(0, QuestionType::MultipleChoice, &["Red", "Green", "Blue"]);
        let rating = question(1, QuestionType::Rating, &[]);
        let yes_no = question(2, QuestionType::YesNo, &[]);
        let text = question(3, QuestionType::Text, &[]);
        let s1 = session(2, Some(1));
        let s2 = session(2, Some(1));

        let responses = vec![
            response(&s1, &choice, AnswerValue::Text("Red".into()), 1),
            response(&s2, &choice, AnswerValue::Text("Red".into()), 1),
            response(&s1, &rating, AnswerValue::Number(4.0), 2),
            response(&s2, &rating, AnswerValue::Number(5.0), 2),
            response(&s1, &yes_no, AnswerValue::Boolean(true), 3),
            response(&s1, &text, AnswerValue::Text("first".into()), 4),
            response(&s2, &text, AnswerValue::Text("second".into()), 9),
        ];

        // order_index drives output order regardless of input order
        let questions = vec![text.clone(), rating.clone(), choice.clone(), yes_no.clone()];
        let summary = build_summary(&questions, &[s1, s2], &responses);
        let ids: Vec<Uuid> = summary.questions.iter().map(|q| q.question_id).collect();
        assert_eq!(ids, vec![choice.id, rating.id, yes_no.id, text.id]);

        match &summary.questions[0].breakdown {
            Breakdown::Choice { options } => {
                let counts: Vec<usize> = options.iter().map(|o| o.count).collect();
                assert_eq!(counts, vec![2, 0, 0]);
            }
            other => panic!("unexpected breakdown {other:?}"),
        }

        match &summary.questions[1].breakdown {
            Breakdown::Numeric { average, min, max, distribution } => {
                assert_eq!(*average, Some(4.5));
                assert_eq!(*min, Some(4.0));
                assert_eq!(*max, Some(5.0));
                assert_eq!(distribution.len(), 5);
                assert_eq!(distribution[3], ValueCount { value: "4".into(), count: 1 });
            }
            other => panic!("unexpected breakdown {other:?}"),
        }

        assert_eq!(summary.questions[2].breakdown, Breakdown::YesNo { yes: 1, no: 0 });

        match &summary.questions[3].breakdown {
            Breakdown::Text { recent } => assert_eq!(recent, &vec!["second".to_string(), "first".to_string()]),
            other => panic!("unexpected breakdown {other:?}"),
        }
        assert_eq!(summary.questions[3].response_count, 2);
    }

    #[test]
    fn serialises_with_kind_tag() {
        let q = question(0, QuestionType::YesNo, &[]);
        let summary = build_summary(&[q], &[], &[]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["questions"][0]["kind"], "yes_no");
        assert_eq!(json["questions"][0]["yes"], 0);
    }
}
