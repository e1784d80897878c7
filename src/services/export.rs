//! CSV / JSON / HTML renderings of a survey's collected responses.

use crate::domain::models::{AnswerValue, Question, Response, Survey, SurveySession};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Html,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Html => "text/html; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Html => "html",
        }
    }
}

impl TryFrom<&str> for ExportFormat {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "html" | "htm" => Ok(ExportFormat::Html),
            _ => Err(()),
        }
    }
}

pub struct ExportDataset {
    pub survey: Survey,
    pub questions: Vec<Question>,
    pub sessions: Vec<SurveySession>,
    pub responses: Vec<Response>,
}

#[derive(Serialize)]
struct JsonExport<'a> {
    survey: &'a Survey,
    questions: &'a [Question],
    sessions: Vec<JsonSession<'a>>,
    exported_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct JsonSession<'a> {
    id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    respondent_email: Option<&'a str>,
    answers: Vec<JsonAnswer<'a>>,
}

#[derive(Serialize)]
struct JsonAnswer<'a> {
    question_id: Uuid,
    question: &'a str,
    value: &'a AnswerValue,
}

impl ExportDataset {
    pub fn render(&self, format: ExportFormat) -> Result<String, serde_json::Error> {
        match format {
            ExportFormat::Csv => Ok(self.to_csv()),
            ExportFormat::Json => self.to_json(),
            ExportFormat::Html => Ok(self.to_html()),
        }
    }

    pub fn filename(&self, format: ExportFormat) -> String {
        format!("{}-responses.{}", slugify(&self.survey.title), format.extension())
    }

    fn ordered_questions(&self) -> Vec<&Question> {
        let mut ordered: Vec<&Question> = self.questions.iter().collect();
        ordered.sort_by_key(|q| q.order_index);
        ordered
    }

    fn answers_by_session(&self) -> HashMap<Uuid, HashMap<Uuid, &AnswerValue>> {
        let mut map: HashMap<Uuid, HashMap<Uuid, &AnswerValue>> = HashMap::new();
        for r in &self.responses {
            map.entry(r.session_id)
                .or_default()
                .insert(r.question_id, &r.value);
        }
        map
    }

    /// Fixed header columns followed by one column per question, one row
    /// per session.
    fn rows(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let questions = self.ordered_questions();
        let answers = self.answers_by_session();

        let mut header = vec![
            "session_id".to_string(),
            "started_at".to_string(),
            "completed_at".to_string(),
            "respondent_email".to_string(),
        ];
        header.extend(questions.iter().map(|q| q.question_text.clone()));

        let rows = self
            .sessions
            .iter()
            .map(|session| {
                let session_answers = answers.get(&session.id);
                let mut row = vec![
                    session.id.to_string(),
                    session.started_at.to_rfc3339(),
                    session
                        .completed_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    session.respondent_email.clone().unwrap_or_default(),
                ];
                row.extend(questions.iter().map(|q| {
                    session_answers
                        .and_then(|a| a.get(&q.id))
                        .map(|v| v.display())
                        .unwrap_or_default()
                }));
                row
            })
            .collect();

        (header, rows)
    }

    pub fn to_csv(&self) -> String {
        let (header, rows) = self.rows();
        let mut out = String::new();
        push_csv_line(&mut out, &header);
        for row in &rows {
            push_csv_line(&mut out, row);
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let questions = self.ordered_questions();
        let answers = self.answers_by_session();

        let sessions = self
            .sessions
            .iter()
            .map(|session| JsonSession {
                id: session.id,
                started_at: session.started_at,
                completed_at: session.completed_at,
                respondent_email: session.respondent_email.as_deref(),
                answers: questions
                    .iter()
                    .filter_map(|q| {
                        answers
                            .get(&session.id)
                            .and_then(|a| a.get(&q.id))
                            .map(|value| JsonAnswer {
                                question_id: q.id,
                                question: &q.question_text,
                                value,
                            })
                    })
                    .collect(),
            })
            .collect();

        let mut ordered_questions = self.questions.clone();
        ordered_questions.sort_by_key(|q| q.order_index);

        serde_json::to_string_pretty(&JsonExport {
            survey: &self.survey,
            questions: &ordered_questions,
            sessions,
            exported_at: Utc::now(),
        })
    }

    pub fn to_html(&self) -> String {
        let (header, rows) = self.rows();
        let title = escape_html(&self.survey.title);

        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        out.push_str(&format!("<title>{title} - responses</title>\n"));
        out.push_str(
            "<style>body{font-family:sans-serif;margin:2rem}table{border-collapse:collapse}\
             th,td{border:1px solid #ccc;padding:.4rem .6rem;text-align:left;vertical-align:top}\
             th{background:#f4f4f4}</style>\n</head>\n<body>\n",
        );
        out.push_str(&format!("<h1>{title}</h1>\n"));
        if let Some(description) = &self.survey.description {
            out.push_str(&format!("<p>{}</p>\n", escape_html(description)));
        }
        let completed = self.sessions.iter().filter(|s| s.is_completed()).count();
        out.push_str(&format!("<p>{} responses, {} completed</p>\n", rows.len(), completed));
        out.push_str("<table>\n<thead><tr>");
        for cell in &header {
            out.push_str(&format!("<th>{}</th>", escape_html(cell)));
        }
        out.push_str("</tr></thead>\n<tbody>\n");
        for row in &rows {
            out.push_str("<tr>");
            for cell in row {
                out.push_str(&format!("<td>{}</td>", escape_html(cell)));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>\n</body>\n</html>\n");
        out
    }
}

fn push_csv_line(out: &mut String, fields: &[String]) {
    let line = fields
        .iter()
        .map(|f| escape_csv(f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

pub fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "survey".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QuestionType;
    use chrono::TimeZone;

    fn dataset() -> ExportDataset {
        let survey = Survey {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Q3 <Team> Check-in".into(),
            description: Some("Tom & Jerry's survey".into()),
            is_published: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let q1 = Question {
            id: Uuid::new_v4(),
            survey_id: survey.id,
            question_text: "Comments, please".into(),
            question_type: QuestionType::Text,
            options: vec![],
            required: false,
            order_index: 1,
            created_at: started,
        };
        let q0 = Question {
            id: Uuid::new_v4(),
            survey_id: survey.id,
            question_text: "Recommend?".into(),
            question_type: QuestionType::YesNo,
            options: vec![],
            required: true,
            order_index: 0,
            created_at: started,
        };
        let answered = SurveySession {
            id: Uuid::new_v4(),
            survey_id: survey.id,
            started_at: started,
            completed_at: Some(started + chrono::Duration::minutes(3)),
            respondent_email: Some("ana@example.com".into()),
            ip_address: None,
            user_agent: None,
        };
        let abandoned = SurveySession {
            id: Uuid::new_v4(),
            survey_id: survey.id,
            started_at: started,
            completed_at: None,
            respondent_email: None,
            ip_address: None,
            user_agent: None,
        };
        let responses = vec![
            Response {
                id: Uuid::new_v4(),
                session_id: answered.id,
                question_id: q1.id,
                value: AnswerValue::Text("Great, \"really\"\nthanks".into()),
                created_at: started,
            },
            Response {
                id: Uuid::new_v4(),
                session_id: answered.id,
                question_id: q0.id,
                value: AnswerValue::Boolean(true),
                created_at: started,
            },
        ];
        ExportDataset {
            survey,
            questions: vec![q1, q0],
            sessions: vec![answered, abandoned],
            responses,
        }
    }

    #[test]
    fn csv_quotes_and_orders_columns() {
        let csv = dataset().to_csv();
        let mut lines = csv.split("\r\n");
        assert_eq!(
            lines.next().unwrap(),
            "session_id,started_at,completed_at,respondent_email,Recommend?,\"Comments, please\""
        );
        let first = lines.next().unwrap();
        assert!(first.ends_with(",ana@example.com,yes,\"Great, \"\"really\"\"\nthanks\""));
        let second = lines.next().unwrap();
        assert!(second.ends_with(",,,,"), "abandoned row: {second}");
    }

    #[test]
    fn html_is_escaped() {
        let html = dataset().to_html();
        assert!(html.contains("<h1>Q3 &lt;Team&gt; Check-in</h1>"));
        assert!(html.contains("Tom &amp; Jerry&#39;s survey"));
        assert!(html.contains("<p>2 responses, 1 completed</p>"));
        assert!(!html.contains("<Team>"));
    }

    #[test]
    fn json_groups_answers_by_session() {
        let data = dataset();
        let json: serde_json::Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(json["questions"][0]["question_text"], "Recommend?");
        assert_eq!(json["sessions"].as_array().unwrap().len(), 2);
        let answers = json["sessions"][0]["answers"].as_array().unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0]["value"], true);
        assert_eq!(json["sessions"][1]["answers"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn formats_and_filenames() {
        assert_eq!(ExportFormat::try_from("CSV"), Ok(ExportFormat::Csv));
        assert!(ExportFormat::try_from("xlsx").is_err());
        let data = dataset();
        assert_eq!(data.filename(ExportFormat::Html), "q3-team-check-in-responses.html");
        assert_eq!(slugify("!!!"), "survey");
    }
}
