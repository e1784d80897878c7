use crate::analytics::summary::SurveyAnalytics;
use crate::domain::models::{QuestionType, Survey};
use crate::services::ai_cache::AiCache;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const MAX_GENERATED_QUESTIONS: usize = 20;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI backend error: {0}")]
    Backend(String),
    #[error("AI request timed out after {0:?}")]
    Timeout(Duration),
}

/// Chat-completion seam so the service can run against a scripted backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .build()?;

        let resp = self.client.chat().create(request).await?;
        resp.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("empty completion"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImprovedQuestion {
    pub improved_text: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyInsights {
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvitationEmail {
    pub subject: String,
    pub body: String,
}

/// Loosely typed shape of a generated question as models tend to return it.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(alias = "text", alias = "question")]
    question_text: String,
    #[serde(default, alias = "type")]
    question_type: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    required: bool,
}

#[derive(Clone)]
pub struct AiService {
    backend: Arc<dyn CompletionBackend>,
    cache: AiCache,
    timeout: Duration,
}

impl AiService {
    pub fn new(api_key: &str, model: &str, timeout: Duration, cache_ttl: Duration) -> Self {
        Self::with_backend(Arc::new(OpenAiBackend::new(api_key, model)), timeout, cache_ttl)
    }

    pub fn with_backend(backend: Arc<dyn CompletionBackend>, timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            backend,
            cache: AiCache::new(cache_ttl),
            timeout,
        }
    }

    pub fn cache(&self) -> &AiCache {
        &self.cache
    }

    pub async fn generate_questions(&self, topic: &str, count: usize) -> Result<Vec<GeneratedQuestion>, AiError> {
        let count = count.clamp(1, MAX_GENERATED_QUESTIONS);
        let system = r#"You are an expert survey designer.
Return ONLY JSON of the form {"questions": [{"question_text": string, "question_type": one of "text"|"multiple_choice"|"rating"|"yes_no"|"email"|"number", "options": array of strings (multiple_choice only), "required": boolean}]}.
Rating questions use a 1-5 scale. Keep questions short, neutral and unambiguous."#;
        let user = format!("Create {count} survey questions about: {topic}");
        let count_str = count.to_string();

        let parsed = self
            .run::<serde_json::Value, _>("questions", &[topic, count_str.as_str()], system, &user, |value| {
                !coerce_questions(value, count).is_empty()
            })
            .await?;

        Ok(parsed
            .map(|value| coerce_questions(&value, count))
            .unwrap_or_else(fallback_questions))
    }

    pub async fn improve_question(&self, text: &str, question_type: QuestionType) -> Result<ImprovedQuestion, AiError> {
        let system = r#"You improve survey questions for clarity and neutrality.
Return ONLY JSON: {"improved_text": string, "rationale": string}. Keep the question type unchanged."#;
        let user = format!(
            "Question type: {}\nQuestion: {}",
            question_type.as_str(),
            text
        );

        let parsed = self
            .run::<ImprovedQuestion, _>("improve", &[question_type.as_str(), text], system, &user, |q| {
                !q.improved_text.trim().is_empty()
            })
            .await?;

        Ok(parsed.unwrap_or_else(|| ImprovedQuestion {
            improved_text: text.to_string(),
            rationale: String::new(),
        }))
    }

    pub async fn generate_insights(&self, survey: &Survey, analytics: &SurveyAnalytics) -> Result<SurveyInsights, AiError> {
        let system = r#"You are a survey analyst. Given aggregate results, write concise insights.
Return ONLY JSON: {"summary": string, "key_findings": [string], "recommendations": [string]}."#;
        let stats = serde_json::to_string(analytics).map_err(|e| AiError::Backend(e.to_string()))?;
        let user = format!(
            "Survey: {}\nDescription: {}\nResults: {}",
            survey.title,
            survey.description.as_deref().unwrap_or("-"),
            stats
        );
        let survey_id = survey.id.to_string();

        let parsed = self
            .run::<SurveyInsights, _>("insights", &[survey_id.as_str(), stats.as_str()], system, &user, |i| {
                !i.summary.trim().is_empty()
            })
            .await?;

        Ok(parsed.unwrap_or_else(|| SurveyInsights {
            summary: format!(
                "{} responses collected so far, {} completed.",
                analytics.total_sessions, analytics.completed_sessions
            ),
            key_findings: Vec::new(),
            recommendations: Vec::new(),
        }))
    }

    pub async fn generate_email(&self, survey: &Survey, link: &str, tone: &str) -> Result<InvitationEmail, AiError> {
        let system = r#"You write short survey invitation emails.
Return ONLY JSON: {"subject": string, "body": string}. The body must contain the survey link exactly once."#;
        let tone = if tone.trim().is_empty() { "friendly" } else { tone.trim() };
        let user = format!(
            "Tone: {tone}\nSurvey title: {}\nAbout: {}\nLink: {link}",
            survey.title,
            survey.description.as_deref().unwrap_or("-")
        );
        let survey_id = survey.id.to_string();

        let parsed = self
            .run::<InvitationEmail, _>("email", &[survey_id.as_str(), survey.title.as_str(), link, tone], system, &user, |e| {
                !e.subject.trim().is_empty() && !e.body.trim().is_empty()
            })
            .await?;

        Ok(parsed.unwrap_or_else(|| InvitationEmail {
            subject: format!("We'd love your feedback: {}", survey.title),
            body: format!(
                "Hi,\n\nWe're collecting feedback with a short survey, \"{}\". It only takes a few minutes:\n\n{}\n\nThank you!",
                survey.title, link
            ),
        }))
    }

    /// Calls the backend once (or serves the cache), then parses the reply.
    /// `Ok(None)` means the reply could not be parsed and the caller should
    /// use its fallback. Only replies that parse and pass `accept` are cached.
    async fn run<T, F>(
        &self,
        kind: &str,
        key_parts: &[&str],
        system: &str,
        user: &str,
        accept: F,
    ) -> Result<Option<T>, AiError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let key = AiCache::key(kind, key_parts);
        if let Some(cached) = self.cache.get(&key).await {
            if let Some(value) = parse_reply::<T>(&cached).filter(|v| accept(v)) {
                tracing::debug!("AI cache hit for {}", kind);
                return Ok(Some(value));
            }
        }

        let raw = match tokio::time::timeout(self.timeout, self.backend.complete(system, user)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::error!("AI {} request failed: {}", kind, e);
                return Err(AiError::Backend(e.to_string()));
            }
            Err(_) => {
                tracing::error!("AI {} request timed out after {:?}", kind, self.timeout);
                return Err(AiError::Timeout(self.timeout));
            }
        };

        match parse_reply::<T>(&raw).filter(|v| accept(v)) {
            Some(value) => {
                self.cache.insert(key, raw).await;
                Ok(Some(value))
            }
            None => {
                tracing::warn!("AI {} reply was not usable JSON, using fallback", kind);
                Ok(None)
            }
        }
    }
}

/// Narrows a reply to its JSON payload: the body of a markdown code fence
/// (```json ... ```) if present, then the outermost object or array.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(start) = body.find("```") {
        let after = &body[start + 3..];
        body = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
        body = body.trim();
    }

    // the fence's info string may sit on the same line as the payload
    let open = body.find(['{', '[']);
    let close = body.rfind(['}', ']']);
    match (open, close) {
        (Some(o), Some(c)) if c > o => &body[o..=c],
        _ => body,
    }
}

pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_str(strip_code_fences(raw)).ok()
}

fn coerce_questions(value: &serde_json::Value, limit: usize) -> Vec<GeneratedQuestion> {
    let items = match value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map
            .get("questions")
            .and_then(|q| q.as_array())
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawQuestion>(item).ok())
        .filter(|raw| !raw.question_text.trim().is_empty())
        .map(|raw| {
            let mut question_type = raw
                .question_type
                .as_deref()
                .and_then(|t| QuestionType::try_from(t).ok())
                .unwrap_or(QuestionType::Text);
            let mut options: Vec<String> = raw
                .options
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            if question_type.has_options() && options.len() < 2 {
                question_type = QuestionType::Text;
            }
            if !question_type.has_options() {
                options.clear();
            }
            GeneratedQuestion {
                question_text: raw.question_text.trim().to_string(),
                question_type,
                options,
                required: raw.required,
            }
        })
        .take(limit)
        .collect()
}

fn fallback_questions() -> Vec<GeneratedQuestion> {
    vec![
        GeneratedQuestion {
            question_text: "How satisfied are you overall?".to_string(),
            question_type: QuestionType::Rating,
            options: Vec::new(),
            required: true,
        },
        GeneratedQuestion {
            question_text: "What is working well for you?".to_string(),
            question_type: QuestionType::Text,
            options: Vec::new(),
            required: false,
        },
        GeneratedQuestion {
            question_text: "Would you recommend us to a friend?".to_string(),
            question_type: QuestionType::YesNo,
            options: Vec::new(),
            required: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::summary::build_summary;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
                delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(user.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => Err(anyhow::anyhow!("no scripted reply")),
            }
        }
    }

    fn service(backend: Arc<ScriptedBackend>) -> AiService {
        AiService::with_backend(backend, Duration::from_secs(5), Duration::from_secs(60))
    }

    fn survey() -> Survey {
        Survey {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Onboarding".into(),
            description: None,
            is_published: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn strips_fences_and_prose() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1,2]\n```\n"), "[1,2]");
        assert_eq!(strip_code_fences("Sure! Here you go: {\"a\":1} Enjoy"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  plain  "), "plain");
        assert_eq!(strip_code_fences("```json {\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json {\"a\":1}```\nHope this helps"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn improves_from_single_line_fence() {
        let backend = ScriptedBackend::new(vec![Ok(
            "```json {\"improved_text\":\"Better?\",\"rationale\":\"shorter\"}```",
        )]);
        let ai = service(backend);
        let improved = ai.improve_question("q?", QuestionType::Text).await.unwrap();
        assert_eq!(improved.improved_text, "Better?");
        assert_eq!(improved.rationale, "shorter");
    }

    fn many_questions(n: usize) -> String {
        let items: Vec<serde_json::Value> = (0..n)
            .map(|i| serde_json::json!({"question_text": format!("Question {i}"), "question_type": "text"}))
            .collect();
        serde_json::json!({ "questions": items }).to_string()
    }

    #[tokio::test]
    async fn question_count_is_clamped() {
        let reply = many_questions(25);
        let backend = ScriptedBackend::new(vec![Ok(reply.as_str()), Ok(reply.as_str())]);
        let ai = service(backend.clone());

        let none_asked = ai.generate_questions("hiring", 0).await.unwrap();
        assert_eq!(none_asked.len(), 1);
        let prompt = backend.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.starts_with("Create 1 survey questions"));

        let too_many = ai.generate_questions("hiring", 100).await.unwrap();
        assert_eq!(too_many.len(), MAX_GENERATED_QUESTIONS);
        let prompt = backend.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.starts_with("Create 20 survey questions"));
    }

    #[tokio::test]
    async fn insights_fall_back_to_response_counts() {
        let backend = ScriptedBackend::new(vec![Ok("Responses look positive overall.")]);
        let ai = service(backend.clone());
        let survey = survey();
        let analytics = build_summary(&[], &[], &[]);

        let insights = ai.generate_insights(&survey, &analytics).await.unwrap();
        assert_eq!(insights.summary, "0 responses collected so far, 0 completed.");
        assert!(insights.key_findings.is_empty());
        assert!(insights.recommendations.is_empty());
        assert_eq!(ai.cache().len().await, 0);
    }

    #[test]
    fn coerces_loose_questions() {
        let value = serde_json::json!({
            "questions": [
                {"text": "Pick one", "type": "multiple choice", "options": ["A", " ", "B"], "required": true},
                {"question": "Lonely choice", "type": "multiple_choice", "options": ["Only"]},
                {"question_text": "Mystery", "question_type": "matrix"},
                {"question_text": "   "}
            ]
        });
        let questions = coerce_questions(&value, 10);
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(questions[0].options, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(questions[1].question_type, QuestionType::Text);
        assert!(questions[1].options.is_empty());
        assert_eq!(questions[2].question_type, QuestionType::Text);

        assert_eq!(coerce_questions(&value, 1).len(), 1);
    }

    #[tokio::test]
    async fn generates_questions_from_fenced_reply() {
        let backend = ScriptedBackend::new(vec![Ok(
            "```json\n{\"questions\":[{\"question_text\":\"Rate the docs\",\"question_type\":\"rating\",\"required\":true}]}\n```",
        )]);
        let ai = service(backend.clone());
        let questions = ai.generate_questions("documentation", 3).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question_type, QuestionType::Rating);

        // second call is served from cache
        let again = ai.generate_questions("  Documentation ", 3).await.unwrap();
        assert_eq!(again, questions);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_and_is_not_cached() {
        let backend = ScriptedBackend::new(vec![Ok("I cannot help with that"), Ok("still no json")]);
        let ai = service(backend.clone());

        let questions = ai.generate_questions("pricing", 5).await.unwrap();
        assert_eq!(questions, fallback_questions());
        let _ = ai.generate_questions("pricing", 5).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ai.cache().len().await, 0);
    }

    #[tokio::test]
    async fn improve_falls_back_to_original() {
        let backend = ScriptedBackend::new(vec![Ok("{\"improved_text\": \"\"}")]);
        let ai = service(backend);
        let improved = ai
            .improve_question("do u like it", QuestionType::YesNo)
            .await
            .unwrap();
        assert_eq!(improved.improved_text, "do u like it");
        assert!(improved.rationale.is_empty());
    }

    #[tokio::test]
    async fn backend_errors_surface() {
        let backend = ScriptedBackend::new(vec![Err("rate limited")]);
        let ai = service(backend);
        let err = ai.generate_email(&survey(), "https://x/s/1", "").await.unwrap_err();
        assert!(matches!(err, AiError::Backend(_)));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let backend = ScriptedBackend::slow(Duration::from_millis(200));
        let ai = AiService::with_backend(backend, Duration::from_millis(20), Duration::from_secs(60));
        let err = ai.improve_question("Q?", QuestionType::Text).await.unwrap_err();
        assert!(matches!(err, AiError::Timeout(_)));
    }

    #[tokio::test]
    async fn email_fallback_contains_link() {
        let backend = ScriptedBackend::new(vec![Ok("{\"subject\": \"Hi\"}")]);
        let ai = service(backend);
        let email = ai
            .generate_email(&survey(), "https://forms.example.com/s/abc", "formal")
            .await
            .unwrap();
        assert!(email.subject.contains("Onboarding"));
        assert!(email.body.contains("https://forms.example.com/s/abc"));
    }
}
