use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} missing")]
    Missing(&'static str),
    #[error("{0} must be base64")]
    NotBase64(&'static str),
    #[error("{0} is too short")]
    TooShort(&'static str),
    #[error("{0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub session_key: Vec<u8>,
    pub enc_key: Vec<u8>,
    pub openai_api_key: String,
    pub openai_model: String,
    pub ai_timeout: Duration,
    pub ai_cache_ttl: Duration,
    pub bind_addr: String,
    pub public_base_url: String,
    pub static_dir: String,
    pub seed_demo: bool,
    pub cookie_secure: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let database_url = required("DATABASE_URL")?;

        let session_key_b64 = lookup("SESSION_KEY")
            .or_else(|| lookup("APP_ENC_KEY"))
            .ok_or(ConfigError::Missing("SESSION_KEY"))?;
        let session_key = decode_key("SESSION_KEY", &session_key_b64)?;
        if session_key.len() < 32 {
            return Err(ConfigError::TooShort("SESSION_KEY"));
        }

        let enc_key = decode_key("APP_ENC_KEY", &required("APP_ENC_KEY")?)?;
        if enc_key.len() != 32 {
            return Err(ConfigError::Invalid(
                "APP_ENC_KEY",
                format!("expected 32 bytes, got {}", enc_key.len()),
            ));
        }

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| {
            let port = lookup("PORT").unwrap_or_else(|| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            session_key,
            enc_key,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            ai_timeout: Duration::from_secs(parse_or(&lookup, "AI_TIMEOUT_SECS", 30)?),
            ai_cache_ttl: Duration::from_secs(parse_or(&lookup, "AI_CACHE_TTL_SECS", 1800)?),
            bind_addr,
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            static_dir: lookup("STATIC_DIR").unwrap_or_else(|| "static".to_string()),
            seed_demo: parse_flag(lookup("SEED_DEMO")),
            cookie_secure: parse_flag(lookup("COOKIE_SECURE")),
        })
    }

    pub fn survey_link(&self, survey_id: uuid::Uuid) -> String {
        format!("{}/s/{}", self.public_base_url, survey_id)
    }
}

fn decode_key(name: &'static str, raw: &str) -> Result<Vec<u8>, ConfigError> {
    general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|_| ConfigError::NotBase64(name))
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn key(len: usize) -> String {
        general_purpose::STANDARD.encode(vec![7u8; len])
    }

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/surveys".to_string()),
            ("SESSION_KEY", key(48)),
            ("APP_ENC_KEY", key(32)),
            ("OPENAI_API_KEY", "sk-test".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.openai_model, "gpt-4o-mini");
        assert_eq!(cfg.ai_timeout, Duration::from_secs(30));
        assert_eq!(cfg.ai_cache_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.db_max_connections, 10);
        assert!(!cfg.seed_demo);
    }

    #[test]
    fn overrides_and_flags() {
        let mut env = base_env();
        env.insert("PORT", "8080".into());
        env.insert("AI_TIMEOUT_SECS", "5".into());
        env.insert("SEED_DEMO", "TRUE".into());
        env.insert("PUBLIC_BASE_URL", "https://forms.example.com/".into());
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.ai_timeout, Duration::from_secs(5));
        assert!(cfg.seed_demo);
        assert_eq!(
            cfg.survey_link(uuid::Uuid::nil()),
            "https://forms.example.com/s/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn rejects_bad_values() {
        let mut env = base_env();
        env.remove("OPENAI_API_KEY");
        assert_eq!(load(&env).unwrap_err(), ConfigError::Missing("OPENAI_API_KEY"));

        let mut env = base_env();
        env.insert("SESSION_KEY", key(8));
        assert_eq!(load(&env).unwrap_err(), ConfigError::TooShort("SESSION_KEY"));

        let mut env = base_env();
        env.insert("APP_ENC_KEY", "not base64!".into());
        assert_eq!(load(&env).unwrap_err(), ConfigError::NotBase64("APP_ENC_KEY"));

        let mut env = base_env();
        env.insert("AI_CACHE_TTL_SECS", "soon".into());
        assert!(matches!(load(&env), Err(ConfigError::Invalid("AI_CACHE_TTL_SECS", _))));
    }
}
