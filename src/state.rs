use crate::config::AppConfig;
use crate::crypto::Crypto;
use crate::services::ai::AiService;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub crypto: Arc<Crypto>,
    pub ai: Arc<AiService>,
    pub session_key: Vec<u8>,
    pub config: Arc<AppConfig>,
}

pub type SharedState = Arc<AppState>;
