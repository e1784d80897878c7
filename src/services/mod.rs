pub mod ai;
pub mod ai_cache;
pub mod export;
