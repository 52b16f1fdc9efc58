use std::env;

/// Process-wide settings, read from the environment once at startup and
/// passed by reference into each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub redis_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub proxy_url: Option<String>,
    pub glyph_map_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_path: env::var("CHE_DATABASE_PATH")
                .unwrap_or_else(|_| "data/che168.sqlite".into()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            proxy_url: env::var("PROXY_URL").ok(),
            glyph_map_path: env::var("GLYPH_MAP_PATH").ok(),
        }
    }
}

// ── Tests ──
