use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Process-level settings for reaching the external model endpoints.
///
/// Loaded once at startup and treated as immutable afterwards; pipeline
/// tuning lives with the pipeline crate, not here.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    /// Per-call budget for every external service invocation.
    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

const fn default_service_timeout_ms() -> u64 {
    10_000
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let config = Config::builder()
            .set_override("openai_api_key", "test-key")
            .unwrap()
            .build()
            .unwrap();

        let app: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(app.embedding_dimensions, 1536);
        assert_eq!(app.service_timeout_ms, 10_000);
    }
}
