// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Covers HTTP bind, language catalog, translator, pub/sub and chat credentials

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub languages: LanguageConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Fixed catalog of target language codes every broadcast is expanded into
    #[serde(default = "default_catalog")]
    pub catalog: Vec<String>,
    #[serde(default = "default_baseline_language")]
    pub baseline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default = "default_translator_endpoint")]
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_translator_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_certificate: Option<String>,
    #[serde(default = "default_server_user_id")]
    pub server_user_id: String,
    #[serde(default = "default_broadcast_channel")]
    pub channel: String,
    #[serde(default = "default_pubsub_api_base")]
    pub api_base: String,
    /// Lifetime of issued auth tokens, in seconds
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Delay between consecutive direct sends, to stay under the Bot API rate limit
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    3001
}

fn default_catalog() -> Vec<String> {
    // ISO 639 codes for the supported broadcast languages
    [
        "en", "hi", "bn", "te", "mr", "ta", "ur", "gu", "kn", "or", "pa", "ml", "as", "mai", "sa",
        "ne", "ks", "sd", "kok", "mni", "brx", "doi", "sat",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_baseline_language() -> String {
    "en".to_string()
}

fn default_translator_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        .to_string()
}

fn default_translator_timeout_secs() -> u64 {
    30
}

fn default_server_user_id() -> String {
    "emergency_server".to_string()
}

fn default_broadcast_channel() -> String {
    "EMERGENCY_ALERTS".to_string()
}

fn default_pubsub_api_base() -> String {
    "https://api.agora.io".to_string()
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_pacing_ms() -> u64 {
    50
}

fn default_db_path() -> String {
    "./siren.db".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            baseline: default_baseline_language(),
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_translator_endpoint(),
            api_key: None,
            timeout_secs: default_translator_timeout_secs(),
        }
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_certificate: None,
            server_user_id: default_server_user_id(),
            channel: default_broadcast_channel(),
            api_base: default_pubsub_api_base(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file (if present) with environment variable overrides
    pub fn load(config_path: &str) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path))?
        } else {
            Config::default()
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("PORT") {
            config.http.port = val
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = std::env::var("TRANSLATOR_ENDPOINT") {
            config.translator.endpoint = val;
        }
        if let Ok(val) = std::env::var("TRANSLATOR_API_KEY") {
            config.translator.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("PUBSUB_APP_ID") {
            config.pubsub.app_id = Some(val);
        }
        if let Ok(val) = std::env::var("PUBSUB_APP_CERTIFICATE") {
            config.pubsub.app_certificate = Some(val);
        }
        if let Ok(val) = std::env::var("PUBSUB_SERVER_USER_ID") {
            config.pubsub.server_user_id = val;
        }
        if let Ok(val) = std::env::var("PUBSUB_CHANNEL") {
            config.pubsub.channel = val;
        }
        if let Ok(val) = std::env::var("PUBSUB_API_BASE") {
            config.pubsub.api_base = val;
        }
        if let Ok(val) = std::env::var("TELEGRAM_BOT_TOKEN") {
            config.telegram.bot_token = Some(val);
        }
        if let Ok(val) = std::env::var("TELEGRAM_PACING_MS") {
            config.telegram.pacing_ms = val
                .parse()
                .with_context(|| format!("TELEGRAM_PACING_MS must be an integer, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("DATABASE_PATH") {
            config.storage.path = val;
        }

        // Validate
        config.languages.catalog.retain(|l| !l.trim().is_empty());
        if config.languages.catalog.is_empty() {
            anyhow::bail!("languages.catalog must contain at least one language code");
        }
        if !config
            .languages
            .catalog
            .contains(&config.languages.baseline)
        {
            anyhow::bail!(
                "languages.baseline ({}) must be part of languages.catalog",
                config.languages.baseline
            );
        }
        if config.pubsub.app_id.is_some() != config.pubsub.app_certificate.is_some() {
            anyhow::bail!("pubsub.app_id and pubsub.app_certificate must be set together");
        }

        Ok(config)
    }

    /// True when pub/sub credentials are fully configured
    pub fn pubsub_configured(&self) -> bool {
        self.pubsub.app_id.is_some() && self.pubsub.app_certificate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_contains_baseline() {
        let config = Config::default();
        assert!(config
            .languages
            .catalog
            .contains(&config.languages.baseline));
    }

    #[test]
    fn test_pubsub_unconfigured_by_default() {
        let config = Config::default();
        assert!(!config.pubsub_configured());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [pubsub]
            app_id = "app"
            app_certificate = "cert"

            [telegram]
            bot_token = "123:abc"
            "#,
        )
        .unwrap();
        assert!(config.pubsub_configured());
        assert_eq!(config.telegram.pacing_ms, 50);
        assert_eq!(config.pubsub.channel, "EMERGENCY_ALERTS");
        assert_eq!(config.http.port, 3001);
    }
}
