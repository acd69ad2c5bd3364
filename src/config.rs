use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub media: MediaConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct MediaConfig {
    pub server_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
}

/// Service addresses handed to the collaborators of every call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    /// Media server the room transport dials
    pub media_url: String,
    /// Backend API the platform layer talks to
    pub api_url: String,
}

impl Config {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            media_url: self.media.server_url.clone(),
            api_url: self.api.base_url.clone(),
        }
    }
}

/// Per-call tuning shared by every session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub agent_join_timeout_secs: u64,
    pub attach_retry_interval_ms: u64,
    pub attach_max_retries: u32,
    pub token_prefix: String,
    /// Recognition language (e.g. "en-US"); capture stays off when unset
    pub language: Option<String>,
    pub agent_identity_patterns: Vec<String>,
    pub video_agent_identity_patterns: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            agent_join_timeout_secs: 30,
            attach_retry_interval_ms: 100,
            attach_max_retries: 10,
            token_prefix: "eyJ".to_string(),
            language: None,
            agent_identity_patterns: vec!["agent".to_string()],
            video_agent_identity_patterns: vec!["avatar".to_string(), "video".to_string()],
        }
    }
}

impl Config {
    /// Load from `path`, then overlay `AVATAR_CALL_*` environment variables
    ///
    /// Nested keys are separated by `__`, e.g. `AVATAR_CALL_MEDIA__SERVER_URL`.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("AVATAR_CALL")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
