//! Environment-sourced configuration with strong defaults (component J).

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub hosted_stt_b: Option<String>,
    pub hosted_stt_c: Option<String>,
    pub hosted_llm_a: Option<String>,
    pub hosted_llm_b: Option<String>,
    pub hosted_tts_clone: Option<String>,
    pub hosted_tts_preset: Option<String>,
}

impl Credentials {
    fn load() -> Self {
        Self {
            hosted_stt_b: env_string("DUBCORE_STT_B_API_KEY"),
            hosted_stt_c: env_string("DUBCORE_STT_C_API_KEY"),
            hosted_llm_a: env_string("DUBCORE_LLM_A_API_KEY"),
            hosted_llm_b: env_string("DUBCORE_LLM_B_API_KEY"),
            hosted_tts_clone: env_string("DUBCORE_TTS_CLONE_API_KEY"),
            hosted_tts_preset: env_string("DUBCORE_TTS_PRESET_API_KEY"),
        }
    }

    /// Human-readable names for missing-credential diagnostics (kind 3).
    pub fn missing(&self, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .filter(|n| !self.has(n))
            .map(|n| n.to_string())
            .collect()
    }

    pub fn has(&self, provider: &str) -> bool {
        match provider {
            "hosted-stt-b" => self.hosted_stt_b.is_some(),
            "hosted-stt-c" => self.hosted_stt_c.is_some(),
            "hosted-llm-a" => self.hosted_llm_a.is_some(),
            "hosted-llm-b" => self.hosted_llm_b.is_some(),
            "hosted-tts-clone" => self.hosted_tts_clone.is_some(),
            "hosted-tts-preset" => self.hosted_tts_preset.is_some(),
            // local providers never require a credential
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub static_dir: std::path::PathBuf,
    pub max_file_size: u64,
    pub max_jobs: usize,
    pub max_logs_per_job: usize,
    pub job_expiration_hours: i64,
    pub stt_timeout: Duration,
    pub translation_timeout: Duration,
    pub quality_timeout: Duration,
    pub ffmpeg_timeout: Duration,
    pub soft_embed_timeout: Duration,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub max_concurrent_jobs: usize,
    pub cors_origins: Vec<String>,
    pub api_key: Option<String>,
    pub quality_floor: f64,
    pub default_stt_engine: String,
    pub default_translation_engine: String,
    pub default_tts_engine: String,
    pub language_allow_list: Vec<String>,
    pub language_to_voice: HashMap<String, String>,
    pub credentials: Credentials,
}

impl Default for Config {
    fn default() -> Self {
        let language_allow_list = vec![
            "en", "ko", "ja", "ru", "zh", "es", "fr", "de", "it", "pt", "nl", "pl", "tr", "vi",
            "th", "ar", "hi", "he", "id", "ms",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let mut language_to_voice = HashMap::new();
        language_to_voice.insert("en".to_string(), "network-neural-a:en-US".to_string());
        language_to_voice.insert("ko".to_string(), "network-neural-a:ko-KR".to_string());
        language_to_voice.insert("ja".to_string(), "network-neural-a:ja-JP".to_string());
        language_to_voice.insert("ru".to_string(), "lightweight-local-neural:ru".to_string());

        Self {
            static_dir: std::path::PathBuf::from("static"),
            max_file_size: 2 * 1024 * 1024 * 1024,
            max_jobs: 1000,
            max_logs_per_job: 1000,
            job_expiration_hours: 24,
            stt_timeout: Duration::from_secs(300),
            translation_timeout: Duration::from_secs(300),
            quality_timeout: Duration::from_secs(120),
            ffmpeg_timeout: Duration::from_secs(600),
            soft_embed_timeout: Duration::from_secs(60),
            rate_limit_requests: 1000,
            rate_limit_window: Duration::from_secs(60),
            max_concurrent_jobs: 3,
            cors_origins: vec!["*".to_string()],
            api_key: None,
            quality_floor: 60.0,
            default_stt_engine: "local".to_string(),
            default_translation_engine: "local".to_string(),
            default_tts_engine: "auto".to_string(),
            language_allow_list,
            language_to_voice,
            credentials: Credentials {
                hosted_stt_b: None,
                hosted_stt_c: None,
                hosted_llm_a: None,
                hosted_llm_b: None,
                hosted_tts_clone: None,
                hosted_tts_preset: None,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_string("DUBCORE_STATIC_DIR") {
            config.static_dir = std::path::PathBuf::from(dir);
        }
        config.max_file_size = env_parse("DUBCORE_MAX_FILE_SIZE", config.max_file_size);
        config.max_jobs = env_parse("DUBCORE_MAX_JOBS", config.max_jobs);
        config.max_logs_per_job = env_parse("DUBCORE_MAX_LOGS_PER_JOB", config.max_logs_per_job);
        config.job_expiration_hours =
            env_parse("DUBCORE_JOB_EXPIRATION_HOURS", config.job_expiration_hours);
        config.stt_timeout = Duration::from_secs(env_parse(
            "DUBCORE_STT_TIMEOUT",
            config.stt_timeout.as_secs(),
        ));
        config.translation_timeout = Duration::from_secs(env_parse(
            "DUBCORE_TRANSLATION_TIMEOUT",
            config.translation_timeout.as_secs(),
        ));
        config.quality_timeout = Duration::from_secs(env_parse(
            "DUBCORE_QUALITY_TIMEOUT",
            config.quality_timeout.as_secs(),
        ));
        config.ffmpeg_timeout = Duration::from_secs(env_parse(
            "DUBCORE_FFMPEG_TIMEOUT",
            config.ffmpeg_timeout.as_secs(),
        ));
        config.rate_limit_requests =
            env_parse("DUBCORE_RATE_LIMIT_REQUESTS", config.rate_limit_requests);
        config.rate_limit_window = Duration::from_secs(env_parse(
            "DUBCORE_RATE_LIMIT_WINDOW",
            config.rate_limit_window.as_secs(),
        ));
        config.max_concurrent_jobs =
            env_parse("DUBCORE_MAX_CONCURRENT_JOBS", config.max_concurrent_jobs);
        if let Some(origins) = env_string("DUBCORE_CORS_ORIGINS") {
            config.cors_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        config.api_key = env_string("DUBCORE_API_KEY");
        config.quality_floor = env_parse("DUBCORE_QUALITY_FLOOR", config.quality_floor);
        if let Some(v) = env_string("DUBCORE_DEFAULT_STT_ENGINE") {
            config.default_stt_engine = v;
        }
        if let Some(v) = env_string("DUBCORE_DEFAULT_TRANSLATION_ENGINE") {
            config.default_translation_engine = v;
        }
        if let Some(v) = env_string("DUBCORE_DEFAULT_TTS_ENGINE") {
            config.default_tts_engine = v;
        }
        config.credentials = Credentials::load();

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Validation(
                "DUBCORE_MAX_CONCURRENT_JOBS must be greater than 0".to_string(),
            ));
        }
        if self.max_jobs == 0 {
            return Err(Error::Validation(
                "DUBCORE_MAX_JOBS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auth_enabled(&self) -> bool {
        self.api_key.is_some() || env_bool("DUBCORE_AUTH_ENABLED", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_caps() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.max_jobs, 1000);
        assert_eq!(config.rate_limit_requests, 1000);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn credentials_missing_lists_only_absent_names() {
        let creds = Credentials {
            hosted_stt_b: Some("key".to_string()),
            hosted_stt_c: None,
            hosted_llm_a: None,
            hosted_llm_b: None,
            hosted_tts_clone: None,
            hosted_tts_preset: None,
        };
        let missing = creds.missing(&["hosted-stt-b", "hosted-stt-c"]);
        assert_eq!(missing, vec!["hosted-stt-c".to_string()]);
    }
}
