use super::TtsProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// Lightweight local neural synthesizer tuned for `ru`. Degrades outside
/// that language; the caller-visible fallback to `network-neural-a` lives
/// one layer up in `synthesize_with_fallback`.
pub struct LightweightLocalNeural {
    client: reqwest::Client,
    base_url: String,
}

impl LightweightLocalNeural {
    pub fn new(_config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("DUBCORE_SILERO_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8902/synthesize".to_string()),
        }
    }
}

#[async_trait]
impl TtsProvider for LightweightLocalNeural {
    fn name(&self) -> &'static str {
        "lightweight-local-neural"
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        _speaker_ref: Option<&Path>,
        out_path: &Path,
        language: &str,
        voice: Option<&str>,
    ) -> Result<()> {
        if language != "ru" {
            return Err(Error::Validation(format!(
                "lightweight-local-neural is tuned for ru, got '{language}'"
            )));
        }

        let response = self
            .client
            .post(&self.base_url)
            .json(&json!({
                "text": text,
                "speaker": voice.unwrap_or("ru_v3"),
                "out_path": out_path.to_string_lossy(),
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("lightweight-local-neural: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientProvider(format!(
                "lightweight-local-neural returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_russian_language() {
        let provider = LightweightLocalNeural::new(&Config::default());
        let err = provider
            .synthesize_chunk("hello", None, Path::new("/tmp/out.wav"), "en", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
