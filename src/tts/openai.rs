use super::TtsProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

const ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";
const DEFAULT_VOICE: &str = "alloy";

/// Hosted preset-voice synthesizer. No cloning support: a supplied speaker
/// reference is ignored, matching the provider's actual capability.
pub struct HostedPreset {
    client: reqwest::Client,
    api_key: String,
}

impl HostedPreset {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .credentials
            .hosted_tts_preset
            .clone()
            .ok_or_else(|| Error::CredentialMissing("hosted-tts-preset".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

#[async_trait]
impl TtsProvider for HostedPreset {
    fn name(&self) -> &'static str {
        "hosted-preset"
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        _speaker_ref: Option<&Path>,
        out_path: &Path,
        _language: &str,
        voice: Option<&str>,
    ) -> Result<()> {
        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": "tts-1",
                "input": text,
                "voice": voice.unwrap_or(DEFAULT_VOICE),
                "response_format": "wav",
            }))
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("hosted-preset: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || crate::util::is_quota_error(&body) {
                return Err(Error::ProviderQuota(format!("hosted-preset: {status}")));
            }
            return Err(Error::TransientProvider(format!(
                "hosted-preset returned {status}: {body}"
            )));
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(out_path, &bytes).await.map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_credential() {
        let config = Config::default();
        assert!(HostedPreset::new(&config).is_err());
    }
}
