use super::TtsProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENDPOINT: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_PRESET_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Hosted instant-voice-cloning synthesizer. A REDESIGN over the source
/// system: every cloned voice is deleted immediately after synthesis
/// instead of being left to accumulate in the account.
pub struct HostedClone {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct CloneResponse {
    voice_id: String,
}

impl HostedClone {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .credentials
            .hosted_tts_clone
            .clone()
            .ok_or_else(|| Error::CredentialMissing("hosted-tts-clone".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }

    async fn clone_voice(&self, speaker_ref: &Path) -> Result<String> {
        let bytes = tokio::fs::read(speaker_ref).await.map_err(Error::Io)?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name("speaker.wav");
        let form = reqwest::multipart::Form::new()
            .text("name", format!("tmp-clone-{}", uuid::Uuid::new_v4()))
            .part("files", part);

        let response = self
            .client
            .post(format!("{ENDPOINT}/voices/add"))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("hosted-clone voice add: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, "hosted-clone voice add"));
        }
        let parsed: CloneResponse = response.json().await?;
        Ok(parsed.voice_id)
    }

    async fn delete_voice(&self, voice_id: &str) {
        let result = self
            .client
            .delete(format!("{ENDPOINT}/voices/{voice_id}"))
            .header("xi-api-key", &self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!("failed to delete cloned voice {voice_id}: {e}");
        }
    }

    async fn synthesize_with_voice(&self, text: &str, voice_id: &str, out_path: &Path) -> Result<()> {
        let response = self
            .client
            .post(format!("{ENDPOINT}/text-to-speech/{voice_id}"))
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({"text": text, "model_id": "eleven_multilingual_v2"}))
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("hosted-clone synthesize: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, "hosted-clone synthesize"));
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(out_path, &bytes).await.map_err(Error::Io)?;
        Ok(())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str, context: &str) -> Error {
    if status.as_u16() == 429 || crate::util::is_quota_error(body) {
        Error::ProviderQuota(format!("{context}: {status}"))
    } else {
        Error::TransientProvider(format!("{context} returned {status}: {body}"))
    }
}

#[async_trait]
impl TtsProvider for HostedClone {
    fn name(&self) -> &'static str {
        "hosted-clone"
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        speaker_ref: Option<&Path>,
        out_path: &Path,
        _language: &str,
        voice: Option<&str>,
    ) -> Result<()> {
        match speaker_ref {
            Some(reference) => {
                let voice_id = self.clone_voice(reference).await?;
                let result = self.synthesize_with_voice(text, &voice_id, out_path).await;
                self.delete_voice(&voice_id).await;
                result
            }
            None => {
                let voice_id = voice.unwrap_or(DEFAULT_PRESET_VOICE_ID);
                self.synthesize_with_voice(text, voice_id, out_path).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_credential() {
        let config = Config::default();
        assert!(HostedClone::new(&config).is_err());
    }

    #[test]
    fn new_succeeds_with_credential() {
        let mut config = Config::default();
        config.credentials.hosted_tts_clone = Some("key".to_string());
        assert!(HostedClone::new(&config).is_ok());
    }
}
