use super::{Segment, SttProvider, TranscriptionResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::is_quota_error;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const ENDPOINT: &str = "https://api.groq.com/openai/v1/audio/transcriptions";

/// Whisper-service hosted API: a direct, uncapped call (no size-driven
/// re-encode path, unlike hosted-stt-b).
pub struct HostedSttC {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct VerboseResponse {
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}
#[derive(Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl HostedSttC {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .credentials
            .hosted_stt_c
            .clone()
            .ok_or_else(|| Error::CredentialMissing("hosted-stt-c".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

#[async_trait]
impl SttProvider for HostedSttC {
    fn name(&self) -> &'static str {
        "hosted-stt-c"
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        with_segments: bool,
    ) -> Result<TranscriptionResult> {
        let bytes = tokio::fs::read(audio_path).await.map_err(Error::Io)?;
        let filename = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let mut form = reqwest::multipart::Form::new()
            .text("model", "whisper-large-v3")
            .part("file", part)
            .text(
                "response_format",
                if with_segments { "verbose_json" } else { "json" },
            );
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(Duration::from_secs(300))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            if status.as_u16() == 429 || is_quota_error(&text) {
                return Err(Error::ProviderQuota(format!("hosted-stt-c: {text}")));
            }
            return Err(Error::TransientProvider(format!("hosted-stt-c: {status}: {text}")));
        }

        let parsed: VerboseResponse = serde_json::from_str(&text)?;
        let segments = if with_segments {
            parsed
                .segments
                .into_iter()
                .map(|s| Segment { start: s.start, end: s.end, text: s.text })
                .collect()
        } else {
            Vec::new()
        };
        Ok(TranscriptionResult { text: parsed.text, segments })
    }
}
