use super::{Segment, SttProvider, TranscriptionResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::is_quota_error;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const MAX_BYTES: u64 = 25 * 1024 * 1024;
const ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Whisper-clone hosted API with a hard 25 MB request cap. Oversize inputs
/// are transparently re-encoded to a 64 kbps mono MP3 @ 16 kHz scratch file
/// before upload; still-oversize after one re-encode attempt is a failure.
pub struct HostedSttB {
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

impl HostedSttB {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .credentials
            .hosted_stt_b
            .clone()
            .ok_or_else(|| Error::CredentialMissing("hosted-stt-b".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }

    async fn resolve_upload_path(&self, audio_path: &Path) -> Result<(std::path::PathBuf, Option<tempfile::TempDir>)> {
        let size = tokio::fs::metadata(audio_path).await.map_err(Error::Io)?.len();
        if size <= MAX_BYTES {
            return Ok((audio_path.to_path_buf(), None));
        }
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let scratch = dir.path().join("reencoded.mp3");
        reencode_to_64k_mono_mp3(audio_path, &scratch).await?;
        let new_size = tokio::fs::metadata(&scratch).await.map_err(Error::Io)?.len();
        if new_size > MAX_BYTES {
            return Err(Error::ProviderSizeLimit(format!(
                "audio still exceeds {MAX_BYTES} bytes after re-encode ({new_size} bytes)"
            )));
        }
        Ok((scratch, Some(dir)))
    }
}

async fn reencode_to_64k_mono_mp3(src: &Path, dst: &Path) -> Result<()> {
    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(src)
        .args(["-ac", "1", "-ar", "16000", "-b:a", "64k", "-c:a", "libmp3lame"])
        .arg(dst);
    cmd.stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped());
    let output = tokio::time::timeout(Duration::from_secs(120), cmd.output())
        .await
        .map_err(|_| Error::Timeout(Duration::from_secs(120)))?
        .map_err(Error::Io)?;
    if !output.status.success() {
        return Err(Error::Media(format!(
            "re-encode for hosted-stt-b failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[async_trait]
impl SttProvider for HostedSttB {
    fn name(&self) -> &'static str {
        "hosted-stt-b"
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        with_segments: bool,
    ) -> Result<TranscriptionResult> {
        let (upload_path, _guard) = self.resolve_upload_path(audio_path).await?;
        let bytes = tokio::fs::read(&upload_path).await.map_err(Error::Io)?;
        let filename = upload_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let mut form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
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
                return Err(Error::ProviderQuota(format!("hosted-stt-b: {text}")));
            }
            return Err(Error::TransientProvider(format!("hosted-stt-b: {status}: {text}")));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_upload_path_passes_through_small_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.wav");
        tokio::fs::write(&path, vec![0u8; 1024]).await.unwrap();

        let provider = HostedSttB {
            client: reqwest::Client::new(),
            api_key: "test".into(),
        };
        let (resolved, _guard) = provider.resolve_upload_path(&path).await.unwrap();
        assert_eq!(resolved, path);
    }
}
