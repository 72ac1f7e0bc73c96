use super::TtsProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const ENDPOINT: &str = "https://edge-tts.example.invalid/v1/synthesize";

/// Network neural TTS with a language→voice map resolved at admission time.
/// Native output is MP3; converted to WAV via MediaOps when the caller
/// requested a WAV chunk (the default for this crate's chunking path).
pub struct NetworkNeuralA {
    client: reqwest::Client,
    language_to_voice: HashMap<String, String>,
}

impl NetworkNeuralA {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            language_to_voice: config.language_to_voice.clone(),
        }
    }

    fn resolve_voice(&self, language: &str, voice: Option<&str>) -> String {
        if let Some(v) = voice {
            return v.to_string();
        }
        self.language_to_voice
            .get(language)
            .and_then(|entry| entry.split_once(':'))
            .map(|(_, voice)| voice.to_string())
            .unwrap_or_else(|| format!("{language}-Standard"))
    }
}

#[async_trait]
impl TtsProvider for NetworkNeuralA {
    fn name(&self) -> &'static str {
        "network-neural-a"
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        _speaker_ref: Option<&Path>,
        out_path: &Path,
        language: &str,
        voice: Option<&str>,
    ) -> Result<()> {
        let resolved_voice = self.resolve_voice(language, voice);

        let response = self
            .client
            .post(ENDPOINT)
            .json(&json!({"text": text, "voice": resolved_voice}))
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("network-neural-a: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientProvider(format!(
                "network-neural-a returned {status}: {body}"
            )));
        }

        let mp3_bytes = response.bytes().await?;
        let scratch = tempfile::tempdir().map_err(Error::Io)?;
        let mp3_path = scratch.path().join("chunk.mp3");
        tokio::fs::write(&mp3_path, &mp3_bytes).await.map_err(Error::Io)?;

        if out_path.extension().and_then(|e| e.to_str()) == Some("mp3") {
            tokio::fs::copy(&mp3_path, out_path).await.map_err(Error::Io)?;
        } else {
            convert_mp3_to_wav(&mp3_path, out_path).await?;
        }
        Ok(())
    }
}

async fn convert_mp3_to_wav(mp3: &Path, wav: &Path) -> Result<()> {
    let mut cmd = tokio::process::Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(mp3)
        .args(["-ar", "16000", "-ac", "1"])
        .arg(wav);
    cmd.stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped());
    let output = tokio::time::timeout(Duration::from_secs(60), cmd.output())
        .await
        .map_err(|_| Error::Timeout(Duration::from_secs(60)))?
        .map_err(Error::Io)?;
    if !output.status.success() {
        return Err(Error::Media(format!(
            "mp3->wav conversion failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_voice_falls_back_to_language_table() {
        let provider = NetworkNeuralA::new(&Config::default());
        assert_eq!(provider.resolve_voice("ko", None), "ko-KR");
    }

    #[test]
    fn resolve_voice_prefers_explicit_override() {
        let provider = NetworkNeuralA::new(&Config::default());
        assert_eq!(provider.resolve_voice("ko", Some("custom-voice")), "custom-voice");
    }

    #[test]
    fn resolve_voice_honors_a_custom_language_table_at_construction() {
        let mut config = Config::default();
        config
            .language_to_voice
            .insert("ko".to_string(), "network-neural-a:ko-custom".to_string());
        let provider = NetworkNeuralA::new(&config);
        assert_eq!(provider.resolve_voice("ko", None), "ko-custom");
    }
}
