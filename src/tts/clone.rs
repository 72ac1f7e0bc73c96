use super::{TtsProvider, CLONE_CAPABLE_LANGUAGES};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::release_accelerator_memory;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Clone-capable local synthesizer: requires a speaker reference, fixed
/// language allow-list, releases accelerator memory after every call.
pub struct CloneCapableTts {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct Request<'a> {
    text: &'a str,
    speaker_ref: &'a str,
    language: &'a str,
    out_path: &'a str,
}

impl CloneCapableTts {
    pub fn new(_config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("DUBCORE_LOCAL_TTS_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8901/synthesize".to_string()),
        }
    }
}

#[async_trait]
impl TtsProvider for CloneCapableTts {
    fn name(&self) -> &'static str {
        "clone-capable"
    }

    async fn synthesize_chunk(
        &self,
        text: &str,
        speaker_ref: Option<&Path>,
        out_path: &Path,
        language: &str,
        _voice: Option<&str>,
    ) -> Result<()> {
        if !CLONE_CAPABLE_LANGUAGES.contains(&language) {
            return Err(Error::Validation(format!(
                "clone-capable does not support language '{language}'"
            )));
        }
        let speaker_ref = speaker_ref
            .ok_or_else(|| Error::Validation("clone-capable requires a speaker reference".to_string()))?;

        let request = Request {
            text,
            speaker_ref: &speaker_ref.to_string_lossy(),
            language,
            out_path: &out_path.to_string_lossy(),
        };

        let result = self
            .client
            .post(&self.base_url)
            .json(&request)
            .timeout(Duration::from_secs(300))
            .send()
            .await;

        release_accelerator_memory("clone-capable-tts");

        let response = result.map_err(|e| Error::TransientProvider(format!("clone-capable: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientProvider(format!(
                "clone-capable returned {status}: {body}"
            )));
        }
        Ok(())
    }
}
