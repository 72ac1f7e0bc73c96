use super::{Segment, SttProvider, TranscriptionResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::{free_vram_gb, release_accelerator_memory, MIN_VRAM_GB};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Local speech-to-text, fronting a locally-hosted batched transcriber over
/// HTTP. Mirrors the VRAM pre-check / CPU fallback / beam-size defaults of
/// the in-process local transcriber this provider wraps.
pub struct LocalStt {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct LocalRequest<'a> {
    audio_path: &'a str,
    language: Option<&'a str>,
    with_segments: bool,
    device: &'a str,
    compute_type: &'a str,
    batch_size: u32,
    beam_size: u32,
}

#[derive(Deserialize)]
struct LocalResponse {
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl LocalStt {
    pub fn new(_config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("DUBCORE_LOCAL_STT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8900/transcribe".to_string()),
        }
    }

    /// Device/compute-type/batch-size resolution ported from the VRAM
    /// pre-check in the module this wraps: below `MIN_VRAM_GB` free, fall
    /// back to CPU int8; below the low-VRAM threshold, keep GPU but cap
    /// batch size at 1.
    fn resolve_device(&self) -> (&'static str, &'static str, u32) {
        let free = free_vram_gb();
        if free < MIN_VRAM_GB {
            ("cpu", "int8", 1)
        } else if free < crate::util::LOW_VRAM_GB {
            ("cuda", "float16", 1)
        } else {
            ("cuda", "float16", 4)
        }
    }
}

#[async_trait]
impl SttProvider for LocalStt {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        with_segments: bool,
    ) -> Result<TranscriptionResult> {
        let (device, compute_type, batch_size) = self.resolve_device();
        let request = LocalRequest {
            audio_path: &audio_path.to_string_lossy(),
            language,
            with_segments,
            device,
            compute_type,
            batch_size,
            beam_size: 5,
        };

        let result = self
            .client
            .post(&self.base_url)
            .json(&request)
            .timeout(Duration::from_secs(300))
            .send()
            .await;

        release_accelerator_memory("local-stt");

        let response = match result {
            Ok(r) => r,
            Err(e) if device == "cuda" => {
                // Retry once on CPU with low-precision dtype (model-load OOM).
                let retry_request = LocalRequest {
                    device: "cpu",
                    compute_type: "int8",
                    batch_size: 1,
                    ..request
                };
                self.client
                    .post(&self.base_url)
                    .json(&retry_request)
                    .timeout(Duration::from_secs(300))
                    .send()
                    .await
                    .map_err(|e2| Error::TransientProvider(format!("local stt: {e} / retry: {e2}")))?
            }
            Err(e) => return Err(Error::TransientProvider(format!("local stt: {e}"))),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientProvider(format!(
                "local stt returned {status}: {body}"
            )));
        }

        let parsed: LocalResponse = response.json().await?;
        Ok(TranscriptionResult {
            text: parsed.text,
            segments: if with_segments { parsed.segments } else { Vec::new() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_device_falls_back_to_cpu_with_no_vram() {
        let stt = LocalStt::new(&Config::default());
        // free_vram_gb() is a stubbed 0.0 in this crate's execution model.
        let (device, compute, batch) = stt.resolve_device();
        assert_eq!(device, "cpu");
        assert_eq!(compute, "int8");
        assert_eq!(batch, 1);
    }
}
