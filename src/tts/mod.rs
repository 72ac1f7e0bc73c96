//! TTSBackend (component D): text→audio with optional voice cloning behind
//! five interchangeable providers.

mod clone;
mod edge;
mod elevenlabs;
mod openai;
mod silero;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::translate::split_sentences;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const MAX_CHUNK_CHARS: usize = 10_000;
const MIN_SPEAKER_REF_BYTES: u64 = 10 * 1024;
const MAX_SPEAKER_REF_BYTES: u64 = 50 * 1024 * 1024;

#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize_chunk(
        &self,
        text: &str,
        speaker_ref: Option<&Path>,
        out_path: &Path,
        language: &str,
        voice: Option<&str>,
    ) -> Result<()>;
}

pub fn create_provider(name: &str, config: &Config) -> Result<Arc<dyn TtsProvider>> {
    match name {
        "clone-capable" => Ok(Arc::new(clone::CloneCapableTts::new(config))),
        "network-neural-a" => Ok(Arc::new(edge::NetworkNeuralA::new(config))),
        "lightweight-local-neural" => Ok(Arc::new(silero::LightweightLocalNeural::new(config))),
        "hosted-clone" => Ok(Arc::new(elevenlabs::HostedClone::new(config)?)),
        "hosted-preset" => Ok(Arc::new(openai::HostedPreset::new(config)?)),
        other => Err(Error::Validation(format!("unknown tts_engine: {other}"))),
    }
}

/// Resolve the `auto` engine selector: prefer hosted-clone when its
/// credential is present, else clone-capable when cloning was requested,
/// else fall back to the language→engine table.
pub fn resolve_auto_engine(config: &Config, language: &str, clone_requested: bool) -> String {
    if config.credentials.has("hosted-tts-clone") {
        return "hosted-clone".to_string();
    }
    if clone_requested {
        return "clone-capable".to_string();
    }
    config
        .language_to_voice
        .get(language)
        .and_then(|entry| entry.split(':').next())
        .map(|engine| engine.to_string())
        .unwrap_or_else(|| "network-neural-a".to_string())
}

fn validate_speaker_ref_size(bytes: u64) -> Result<()> {
    if bytes < MIN_SPEAKER_REF_BYTES || bytes > MAX_SPEAKER_REF_BYTES {
        return Err(Error::Validation(format!(
            "speaker reference must be between {MIN_SPEAKER_REF_BYTES} and {MAX_SPEAKER_REF_BYTES} bytes, got {bytes}"
        )));
    }
    Ok(())
}

/// `generate(text, speaker_ref?, out_path, language, voice?) → bool`. Splits
/// text exceeding 10,000 chars on sentence boundaries, synthesizes each
/// chunk, and concatenates via MediaOps. Concat failure is fatal.
pub async fn generate(
    config: &Config,
    engine: &str,
    text: &str,
    speaker_ref: Option<&Path>,
    out_path: &Path,
    language: &str,
    voice: Option<&str>,
) -> Result<bool> {
    if let Some(reference) = speaker_ref {
        let size = tokio::fs::metadata(reference).await.map_err(Error::Io)?.len();
        validate_speaker_ref_size(size)?;
    }

    let provider = create_provider(engine, config)?;
    let chunks = split_sentences(text, MAX_CHUNK_CHARS);

    if chunks.len() == 1 {
        synthesize_with_fallback(config, &provider, &chunks[0], speaker_ref, out_path, language, voice)
            .await?;
        return Ok(true);
    }

    let scratch = tempfile::tempdir().map_err(Error::Io)?;
    let mut chunk_paths = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk_path = scratch.path().join(format!("chunk_{i:04}.wav"));
        synthesize_with_fallback(config, &provider, chunk, speaker_ref, &chunk_path, language, voice)
            .await?;
        chunk_paths.push(chunk_path);
    }

    crate::media::concat_audio(&chunk_paths, out_path, Duration::from_secs(120)).await?;
    Ok(true)
}

/// `lightweight-local-neural` degrades outside its tuned language; on
/// failure it falls back to `network-neural-a` (the only provider-level
/// fallback named in this component — every other provider either succeeds
/// or the whole generate() call fails).
async fn synthesize_with_fallback(
    config: &Config,
    provider: &Arc<dyn TtsProvider>,
    text: &str,
    speaker_ref: Option<&Path>,
    out_path: &Path,
    language: &str,
    voice: Option<&str>,
) -> Result<()> {
    match provider
        .synthesize_chunk(text, speaker_ref, out_path, language, voice)
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if provider.name() == "lightweight-local-neural" => {
            tracing::warn!("lightweight-local-neural failed ({e}), falling back to network-neural-a");
            let fallback = create_provider("network-neural-a", config)?;
            fallback
                .synthesize_chunk(text, speaker_ref, out_path, language, voice)
                .await
        }
        Err(e) => Err(e),
    }
}

/// Fixed allow-list for `clone-capable`'s supported synthesis languages.
pub const CLONE_CAPABLE_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "pl", "tr", "ru", "nl", "cs", "ar", "zh", "ja", "ko", "hi",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_speaker_ref_size_rejects_tiny_files() {
        assert!(validate_speaker_ref_size(100).is_err());
    }

    #[test]
    fn validate_speaker_ref_size_rejects_oversize_files() {
        assert!(validate_speaker_ref_size(60 * 1024 * 1024).is_err());
    }

    #[test]
    fn validate_speaker_ref_size_accepts_normal_files() {
        assert!(validate_speaker_ref_size(5 * 1024 * 1024).is_ok());
    }

    #[test]
    fn resolve_auto_engine_prefers_clone_when_requested_without_hosted_credential() {
        let config = Config::default();
        assert_eq!(resolve_auto_engine(&config, "en", true), "clone-capable");
    }

    #[test]
    fn resolve_auto_engine_falls_back_to_language_table() {
        let config = Config::default();
        assert_eq!(resolve_auto_engine(&config, "ru", false), "lightweight-local-neural");
        assert_eq!(resolve_auto_engine(&config, "en", false), "network-neural-a");
    }
}
