//! STTBackend (component B): speech→text with optional timestamped
//! segments, behind four interchangeable providers and a quota-driven
//! fallback chain.

mod hosted_a;
mod hosted_b;
mod hosted_c;
mod local;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<Segment>,
}

/// Drop empty-text segments and normalize provider-native segment shapes
/// into the canonical form.
pub fn normalize_segments(segments: Vec<Segment>) -> Vec<Segment> {
    segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .collect()
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        with_segments: bool,
    ) -> Result<TranscriptionResult>;
}

pub fn create_provider(name: &str, config: &Config) -> Result<Arc<dyn SttProvider>> {
    match name {
        "local" => Ok(Arc::new(local::LocalStt::new(config))),
        "hosted-stt-b" => Ok(Arc::new(hosted_b::HostedSttB::new(config)?)),
        "hosted-stt-c" => Ok(Arc::new(hosted_c::HostedSttC::new(config)?)),
        "hosted-llm-a" => Ok(Arc::new(hosted_a::HostedSttA::new(config)?)),
        other => Err(Error::Validation(format!("unknown stt_engine: {other}"))),
    }
}

/// Providers attempted, in fixed order, after the configured engine fails
/// with a quota or missing-credential indicator. `local` is the backstop.
const FALLBACK_ORDER: &[&str] = &["hosted-llm-a", "hosted-stt-b", "hosted-stt-c", "local"];

/// Run `transcribe` on the configured engine, rotating through the
/// remaining hosted providers (then local) on quota/missing-credential
/// errors. Any other error propagates immediately.
pub async fn transcribe_with_fallback(
    config: &Config,
    primary_engine: &str,
    audio_path: &Path,
    language: Option<&str>,
    with_segments: bool,
) -> Result<TranscriptionResult> {
    let mut tried = vec![primary_engine.to_string()];
    let mut last_err = match create_provider(primary_engine, config) {
        Ok(provider) => {
            match provider.transcribe(audio_path, language, with_segments).await {
                Ok(mut r) => {
                    r.segments = normalize_segments(r.segments);
                    return Ok(r);
                }
                Err(e) => e,
            }
        }
        Err(e) => e,
    };

    for candidate in FALLBACK_ORDER {
        if tried.contains(&candidate.to_string()) {
            continue;
        }
        if !is_recoverable(&last_err) {
            return Err(last_err);
        }
        tried.push(candidate.to_string());
        match create_provider(candidate, config) {
            Ok(provider) => match provider.transcribe(audio_path, language, with_segments).await {
                Ok(mut r) => {
                    r.segments = normalize_segments(r.segments);
                    return Ok(r);
                }
                Err(e) => last_err = e,
            },
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn is_recoverable(err: &Error) -> bool {
    matches!(err, Error::ProviderQuota(_) | Error::CredentialMissing(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_empty_text_segments() {
        let segments = vec![
            Segment { start: 0.0, end: 1.0, text: "hi".into() },
            Segment { start: 1.0, end: 2.0, text: "   ".into() },
        ];
        let normalized = normalize_segments(segments);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].text, "hi");
    }

    #[test]
    fn create_provider_rejects_unknown_engine() {
        let config = Config::default();
        assert!(create_provider("bogus", &config).is_err());
    }
}
