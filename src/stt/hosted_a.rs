use super::{Segment, SttProvider, TranscriptionResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::{extract_first_json_object, is_quota_error, strip_markdown_fences};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

/// General LLM audio endpoint: requests JSON-mode output for segmented
/// transcription, tolerates markdown fences and truncated/malformed JSON.
pub struct HostedSttA {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct ParsedReply {
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl HostedSttA {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .credentials
            .hosted_llm_a
            .clone()
            .ok_or_else(|| Error::CredentialMissing("hosted-llm-a".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }

    fn parse_reply(raw: &str) -> ParsedReply {
        let cleaned = strip_markdown_fences(raw);
        if let Ok(parsed) = serde_json::from_str::<ParsedReply>(cleaned) {
            return parsed;
        }
        if let Some(obj) = extract_first_json_object(cleaned) {
            if let Ok(parsed) = serde_json::from_str::<ParsedReply>(obj) {
                return parsed;
            }
        }
        // Unparseable: return the full text with empty segments.
        ParsedReply {
            text: raw.to_string(),
            segments: Vec::new(),
        }
    }
}

#[async_trait]
impl SttProvider for HostedSttA {
    fn name(&self) -> &'static str {
        "hosted-llm-a"
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        with_segments: bool,
    ) -> Result<TranscriptionResult> {
        let bytes = tokio::fs::read(audio_path).await.map_err(Error::Io)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        let instruction = if with_segments {
            "Transcribe this audio. Respond with JSON: {\"text\": str, \"segments\": [{\"start\": number, \"end\": number, \"text\": str}]}."
        } else {
            "Transcribe this audio. Respond with JSON: {\"text\": str, \"segments\": []}."
        };
        let prompt = match language {
            Some(lang) => format!("{instruction} The audio is in language '{lang}'."),
            None => format!("{instruction} Detect the spoken language automatically."),
        };

        let body = json!({
            "contents": [{
                "parts": [
                    {"text": prompt},
                    {"inline_data": {"mime_type": "audio/wav", "data": encoded}}
                ]
            }],
            "generationConfig": {"response_mime_type": "application/json"}
        });

        let response = self
            .client
            .post(ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .timeout(Duration::from_secs(300))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            if status.as_u16() == 429 || is_quota_error(&text) {
                return Err(Error::ProviderQuota(format!("hosted-llm-a: {text}")));
            }
            return Err(Error::TransientProvider(format!("hosted-llm-a: {status}: {text}")));
        }

        let raw_reply = extract_candidate_text(&text).unwrap_or(text);
        let parsed = Self::parse_reply(&raw_reply);
        Ok(TranscriptionResult {
            text: parsed.text,
            segments: if with_segments { parsed.segments } else { Vec::new() },
        })
    }
}

#[derive(Deserialize)]
struct GeminiEnvelope {
    candidates: Vec<GeminiCandidate>,
}
#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}
#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}
#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

fn extract_candidate_text(body: &str) -> Option<String> {
    let envelope: GeminiEnvelope = serde_json::from_str(body).ok()?;
    envelope
        .candidates
        .into_iter()
        .next()?
        .content
        .parts
        .into_iter()
        .next()
        .map(|p| p.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_reply() {
        let raw = "```json\n{\"text\": \"hello\", \"segments\": [{\"start\": 0.0, \"end\": 1.0, \"text\": \"hello\"}]}\n```";
        let parsed = HostedSttA::parse_reply(raw);
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.segments.len(), 1);
    }

    #[test]
    fn falls_back_to_full_text_on_unparseable_reply() {
        let raw = "I couldn't transcribe that clearly, sorry.";
        let parsed = HostedSttA::parse_reply(raw);
        assert_eq!(parsed.text, raw);
        assert!(parsed.segments.is_empty());
    }

    #[test]
    fn recovers_from_trailing_commentary_after_json() {
        let raw = "{\"text\": \"hi\", \"segments\": []} -- end of transcript";
        let parsed = HostedSttA::parse_reply(raw);
        assert_eq!(parsed.text, "hi");
    }
}
