use super::ChatProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::is_quota_error;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

/// Hosted chat API taking a `system_instruction` field (Gemini-style); the
/// automatic fallback source when it reports quota exhaustion (see
/// `hosted_b`).
pub struct HostedChatA {
    client: reqwest::Client,
    api_key: String,
}

impl HostedChatA {
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

#[async_trait]
impl ChatProvider for HostedChatA {
    fn name(&self) -> &'static str {
        "hosted-llm-a"
    }

    async fn chat(&self, system_prompt: Option<&str>, user_text: &str) -> Result<String> {
        let mut body = json!({
            "contents": [{"parts": [{"text": user_text}]}],
        });
        if let Some(system) = system_prompt {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }

        let response = self
            .client
            .post(ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .timeout(Duration::from_secs(120))
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

        let envelope: GeminiEnvelope = serde_json::from_str(&text)?;
        envelope
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| Error::DataContract("hosted-llm-a returned no candidates".to_string()))
    }
}
