use super::ChatProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util::is_quota_error;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Hosted chat API taking an OpenAI-style message array.
pub struct HostedChatB {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: Message,
}
#[derive(Deserialize)]
struct Message {
    content: String,
}

impl HostedChatB {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .credentials
            .hosted_llm_b
            .clone()
            .ok_or_else(|| Error::CredentialMissing("hosted-llm-b".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatProvider for HostedChatB {
    fn name(&self) -> &'static str {
        "hosted-llm-b"
    }

    async fn chat(&self, system_prompt: Option<&str>, user_text: &str) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user_text}));

        let body = json!({
            "model": "llama-3.1-70b-versatile",
            "messages": messages,
        });

        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            if status.as_u16() == 429 || is_quota_error(&text) {
                return Err(Error::ProviderQuota(format!("hosted-llm-b: {text}")));
            }
            return Err(Error::TransientProvider(format!("hosted-llm-b: {status}: {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::DataContract("hosted-llm-b returned no choices".to_string()))
    }
}
