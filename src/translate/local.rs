use super::ChatProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Local model server with an OpenAI-compatible chat endpoint.
pub struct LocalChat {
    client: reqwest::Client,
    base_url: String,
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

impl LocalChat {
    pub fn new(_config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("DUBCORE_LOCAL_LLM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434/v1/chat/completions".to_string()),
        }
    }
}

#[async_trait]
impl ChatProvider for LocalChat {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn chat(&self, system_prompt: Option<&str>, user_text: &str) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user_text}));

        let body = json!({
            "model": "local",
            "messages": messages,
            "stream": false,
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| Error::TransientProvider(format!("local chat: {e}")))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::TransientProvider(format!("local chat: {status}: {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::DataContract("local chat returned no choices".to_string()))
    }
}
