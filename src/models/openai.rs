use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatModel, ModelError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub reasoning_effort: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout: Duration::from_secs(240),
            temperature: None,
            reasoning_effort: None,
        }
    }
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    http: reqwest::blocking::Client,
    cfg: OpenAiConfig,
    api_key: String,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, ModelError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::MissingApiKey(cfg.api_key_env.clone()))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(Self { http, cfg, api_key })
    }

    fn endpoint(&self) -> String {
        endpoint_for(&self.cfg.base_url)
    }
}

fn endpoint_for(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn build_request<'a>(
    cfg: &'a OpenAiConfig,
    system_prompt: Option<&'a str>,
    user_prompt: &'a str,
    max_tokens: u32,
) -> ApiRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if let Some(s) = system_prompt.filter(|s| !s.trim().is_empty()) {
        messages.push(ApiMessage {
            role: "system",
            content: s,
        });
    }
    messages.push(ApiMessage {
        role: "user",
        content: user_prompt,
    });
    ApiRequest {
        model: &cfg.model,
        messages,
        max_completion_tokens: max_tokens,
        temperature: cfg.temperature,
        reasoning_effort: cfg.reasoning_effort.as_deref(),
    }
}

fn classify(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(err.to_string())
    }
}

impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.cfg.model
    }

    fn chat(
        &mut self,
        system_prompt: Option<&str>,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ModelError> {
        let body = build_request(&self.cfg, system_prompt, user_prompt, max_tokens);
        debug!(model = %self.cfg.model, user_chars = user_prompt.len(), "chat request");
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(classify)?;

        let status = resp.status();
        let text = resp.text().map_err(classify)?;
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: crate::textutil::truncate_chars(&text, 500),
            });
        }

        let parsed: ApiResponse =
            serde_json::from_str(&text).map_err(|e| ModelError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint_for("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn request_skips_blank_system_and_unset_options() {
        let cfg = OpenAiConfig::default();
        let req = build_request(&cfg, Some("  "), "[]", 1200);
        let v = serde_json::to_value(&req).expect("ser");
        assert_eq!(v["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["max_completion_tokens"], 1200);
        assert!(v.get("temperature").is_none());
        assert!(v.get("reasoning_effort").is_none());

        let cfg = OpenAiConfig {
            reasoning_effort: Some("low".to_string()),
            ..OpenAiConfig::default()
        };
        let req = build_request(&cfg, Some("system"), "[]", 10);
        let v = serde_json::to_value(&req).expect("ser");
        assert_eq!(v["messages"][0]["content"], "system");
        assert_eq!(v["reasoning_effort"], "low");
    }

    #[test]
    fn missing_key_is_reported_with_env_name() {
        let cfg = OpenAiConfig {
            api_key_env: "SUBTITLE_REFINER_TEST_UNSET_KEY".to_string(),
            ..OpenAiConfig::default()
        };
        match OpenAiChatModel::new(cfg) {
            Err(ModelError::MissingApiKey(name)) => {
                assert_eq!(name, "SUBTITLE_REFINER_TEST_UNSET_KEY")
            }
            _ => panic!("expected missing key"),
        }
    }
}
