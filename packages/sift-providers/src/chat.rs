use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};
use sift_config::LlmProviderConfig;

/// Per-call overrides. Unset fields fall back to the provider configuration or the server default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatOptions {
	pub temperature: Option<f32>,
	pub max_completion_tokens: Option<u32>,
	/// `Some(false)` asks reasoning models to skip their thinking trace.
	pub thinking: Option<bool>,
}

pub async fn complete(
	cfg: &LlmProviderConfig,
	messages: &[Value],
	options: &ChatOptions,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = build_body(cfg, messages, options);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_content(&json)
}

fn build_body(cfg: &LlmProviderConfig, messages: &[Value], options: &ChatOptions) -> Value {
	let mut body = serde_json::json!({
		"model": cfg.model,
		"temperature": options.temperature.unwrap_or(cfg.temperature),
		"messages": messages,
	});

	if let Some(max_tokens) = options.max_completion_tokens {
		body["max_completion_tokens"] = Value::from(max_tokens);
	}
	if let Some(thinking) = options.thinking {
		body["chat_template_kwargs"] = serde_json::json!({ "enable_thinking": thinking });
	}

	body
}

fn parse_chat_content(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(str::to_string)
		.ok_or(Error::MissingChatContent)
}

#[cfg(test)]
mod tests {
	use serde_json::Map;

	use super::*;

	fn provider() -> LlmProviderConfig {
		LlmProviderConfig {
			provider_id: "chat".to_string(),
			api_base: "https://llm.example.com/v1".to_string(),
			api_key: "key".to_string(),
			path: "/chat/completions".to_string(),
			model: "chat-small".to_string(),
			temperature: 0.7,
			timeout_ms: 1_000,
			default_headers: Map::new(),
		}
	}

	#[test]
	fn parses_first_choice_content() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "role": "assistant", "content": "{\"intent\": \"qa\"}" } }
			]
		});
		let content = parse_chat_content(&json).expect("parse failed");

		assert_eq!(content, "{\"intent\": \"qa\"}");
	}

	#[test]
	fn missing_content_is_an_error() {
		let json = serde_json::json!({ "choices": [] });

		assert!(matches!(parse_chat_content(&json), Err(Error::MissingChatContent)));
	}

	#[test]
	fn options_override_provider_defaults() {
		let options = ChatOptions {
			temperature: Some(0.0),
			max_completion_tokens: Some(64),
			thinking: Some(false),
		};
		let body = build_body(&provider(), &[], &options);

		assert_eq!(body["temperature"], serde_json::json!(0.0));
		assert_eq!(body["max_completion_tokens"], serde_json::json!(64));
		assert_eq!(body["chat_template_kwargs"]["enable_thinking"], serde_json::json!(false));
	}

	#[test]
	fn provider_temperature_is_the_fallback() {
		let body = build_body(&provider(), &[], &ChatOptions::default());

		assert!(body.get("max_completion_tokens").is_none());
		assert!((body["temperature"].as_f64().unwrap_or_default() - 0.7).abs() < 1e-6);
	}
}
