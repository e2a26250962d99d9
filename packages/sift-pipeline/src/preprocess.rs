use std::{collections::HashSet, sync::Arc};

use serde::Deserialize;

use crate::{
	BoxFuture, ChatOptions, ModelService, Result,
	event::{EventType, Next, Stage},
	state::PipelineState,
	types::QueryIntent,
};
use sift_config::Config;
use sift_domain::{cjk, fence, stopwords, text};

const INTENT_SYSTEM_PROMPT: &str = "You are a query intent classifier. Classify the user's query \
into one of: definition, howto, compare, qa, general. Respond ONLY with a JSON object \
{\"intent\": \"...\", \"confidence\": 0.0 } inside a markdown fenced block.";

#[derive(Debug, Deserialize)]
struct IntentReply {
	intent: String,
	#[serde(default)]
	confidence: f64,
}

/// Normalizes the query and classifies its intent.
pub struct Preprocess {
	config: Arc<Config>,
	models: Arc<dyn ModelService>,
}
impl Preprocess {
	pub fn new(config: Arc<Config>, models: Arc<dyn ModelService>) -> Self {
		Self { config, models }
	}

	async fn detect_intent(&self, state: &PipelineState, processed: &str) -> QueryIntent {
		let Some(model_id) = state.chat_model_id.as_deref().filter(|id| !id.trim().is_empty())
		else {
			tracing::warn!(
				stage = "IntentDetect",
				action = "skip",
				reason = "no_model",
				session_id = %state.session_id,
				"Intent detection skipped."
			);

			return QueryIntent::General;
		};
		let model = match self.models.chat_model(model_id).await {
			Ok(model) => model,
			Err(err) => {
				tracing::warn!(
					stage = "IntentDetect",
					action = "get_model_failed",
					model_id,
					error = %err,
					"Chat model lookup failed."
				);

				return QueryIntent::General;
			},
		};
		let messages = [
			serde_json::json!({ "role": "system", "content": INTENT_SYSTEM_PROMPT }),
			serde_json::json!({ "role": "user", "content": processed }),
		];
		let options = ChatOptions {
			temperature: Some(0.0),
			max_completion_tokens: Some(self.config.preprocess.intent_max_tokens),
			thinking: Some(false),
		};
		let reply = match model.chat(&messages, &options).await {
			Ok(reply) if !reply.trim().is_empty() => reply,
			Ok(_) => {
				tracing::warn!(
					stage = "IntentDetect",
					action = "model_call_failed",
					reason = "empty_reply",
					"Intent classifier returned nothing."
				);

				return QueryIntent::General;
			},
			Err(err) => {
				tracing::warn!(
					stage = "IntentDetect",
					action = "model_call_failed",
					error = %err,
					"Intent classifier call failed."
				);

				return QueryIntent::General;
			},
		};

		parse_intent(&reply)
	}
}
impl Stage for Preprocess {
	fn name(&self) -> &'static str {
		"Preprocess"
	}

	fn activation_events(&self) -> &'static [EventType] {
		&[EventType::PreprocessQuery]
	}

	fn on_event<'a>(
		&'a self,
		_event: EventType,
		state: &'a mut PipelineState,
		next: Next<'a>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let raw = if state.rewrite_query.trim().is_empty() {
				state.query.trim().to_string()
			} else {
				state.rewrite_query.trim().to_string()
			};

			if raw.is_empty() {
				return next.run(state).await;
			}

			tracing::info!(
				stage = "Preprocess",
				action = "input",
				session_id = %state.session_id,
				rewrite_query = %text::truncate_for_log(&raw),
				"Preprocessing query."
			);

			let processed = process_query(&raw, self.config.preprocess.max_cjk_tokens);
			let intent = self.detect_intent(state, &processed).await;

			tracing::info!(
				stage = "Preprocess",
				action = "output",
				session_id = %state.session_id,
				processed_query = %text::truncate_for_log(&processed),
				query_intent = intent.as_str(),
				"Query preprocessed."
			);

			state.processed_query = processed;
			state.query_intent = intent;

			next.run(state).await
		})
	}
}

/// Builds the search form of a raw query.
///
/// CJK text is reduced to its informative tokens, Latin text is lower-cased and any other script
/// is passed through cleaned. If cleaning strips everything the whitespace-collapsed input is
/// kept so the search still has something to match.
pub fn process_query(raw: &str, max_cjk_tokens: usize) -> String {
	let collapsed = text::collapse_whitespace(raw);
	let cleaned = text::clean_query(&collapsed);

	if cleaned.is_empty() {
		return collapsed;
	}
	if cjk::contains_cjk(&cleaned) {
		let tokens = informative_tokens(&cleaned, max_cjk_tokens);

		return if tokens.len() >= 2 { tokens.join(" ") } else { cleaned };
	}
	if text::is_latin_text(&cleaned) {
		return cleaned.to_lowercase();
	}

	cleaned
}

fn informative_tokens(cleaned: &str, max_tokens: usize) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut tokens = Vec::new();

	for token in cjk::segment_for_search(cleaned) {
		if tokens.len() >= max_tokens {
			break;
		}

		let token = token.trim();
		let mut chars = token.chars();
		let informative = match (chars.next(), chars.next()) {
			(None, _) => false,
			(Some(c), None) => c.is_alphanumeric(),
			_ => true,
		};

		if !informative || stopwords::is_stopword(token) {
			continue;
		}
		if seen.insert(token.to_lowercase()) {
			tokens.push(token.to_string());
		}
	}

	tokens
}

/// Maps a classifier reply onto an intent. Anything unusable yields `General`.
pub fn parse_intent(reply: &str) -> QueryIntent {
	let body = fence::extract_json_object(reply);
	let parsed: IntentReply = match serde_json::from_str(body) {
		Ok(parsed) => parsed,
		Err(err) => {
			tracing::warn!(
				stage = "IntentDetect",
				action = "parse_failed",
				body = %text::truncate_for_log(body),
				error = %err,
				"Intent reply could not be parsed."
			);

			return QueryIntent::General;
		},
	};

	tracing::info!(
		stage = "IntentDetect",
		action = "result",
		intent = %parsed.intent,
		confidence = parsed.confidence,
		"Intent classified."
	);

	QueryIntent::parse(&parsed.intent).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn latin_query_is_lower_cased_and_cleaned() {
		assert_eq!(
			process_query("  What IS   Vector Search? ", 12),
			"what is vector search".to_string()
		);
	}

	#[test]
	fn cjk_query_keeps_informative_tokens() {
		assert_eq!(process_query("如何配置向量检索？", 12), "配置 向量 检索");
	}

	#[test]
	fn cjk_token_count_is_capped() {
		assert_eq!(process_query("南京市长江大桥", 3), "南京 京市 南京市");
	}

	#[test]
	fn single_cjk_token_falls_back_to_cleaned_text() {
		assert_eq!(process_query("检索?", 12), "检索");
	}

	#[test]
	fn other_scripts_pass_through_cleaned() {
		assert_eq!(process_query("Векторный  поиск!", 12), "Векторный поиск");
	}

	#[test]
	fn punctuation_only_query_keeps_raw_text() {
		assert_eq!(process_query(" ?? ", 12), "??");
	}

	#[test]
	fn intent_reply_in_fence_is_parsed() {
		let reply = "```json\n{\"intent\": \"Definition\", \"confidence\": 0.82}\n```";

		assert_eq!(parse_intent(reply), QueryIntent::Definition);
	}

	#[test]
	fn unusable_intent_replies_default_to_general() {
		assert_eq!(parse_intent("no json"), QueryIntent::General);
		assert_eq!(parse_intent("{\"intent\": \"chitchat\"}"), QueryIntent::General);
		assert_eq!(parse_intent("{\"confidence\": 0.4}"), QueryIntent::General);
	}
}
