use std::collections::HashSet;

use crate::{
	ChatOptions, ModelService,
	search::knowledge::SearchJob,
	state::PipelineState,
	types::SearchParams,
};
use sift_config::Expansion;
use sift_domain::fence;

const EXPANSION_SYSTEM_PROMPT: &str = "Generate up to 5 diverse paraphrases or keyword variants \
for the user query to improve keyword-based search recall. Respond ONLY with a JSON array of \
strings inside a fenced code block.";

/// True when expansion is enabled and the turn found fewer than half of `embedding_top_k` hits.
pub fn needs_expansion(enabled: bool, current: usize, embedding_top_k: usize) -> bool {
	enabled && current < recall_floor(embedding_top_k)
}

pub fn recall_floor(embedding_top_k: usize) -> usize {
	(embedding_top_k / 2).max(1)
}

/// Asks the chat model for query variants. Any failure means no expansion.
pub async fn generate_variants(
	models: &dyn ModelService,
	state: &PipelineState,
	cfg: &Expansion,
) -> Vec<String> {
	let Some(model_id) = state.chat_model_id.as_deref().filter(|id| !id.trim().is_empty())
	else {
		tracing::warn!(
			stage = "Search",
			action = "expansion_skip",
			reason = "no_model",
			"Query expansion skipped."
		);

		return Vec::new();
	};
	let model = match models.chat_model(model_id).await {
		Ok(model) => model,
		Err(err) => {
			tracing::warn!(
				stage = "Search",
				action = "expansion_get_model_failed",
				error = %err,
				"Chat model lookup failed; skipping expansion."
			);

			return Vec::new();
		},
	};
	let messages = [
		serde_json::json!({ "role": "system", "content": EXPANSION_SYSTEM_PROMPT }),
		serde_json::json!({ "role": "user", "content": state.rewrite_query }),
	];
	let options = ChatOptions {
		temperature: Some(0.2),
		max_completion_tokens: Some(cfg.max_completion_tokens),
		thinking: Some(false),
	};
	let reply = match model.chat(&messages, &options).await {
		Ok(reply) if !reply.trim().is_empty() => reply,
		Ok(_) => {
			tracing::warn!(
				stage = "Search",
				action = "expansion_model_call_failed",
				reason = "empty_reply",
				"Expansion model returned nothing."
			);

			return Vec::new();
		},
		Err(err) => {
			tracing::warn!(
				stage = "Search",
				action = "expansion_model_call_failed",
				error = %err,
				"Expansion model call failed."
			);

			return Vec::new();
		},
	};
	let variants = parse_variants(
		&reply,
		&[&state.query, &state.rewrite_query, &state.processed_query],
		cfg.max_variants,
	);

	tracing::info!(
		stage = "Search",
		action = "expansion_result",
		variants = variants.len(),
		"Query variants generated."
	);

	variants
}

/// Extracts distinct variants from a model reply.
///
/// A reply without a usable JSON array is read line by line. Variants that repeat one of the
/// `known` query forms or an earlier variant, ignoring case, are dropped.
pub fn parse_variants(reply: &str, known: &[&str], max_variants: usize) -> Vec<String> {
	let candidates = match fence::parse_string_array(reply) {
		Some(items) if !items.is_empty() => items,
		_ => reply
			.lines()
			.map(str::trim)
			.filter(|line| !line.is_empty())
			.map(str::to_string)
			.collect(),
	};
	let mut seen: HashSet<String> = known
		.iter()
		.map(|query| query.trim())
		.filter(|query| !query.is_empty())
		.map(str::to_lowercase)
		.collect();
	let mut variants = Vec::new();

	for candidate in candidates {
		if variants.len() >= max_variants {
			break;
		}

		let candidate = candidate.trim();

		if candidate.is_empty() || !seen.insert(candidate.to_lowercase()) {
			continue;
		}

		variants.push(candidate.to_string());
	}

	variants
}

/// Keyword-only search parameters for one variant.
pub fn expansion_params(query: &str, state: &PipelineState, cfg: &Expansion) -> SearchParams {
	let multiplier = cfg.match_count_multiplier;

	SearchParams {
		query_text: query.to_string(),
		match_count: (state.embedding_top_k * multiplier).max(state.rerank_top_k * multiplier),
		vector_threshold: state.vector_threshold,
		keyword_threshold: state.keyword_threshold * cfg.keyword_threshold_ratio,
		disable_vector_match: true,
		disable_keywords_match: false,
	}
}

/// One job per (variant, knowledge base) pair.
pub fn expansion_jobs(
	variants: &[String],
	knowledge_base_ids: &[String],
	state: &PipelineState,
	cfg: &Expansion,
) -> Vec<SearchJob> {
	variants
		.iter()
		.flat_map(|variant| {
			let params = expansion_params(variant, state, cfg);

			knowledge_base_ids
				.iter()
				.map(move |id| SearchJob::new(id, "expansion", params.clone()))
		})
		.collect()
}

/// Concurrent expansion searches: never more than the configured cap, never fewer than one.
pub fn concurrency_limit(jobs: usize, max_concurrency: usize) -> usize {
	jobs.min(max_concurrency).max(1)
}
