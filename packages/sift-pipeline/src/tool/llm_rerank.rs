use std::fmt::Write as _;

use serde_json::json;

use crate::{ChatModel, ChatOptions, rerank::passage};
use sift_config::Tool as ToolConfig;

const RERANK_SYSTEM_PROMPT: &str = "You are a professional search result reranking expert \
specializing in information retrieval. You evaluate how well retrieved passages match user \
queries in search scenarios. Focus on retrieval relevance: whether the passage answers the query, \
provides needed information, and matches the user's information need. Always respond with scores \
only, no explanations.";
const PASSAGE_SEPARATOR: &str = "─────────────────────────────────────────────────────────────";

/// Scores `passages` against `query` with the chat model, one batch at a time.
///
/// The result has one score per passage. A batch whose call fails or whose reply carries no
/// score keeps the matching entries of `current_scores`.
pub async fn rerank_in_batches(
	chat: &dyn ChatModel,
	query: &str,
	passages: &[String],
	current_scores: &[f64],
	cfg: &ToolConfig,
) -> Vec<f64> {
	let mut scores = current_scores.to_vec();
	let batch_size = cfg.rerank_batch_size.max(1);

	scores.resize(passages.len(), 0.0);

	for (batch_idx, batch) in passages.chunks(batch_size).enumerate() {
		let start = batch_idx * batch_size;
		let end = start + batch.len();
		let messages = [
			json!({ "role": "system", "content": RERANK_SYSTEM_PROMPT }),
			json!({ "role": "user", "content": build_prompt(query, batch, cfg.max_passage_chars) }),
		];
		let options = ChatOptions {
			temperature: Some(0.1),
			max_completion_tokens: Some((batch.len() * 20 + 100) as u32),
			thinking: None,
		};
		let reply = match chat.chat(&messages, &options).await {
			Ok(reply) => reply,
			Err(err) => {
				tracing::warn!(
					stage = "KnowledgeSearchTool",
					action = "llm_rerank_batch_failed",
					batch_start = start + 1,
					batch_end = end,
					error = %err,
					"Rerank batch failed; keeping original scores."
				);

				continue;
			},
		};

		tracing::debug!(
			stage = "KnowledgeSearchTool",
			action = "llm_rerank_batch_reply",
			batch_start = start + 1,
			batch_end = end,
			reply = %sift_domain::text::truncate_for_log(&reply),
			"Rerank batch answered."
		);

		let Some(batch_scores) = parse_scores(&reply, batch.len()) else {
			tracing::warn!(
				stage = "KnowledgeSearchTool",
				action = "llm_rerank_parse_failed",
				batch_start = start + 1,
				batch_end = end,
				"Rerank batch reply had no scores; keeping original scores."
			);

			continue;
		};

		scores[start..end].copy_from_slice(&batch_scores);
	}

	scores
}

fn build_prompt(query: &str, batch: &[String], max_passage_chars: usize) -> String {
	let mut passages = String::new();

	for (idx, content) in batch.iter().enumerate() {
		if idx > 0 {
			passages.push('\n');
		}

		let _ = write!(
			passages,
			"{PASSAGE_SEPARATOR}\nPassage {}:\n{PASSAGE_SEPARATOR}\n{}\n",
			idx + 1,
			passage::truncate_passage(content, max_passage_chars)
		);
	}

	let count = batch.len();

	format!(
		"You are a search result reranking expert. Your task is to evaluate how well each \
retrieved passage matches the user's search query and information need.

User Query: {query}

Your task: Rerank these search results by evaluating their retrieval relevance - how well each \
passage answers or relates to the query.

Scoring Criteria (0.0 to 1.0):
- 1.0 (0.9-1.0): Directly answers the query, contains key information needed, highly relevant
- 0.8 (0.7-0.8): Strongly related, provides substantial relevant information
- 0.6 (0.5-0.6): Moderately related, contains some relevant information but may be incomplete
- 0.4 (0.3-0.4): Weakly related, minimal relevance to the query
- 0.2 (0.1-0.2): Barely related, mostly irrelevant
- 0.0 (0.0): Completely irrelevant, no relation to the query

Evaluation Factors:
1. Query-Answer Match: Does the passage directly address what the user is asking?
2. Information Completeness: Does it provide sufficient information to answer the query?
3. Semantic Relevance: Does the content semantically relate to the query intent?
4. Key Term Coverage: Does it cover important terms/concepts from the query?
5. Information Accuracy: Is the information accurate and trustworthy?

Retrieved Passages:
{passages}

IMPORTANT: Return exactly {count} scores, one per line, in this exact format:
Passage 1: X.XX
Passage 2: X.XX
Passage 3: X.XX
...
Passage {count}: X.XX

Output only the scores, no explanations or additional text."
	)
}

/// Reads one score per line from a reply shaped like `Passage N: X.XX`.
///
/// The text after the last `:` is used when present. Scores are clamped to `[0, 1]`, a short
/// reply is padded with its last score and a long one is cut. `None` when nothing parses.
pub fn parse_scores(reply: &str, expected: usize) -> Option<Vec<f64>> {
	let mut scores: Vec<f64> = reply
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.filter_map(|line| {
			let raw = line.rsplit_once(':').map_or(line, |(_, tail)| tail).trim();
			let raw = raw.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');

			raw.parse::<f64>().ok()
		})
		.filter(|score| score.is_finite())
		.map(|score| score.clamp(0.0, 1.0))
		.collect();
	let last = *scores.last()?;

	scores.resize(expected, last);

	Some(scores)
}
