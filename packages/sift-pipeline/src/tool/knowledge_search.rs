use std::{
	collections::{BTreeMap, HashMap},
	fmt::Write as _,
	sync::Arc,
};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
	BoxFuture, ChatModel, Error, KnowledgeBaseService, RerankModel, Result,
	rerank::{composite, mmr, passage},
	search::{
		dedup,
		knowledge::{self, SearchJob},
		normalize,
	},
	tool::{self, Tool, ToolResult, llm_rerank},
	types::{KnowledgeBaseKind, MatchType, RetrievalHit, SearchParams},
};
use sift_config::Config;
use sift_domain::text;

const STAGE: &str = "KnowledgeSearchTool";
const DESCRIPTION: &str = "Semantic search over knowledge base chunks. Finds content by meaning \
rather than exact wording, for conceptual explanations, topic overviews, mechanisms, best \
practices and how or why questions. Pass 1-5 short, well-formed semantic questions or statements \
in `queries`; avoid keyword lists, raw user messages and long paragraphs. Use another tool for \
literal lookups of names, strings or error codes. `knowledge_base_ids` optionally narrows the \
search. Returns chunks ranked by relevance, reranked when a model is available.";

/// A tool hit with the query and knowledge base kind that produced it.
#[derive(Clone, Debug)]
pub struct ToolHit {
	pub hit: RetrievalHit,
	pub source_query: String,
	pub knowledge_base_kind: KnowledgeBaseKind,
}
impl AsRef<RetrievalHit> for ToolHit {
	fn as_ref(&self) -> &RetrievalHit {
		&self.hit
	}
}
impl AsMut<RetrievalHit> for ToolHit {
	fn as_mut(&mut self) -> &mut RetrievalHit {
		&mut self.hit
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KnowledgeSearchArgs {
	queries: Vec<String>,
	knowledge_base_ids: Vec<String>,
}

/// The `knowledge_search` agent tool.
pub struct KnowledgeSearchTool {
	config: Arc<Config>,
	knowledge_bases: Arc<dyn KnowledgeBaseService>,
	allowed_knowledge_base_ids: Vec<String>,
	rerank_model: Option<Arc<dyn RerankModel>>,
	chat_model: Option<Arc<dyn ChatModel>>,
}
impl KnowledgeSearchTool {
	pub fn new(
		config: Arc<Config>,
		knowledge_bases: Arc<dyn KnowledgeBaseService>,
		allowed_knowledge_base_ids: Vec<String>,
	) -> Self {
		Self {
			config,
			knowledge_bases,
			allowed_knowledge_base_ids,
			rerank_model: None,
			chat_model: None,
		}
	}

	pub fn with_rerank_model(mut self, model: Arc<dyn RerankModel>) -> Self {
		self.rerank_model = Some(model);

		self
	}

	/// Chat model used for batch reranking when no rerank model is set or it comes back empty.
	pub fn with_chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
		self.chat_model = Some(model);

		self
	}

	/// Runs the full search flow and returns the final ranked hits.
	pub async fn search(
		&self,
		queries: &[String],
		knowledge_base_ids: &[String],
	) -> Vec<ToolHit> {
		let cfg = &self.config.tool;
		let kinds = self.knowledge_base_kinds(knowledge_base_ids).await;
		let mut hits = self.concurrent_search(queries, knowledge_base_ids, &kinds).await;

		tracing::info!(
			stage = STAGE,
			action = "search_done",
			raw_results = hits.len(),
			"Concurrent search finished."
		);

		if let Some(bounds) =
			normalize::normalize_keyword_scores(&mut hits, &self.config.normalization)
		{
			tracing::info!(
				stage = STAGE,
				action = "normalize_keyword_scores",
				count = bounds.count,
				normalize_min = bounds.lower,
				normalize_max = bounds.upper,
				"Keyword scores normalized."
			);
		}

		let filtered: Vec<ToolHit> = hits
			.into_iter()
			.filter(|hit| hit.hit.score >= self.threshold_for(hit.hit.match_type))
			.collect();
		let candidates = dedup::dedup_best_score(filtered);
		let rerank_query = queries.join(" ");
		let reranked = self.rerank(&rerank_query, candidates).await;
		let selected = if reranked.is_empty() {
			reranked
		} else {
			let k = reranked.len().min(cfg.top_k.max(1));
			let outcome = mmr::select(reranked, k, cfg.mmr_lambda);

			tracing::info!(
				stage = STAGE,
				action = "mmr_done",
				selected = outcome.selected.len(),
				k,
				avg_redundancy = %format!("{:.4}", outcome.average_redundancy),
				"Diverse selection finished."
			);

			outcome.selected
		};
		let above_floor: Vec<ToolHit> =
			selected.into_iter().filter(|hit| hit.hit.score >= cfg.min_score).collect();
		let mut results = dedup::dedup_best_score(above_floor);

		results.sort_by(|lhs, rhs| {
			rhs.hit
				.score
				.total_cmp(&lhs.hit.score)
				.then_with(|| lhs.hit.knowledge_id.cmp(&rhs.hit.knowledge_id))
		});

		for (rank, result) in results.iter().take(5).enumerate() {
			tracing::info!(
				stage = STAGE,
				action = "top_result",
				rank = rank + 1,
				score = result.hit.score,
				knowledge_id = %result.hit.knowledge_id,
				chunk_id = %result.hit.id,
				"Final result."
			);
		}

		results
	}

	async fn knowledge_base_kinds(
		&self,
		knowledge_base_ids: &[String],
	) -> HashMap<String, KnowledgeBaseKind> {
		let mut kinds = HashMap::with_capacity(knowledge_base_ids.len());

		for id in knowledge_base_ids {
			if kinds.contains_key(id) {
				continue;
			}

			match self.knowledge_bases.knowledge_base(id).await {
				Ok(kb) => {
					kinds.insert(id.clone(), kb.kind);
				},
				Err(err) => {
					tracing::warn!(
						stage = STAGE,
						action = "kb_lookup_failed",
						kb_id = %id,
						error = %err,
						"Knowledge base lookup failed; treating it as a document base."
					);
				},
			}
		}

		kinds
	}

	async fn concurrent_search(
		&self,
		queries: &[String],
		knowledge_base_ids: &[String],
		kinds: &HashMap<String, KnowledgeBaseKind>,
	) -> Vec<ToolHit> {
		let cfg = &self.config.tool;
		let jobs: Vec<SearchJob> = queries
			.iter()
			.flat_map(|query| {
				let params = SearchParams {
					query_text: query.clone(),
					match_count: cfg.top_k,
					vector_threshold: cfg.vector_threshold,
					keyword_threshold: cfg.keyword_threshold,
					..Default::default()
				};

				knowledge::jobs_for_query(knowledge_base_ids, "tool", &params)
			})
			.collect();
		let found = knowledge::fan_out(&self.knowledge_bases, jobs, None, STAGE).await;

		found
			.into_iter()
			.flat_map(|(job, hits)| {
				let kind = kinds.get(&job.knowledge_base_id).copied().unwrap_or_default();
				let source_query = job.params.query_text;

				hits.into_iter().map(move |hit| ToolHit {
					hit,
					source_query: source_query.clone(),
					knowledge_base_kind: kind,
				})
			})
			.collect()
	}

	fn threshold_for(&self, match_type: MatchType) -> f64 {
		let cfg = &self.config.tool;
		let lower = cfg.vector_threshold.min(cfg.keyword_threshold);

		match match_type {
			MatchType::Embedding => cfg.vector_threshold,
			MatchType::Keywords => cfg.keyword_threshold,
			MatchType::History => (lower - self.config.rerank.history_threshold_relief)
				.max(self.config.rerank.history_threshold_floor),
			MatchType::WebSearch | MatchType::Graph => lower,
		}
	}

	/// Reranks non-FAQ hits and recombines them with FAQ hits by score.
	///
	/// FAQ hits keep their retrieval score. The rerank model is tried first; an error or an empty
	/// answer falls back to chat-model batches, and with neither the scores stay as retrieved.
	async fn rerank(&self, query: &str, hits: Vec<ToolHit>) -> Vec<ToolHit> {
		if hits.is_empty()
			|| query.trim().is_empty()
			|| (self.rerank_model.is_none() && self.chat_model.is_none())
		{
			return hits;
		}

		let (faq, others): (Vec<ToolHit>, Vec<ToolHit>) =
			hits.into_iter().partition(|hit| hit.knowledge_base_kind == KnowledgeBaseKind::Faq);

		if others.is_empty() {
			return faq;
		}

		tracing::info!(
			stage = STAGE,
			action = "rerank",
			candidates = others.len(),
			faq_exempt = faq.len(),
			"Reranking non-FAQ hits."
		);

		let passages: Vec<String> =
			others.iter().map(|hit| passage::enriched_passage(&hit.hit)).collect();
		let by_model = self.rerank_with_model(query, &others, &passages).await;
		let mut rescored = match by_model {
			Some(rescored) => rescored,
			None => self.rerank_with_chat(query, others, &passages).await,
		};
		let composite_cfg = &self.config.rerank.composite;

		for (hit, base_score) in &mut rescored {
			let model_score = hit.hit.score;

			hit.hit.score =
				composite::composite_score(&hit.hit, model_score, *base_score, None, composite_cfg);
		}

		let mut combined: Vec<ToolHit> = faq;

		combined.extend(rescored.into_iter().map(|(hit, _)| hit));
		combined.sort_by(|lhs, rhs| rhs.hit.score.total_cmp(&lhs.hit.score));

		combined
	}

	/// Pairs each hit the rerank model returned with its pre-rerank score. `None` means the
	/// model is missing, failed or returned nothing.
	async fn rerank_with_model(
		&self,
		query: &str,
		hits: &[ToolHit],
		passages: &[String],
	) -> Option<Vec<(ToolHit, f64)>> {
		let model = self.rerank_model.as_ref()?;
		let ranked = match model.rerank(query, passages).await {
			Ok(ranked) => ranked,
			Err(err) => {
				tracing::warn!(
					stage = STAGE,
					action = "rerank_model_failed",
					error = %err,
					"Rerank model failed; falling back."
				);

				return None;
			},
		};
		let rescored: Vec<(ToolHit, f64)> = ranked
			.iter()
			.filter_map(|result| {
				let mut hit = hits.get(result.index)?.clone();
				let base_score = hit.hit.score;

				hit.hit.score = result.relevance_score;

				Some((hit, base_score))
			})
			.collect();

		if rescored.is_empty() {
			tracing::warn!(
				stage = STAGE,
				action = "rerank_model_empty",
				"Rerank model returned no results; falling back."
			);

			return None;
		}

		Some(rescored)
	}

	async fn rerank_with_chat(
		&self,
		query: &str,
		hits: Vec<ToolHit>,
		passages: &[String],
	) -> Vec<(ToolHit, f64)> {
		let base_scores: Vec<f64> = hits.iter().map(|hit| hit.hit.score).collect();
		let Some(chat) = self.chat_model.as_ref() else {
			return hits.into_iter().zip(base_scores).collect();
		};
		let scores = llm_rerank::rerank_in_batches(
			chat.as_ref(),
			query,
			passages,
			&base_scores,
			&self.config.tool,
		)
		.await;

		hits.into_iter()
			.zip(scores)
			.zip(base_scores)
			.map(|((mut hit, score), base_score)| {
				hit.hit.score = score;

				(hit, base_score)
			})
			.collect()
	}
}
impl Tool for KnowledgeSearchTool {
	fn name(&self) -> &'static str {
		"knowledge_search"
	}

	fn description(&self) -> &'static str {
		DESCRIPTION
	}

	fn parameters(&self) -> Value {
		json!({
			"type": "object",
			"required": ["queries"],
			"properties": {
				"queries": {
					"type": "array",
					"description": "REQUIRED: 1-5 semantic questions or topics.",
					"items": { "type": "string" },
					"minItems": 1,
					"maxItems": self.config.tool.max_queries
				},
				"knowledge_base_ids": {
					"type": "array",
					"description": "Optional knowledge base ids to search.",
					"items": { "type": "string" },
					"minItems": 0,
					"maxItems": 10
				}
			}
		})
	}

	fn execute<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<ToolResult>> {
		Box::pin(async move {
			let args: KnowledgeSearchArgs = tool::parse_args(self.name(), args)?;
			let mut queries = tool::trimmed_non_empty(args.queries);

			if queries.is_empty() {
				return Err(Error::InvalidRequest {
					message: "queries must contain at least one non-empty query.".to_string(),
				});
			}
			if queries.len() > self.config.tool.max_queries {
				tracing::warn!(
					stage = STAGE,
					action = "queries_truncated",
					provided = queries.len(),
					max = self.config.tool.max_queries,
					"Too many queries; extra ones are ignored."
				);

				queries.truncate(self.config.tool.max_queries);
			}

			let mut knowledge_base_ids = tool::trimmed_non_empty(args.knowledge_base_ids);

			if knowledge_base_ids.is_empty() {
				knowledge_base_ids =
					tool::trimmed_non_empty(self.allowed_knowledge_base_ids.clone());
			}
			if knowledge_base_ids.is_empty() {
				return Err(Error::InvalidRequest {
					message: "No knowledge base was given and none is allowed.".to_string(),
				});
			}

			tracing::info!(
				stage = STAGE,
				action = "input",
				queries = ?queries,
				kb_ids = %knowledge_base_ids.join(","),
				top_k = self.config.tool.top_k,
				vector_threshold = self.config.tool.vector_threshold,
				keyword_threshold = self.config.tool.keyword_threshold,
				min_score = self.config.tool.min_score,
				"Knowledge search started."
			);

			let results = self.search(&queries, &knowledge_base_ids).await;

			Ok(format_output(&results, &knowledge_base_ids, &queries))
		})
	}
}

/// Renders results as a text report grouped by source document plus structured display data.
pub fn format_output(
	results: &[ToolHit],
	knowledge_base_ids: &[String],
	queries: &[String],
) -> ToolResult {
	if results.is_empty() {
		let output = format!(
			"No relevant content found in {} knowledge base(s).\n\n\
=== Next Steps ===\n\
- Do not answer from training data or general knowledge.\n\
- If web search is available, use it to look for the information.\n\
- Otherwise state that the knowledge base holds nothing relevant.\n\
- Never fabricate or infer answers; use only retrieved content.\n",
			knowledge_base_ids.len()
		);

		return ToolResult {
			success: true,
			output,
			data: json!({
				"knowledge_base_ids": knowledge_base_ids,
				"results": [],
				"count": 0,
				"queries": queries,
			}),
		};
	}

	let mut kb_counts: BTreeMap<&str, usize> = BTreeMap::new();

	for result in results {
		*kb_counts.entry(result.hit.knowledge_id.as_str()).or_default() += 1;
	}

	let mut output =
		format!("=== Search Results ===\nFound {} relevant results\n\n", results.len());

	output.push_str("Knowledge Base Coverage:\n");

	for (knowledge_id, count) in &kb_counts {
		let _ = writeln!(output, "  - {knowledge_id}: {count} results");
	}

	output.push_str("\n=== Detailed Results ===\n\n");

	let mut formatted = Vec::with_capacity(results.len());
	let mut current_knowledge: Option<&str> = None;

	for (idx, result) in results.iter().enumerate() {
		let hit = &result.hit;

		if current_knowledge != Some(hit.knowledge_id.as_str()) {
			current_knowledge = Some(hit.knowledge_id.as_str());

			if idx > 0 {
				output.push('\n');
			}

			let _ = writeln!(output, "[Source Document: {}]", hit.knowledge_title);
		}

		let _ = write!(
			output,
			"\nResult #{}:\n  [chunk_id: {}][chunk_index: {}]\nContent: {}\n",
			idx + 1,
			hit.id,
			hit.chunk_index,
			hit.content
		);

		formatted.push(json!({
			"result_index": idx + 1,
			"chunk_id": hit.id,
			"content": hit.content,
			"knowledge_id": hit.knowledge_id,
			"knowledge_title": hit.knowledge_title,
			"match_type": hit.match_type.as_str(),
			"source_query": result.source_query,
			"query_type": "hybrid",
			"knowledge_base_type": result.knowledge_base_kind.as_str(),
		}));
	}

	tracing::debug!(
		stage = STAGE,
		action = "output",
		count = formatted.len(),
		preview = %text::truncate_for_log(&output),
		"Knowledge search output ready."
	);

	ToolResult {
		success: true,
		output,
		data: json!({
			"knowledge_base_ids": knowledge_base_ids,
			"results": formatted,
			"count": results.len(),
			"kb_counts": kb_counts,
			"queries": queries,
			"display_type": "search_results",
		}),
	}
}
