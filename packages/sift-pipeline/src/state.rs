use crate::types::{HistoryTurn, QueryIntent, RetrievalHit, WebSearchConfig};
use sift_config::Retrieval;

/// Transient per-turn state. Each stage mutates it in place; nothing here outlives the turn.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
	pub session_id: String,
	pub query: String,
	pub rewrite_query: String,
	pub processed_query: String,
	pub query_intent: QueryIntent,
	pub knowledge_base_ids: Vec<String>,
	/// Single knowledge base used when `knowledge_base_ids` is empty.
	pub knowledge_base_id: Option<String>,
	pub vector_threshold: f64,
	pub keyword_threshold: f64,
	pub rerank_threshold: f64,
	pub embedding_top_k: usize,
	pub rerank_top_k: usize,
	pub enable_query_expansion: bool,
	pub chat_model_id: Option<String>,
	pub rerank_model_id: Option<String>,
	pub web_search_enabled: bool,
	pub web_search_config: Option<WebSearchConfig>,
	pub history: Vec<HistoryTurn>,
	pub search_result: Vec<RetrievalHit>,
	pub rerank_result: Vec<RetrievalHit>,
}
impl PipelineState {
	pub fn new(
		session_id: impl Into<String>,
		query: impl Into<String>,
		retrieval: &Retrieval,
	) -> Self {
		let query = query.into();

		Self {
			session_id: session_id.into(),
			rewrite_query: query.clone(),
			processed_query: query.clone(),
			query,
			vector_threshold: retrieval.vector_threshold,
			keyword_threshold: retrieval.keyword_threshold,
			rerank_threshold: retrieval.rerank_threshold,
			embedding_top_k: retrieval.embedding_top_k,
			rerank_top_k: retrieval.rerank_top_k,
			enable_query_expansion: retrieval.enable_query_expansion,
			..Default::default()
		}
	}

	pub fn target_knowledge_base_ids(&self) -> Vec<String> {
		let ids: Vec<String> = self
			.knowledge_base_ids
			.iter()
			.map(|id| id.trim())
			.filter(|id| !id.is_empty())
			.map(str::to_string)
			.collect();

		if !ids.is_empty() {
			return ids;
		}

		self.knowledge_base_id
			.as_deref()
			.map(str::trim)
			.filter(|id| !id.is_empty())
			.map(|id| vec![id.to_string()])
			.unwrap_or_default()
	}

	/// Rewrite query first, then the processed query when it differs.
	pub fn search_queries(&self) -> Vec<String> {
		let rewrite = self.rewrite_query.trim();
		let processed = self.processed_query.trim();
		let mut queries = Vec::with_capacity(2);

		if !rewrite.is_empty() {
			queries.push(rewrite.to_string());
		}
		if !processed.is_empty() && processed != rewrite {
			queries.push(processed.to_string());
		}

		queries
	}
}
