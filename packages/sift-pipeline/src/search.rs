pub mod dedup;
pub mod expansion;
pub mod history;
pub mod knowledge;
pub mod normalize;
pub mod web;

use std::sync::Arc;

use crate::{
	BoxFuture, Error, Result, Services,
	event::{EventType, Next, Stage},
	search::knowledge::SearchJob,
	state::PipelineState,
	types::{RetrievalHit, SearchParams},
};
use sift_config::Config;
use sift_domain::text;

/// Fans the turn out over knowledge bases, web search and history, then merges the candidates.
pub struct Search {
	config: Arc<Config>,
	services: Services,
}
impl Search {
	pub fn new(config: Arc<Config>, services: Services) -> Self {
		Self { config, services }
	}

	/// Rewrite query round first, then a processed query round when the two differ.
	async fn search_knowledge_bases(
		&self,
		knowledge_base_ids: &[String],
		state: &PipelineState,
	) -> Vec<RetrievalHit> {
		let base = SearchParams {
			query_text: state.rewrite_query.trim().to_string(),
			match_count: state.embedding_top_k,
			vector_threshold: state.vector_threshold,
			keyword_threshold: state.keyword_threshold,
			..Default::default()
		};
		let mut hits = Vec::new();

		for query in state.search_queries() {
			let query_kind = if query == base.query_text { "rewrite" } else { "processed" };
			let params = SearchParams { query_text: query, ..base.clone() };
			let jobs = knowledge::jobs_for_query(knowledge_base_ids, query_kind, &params);
			let found =
				knowledge::fan_out(&self.services.knowledge_bases, jobs, None, self.name()).await;

			hits.extend(knowledge::merge_hits(found));
		}

		tracing::info!(
			stage = "Search",
			action = "kb_result_summary",
			total_hits = hits.len(),
			"Knowledge base rounds finished."
		);

		hits
	}

	async fn expand(
		&self,
		knowledge_base_ids: &[String],
		state: &PipelineState,
	) -> Vec<RetrievalHit> {
		let cfg = &self.config.expansion;

		tracing::info!(
			stage = "Search",
			action = "recall_low",
			current = state.search_result.len(),
			threshold = expansion::recall_floor(state.embedding_top_k),
			"Recall is low; expanding the query."
		);

		let variants =
			expansion::generate_variants(self.services.models.as_ref(), state, cfg).await;

		if variants.is_empty() {
			return Vec::new();
		}

		let jobs: Vec<SearchJob> =
			expansion::expansion_jobs(&variants, knowledge_base_ids, state, cfg);
		let limit = expansion::concurrency_limit(jobs.len(), cfg.max_concurrency);

		tracing::info!(
			stage = "Search",
			action = "expansion_concurrency",
			variants = variants.len(),
			jobs = jobs.len(),
			cap = limit,
			"Running expansion searches."
		);

		let found =
			knowledge::fan_out(&self.services.knowledge_bases, jobs, Some(limit), self.name())
				.await;

		for (job, hits) in &found {
			if !hits.is_empty() {
				tracing::info!(
					stage = "Search",
					action = "expansion_hits",
					kb_id = %job.knowledge_base_id,
					query = %text::truncate_for_log(&job.params.query_text),
					hits = hits.len(),
					"Expansion variant matched."
				);
			}
		}

		let mut hits = knowledge::merge_hits(found);

		if let Some(bounds) =
			normalize::normalize_keyword_scores(&mut hits, &self.config.normalization)
		{
			tracing::info!(
				stage = "Search",
				action = "normalize_expansion_scores",
				count = bounds.count,
				normalize_min = bounds.lower,
				normalize_max = bounds.upper,
				"Expansion keyword scores normalized."
			);
		}

		hits
	}
}
impl Stage for Search {
	fn name(&self) -> &'static str {
		"Search"
	}

	fn activation_events(&self) -> &'static [EventType] {
		&[EventType::ChunkSearch]
	}

	fn on_event<'a>(
		&'a self,
		_event: EventType,
		state: &'a mut PipelineState,
		next: Next<'a>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let knowledge_base_ids = state.target_knowledge_base_ids();

			if knowledge_base_ids.is_empty() {
				tracing::error!(
					stage = "Search",
					action = "kb_not_found",
					session_id = %state.session_id,
					"No knowledge base to search."
				);

				return Err(Error::InvalidRequest {
					message: "At least one knowledge base id is required.".to_string(),
				});
			}

			tracing::info!(
				stage = "Search",
				action = "input",
				session_id = %state.session_id,
				rewrite_query = %text::truncate_for_log(&state.rewrite_query),
				processed_query = %text::truncate_for_log(&state.processed_query),
				kb_ids = %knowledge_base_ids.join(","),
				web_enabled = state.web_search_enabled,
				embedding_top_k = state.embedding_top_k,
				vector_threshold = state.vector_threshold,
				keyword_threshold = state.keyword_threshold,
				"Searching."
			);

			let (mut kb_hits, web_hits) = {
				let view = &*state;

				tokio::join!(
					self.search_knowledge_bases(&knowledge_base_ids, view),
					web::search_web(&self.services, view, self.config.web.default_score),
				)
			};

			if let Some(bounds) =
				normalize::normalize_keyword_scores(&mut kb_hits, &self.config.normalization)
			{
				tracing::info!(
					stage = "Search",
					action = "normalize_keyword_scores",
					count = bounds.count,
					raw_min = bounds.raw_min,
					raw_max = bounds.raw_max,
					normalize_min = bounds.lower,
					normalize_max = bounds.upper,
					"Keyword scores normalized."
				);
			}

			kb_hits.extend(web_hits);

			state.search_result = kb_hits;

			if expansion::needs_expansion(
				state.enable_query_expansion,
				state.search_result.len(),
				state.embedding_top_k,
			) {
				let expanded = self.expand(&knowledge_base_ids, state).await;

				if !expanded.is_empty() {
					tracing::info!(
						stage = "Search",
						action = "expansion_done",
						added = expanded.len(),
						"Expansion hits added."
					);

					state.search_result.extend(expanded);
				}
			}

			let history_hits = history::last_turn_references(&state.history);

			if !history_hits.is_empty() {
				tracing::info!(
					stage = "Search",
					action = "history_hits",
					session_id = %state.session_id,
					history_hits = history_hits.len(),
					"History references added."
				);

				state.search_result.extend(history_hits);
			}

			let before = state.search_result.len();

			state.search_result = dedup::dedup_first_seen(std::mem::take(&mut state.search_result));

			tracing::info!(
				stage = "Search",
				action = "dedup_summary",
				before,
				after = state.search_result.len(),
				"Candidates deduplicated."
			);

			if state.search_result.is_empty() {
				tracing::warn!(
					stage = "Search",
					action = "output",
					session_id = %state.session_id,
					result_count = 0,
					"Search found nothing."
				);

				return Err(Error::NothingFound { stage: "search" });
			}

			tracing::info!(
				stage = "Search",
				action = "output",
				session_id = %state.session_id,
				result_count = state.search_result.len(),
				"Search finished."
			);

			next.run(state).await
		})
	}
}
