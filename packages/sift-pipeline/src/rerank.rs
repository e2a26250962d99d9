pub mod composite;
pub mod mmr;
pub mod passage;

use std::sync::Arc;

use crate::{
	BoxFuture, Error, ModelService, RankResult, RerankModel, Result,
	event::{EventType, Next, Stage},
	state::PipelineState,
	types::{MatchType, RetrievalHit},
};
use sift_config::{Config, Rerank as RerankConfig};
use sift_domain::text;

/// Re-scores search candidates with a rerank model, fuses the scores and picks a diverse top-k.
pub struct Rerank {
	config: Arc<Config>,
	models: Arc<dyn ModelService>,
}
impl Rerank {
	pub fn new(config: Arc<Config>, models: Arc<dyn ModelService>) -> Self {
		Self { config, models }
	}

	/// Tries the rewrite, processed and raw query in turn until one keeps a result.
	async fn rerank_with_fallbacks(
		&self,
		model: &dyn RerankModel,
		state: &PipelineState,
		passages: &[String],
	) -> Vec<RankResult> {
		let mut tried: Vec<&str> = Vec::with_capacity(3);

		for query in [&state.rewrite_query, &state.processed_query, &state.query] {
			let query = query.trim();

			if query.is_empty() || tried.contains(&query) {
				continue;
			}

			tried.push(query);

			let kept = self.rerank_attempt(model, state, query, passages).await;

			if !kept.is_empty() {
				return kept;
			}
		}

		Vec::new()
	}

	async fn rerank_attempt(
		&self,
		model: &dyn RerankModel,
		state: &PipelineState,
		query: &str,
		passages: &[String],
	) -> Vec<RankResult> {
		tracing::info!(
			stage = "Rerank",
			action = "model_call",
			query_variant = %text::truncate_for_log(query),
			passages = passages.len(),
			"Calling rerank model."
		);

		let ranked = match model.rerank(query, passages).await {
			Ok(ranked) => ranked,
			Err(err) => {
				tracing::warn!(
					stage = "Rerank",
					action = "model_call",
					query_variant = %text::truncate_for_log(query),
					error = %err,
					"Rerank attempt failed."
				);

				return Vec::new();
			},
		};

		for (rank, result) in ranked.iter().take(5).enumerate() {
			let Some(hit) = state.search_result.get(result.index) else { continue };

			tracing::debug!(
				stage = "Rerank",
				action = "top_score",
				rank = rank + 1,
				score = result.relevance_score,
				chunk_id = %hit.id,
				match_type = hit.match_type.as_str(),
				"Rerank model score."
			);
		}

		let threshold = state.rerank_threshold;

		filter_by_threshold(ranked, &state.search_result, threshold, &self.config.rerank)
	}
}
impl Stage for Rerank {
	fn name(&self) -> &'static str {
		"Rerank"
	}

	fn activation_events(&self) -> &'static [EventType] {
		&[EventType::ChunkRerank]
	}

	fn on_event<'a>(
		&'a self,
		_event: EventType,
		state: &'a mut PipelineState,
		next: Next<'a>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			tracing::info!(
				stage = "Rerank",
				action = "input",
				session_id = %state.session_id,
				candidate_cnt = state.search_result.len(),
				rerank_model = state.rerank_model_id.as_deref().unwrap_or_default(),
				rerank_thresh = state.rerank_threshold,
				"Reranking."
			);

			// Only reachable without Search in front, since Search stops on an empty result.
			if state.search_result.is_empty() {
				tracing::info!(
					stage = "Rerank",
					action = "skip",
					reason = "empty_search_result",
					"Nothing to rerank."
				);

				state.rerank_result.clear();

				return Err(Error::NothingFound { stage: "rerank" });
			}

			let Some(model_id) =
				state.rerank_model_id.clone().filter(|id| !id.trim().is_empty())
			else {
				tracing::error!(
					stage = "Rerank",
					action = "skip",
					reason = "empty_model_id",
					session_id = %state.session_id,
					"No rerank model configured."
				);

				return Err(Error::ModelNotConfigured {
					message: "A rerank model id is required to rerank search results.".to_string(),
				});
			};
			let model = match self.models.rerank_model(&model_id).await {
				Ok(model) => model,
				Err(err) => {
					tracing::error!(
						stage = "Rerank",
						action = "get_model",
						model_id = %model_id,
						error = %err,
						"Rerank model lookup failed."
					);

					return Err(err);
				},
			};
			let passages: Vec<String> =
				state.search_result.iter().map(passage::enriched_passage).collect();
			let ranked = self.rerank_with_fallbacks(model.as_ref(), state, &passages).await;

			tracing::info!(
				stage = "Rerank",
				action = "model_response",
				result_cnt = ranked.len(),
				"Rerank model finished."
			);

			let composite_cfg = &self.config.rerank.composite;
			let mut reranked: Vec<RetrievalHit> = ranked
				.iter()
				.filter_map(|result| {
					let mut hit = state.search_result.get(result.index)?.clone();
					let base_score = hit.score;

					hit.metadata.insert("base_score".to_string(), format!("{base_score:.4}"));
					hit.score = composite::composite_score(
						&hit,
						result.relevance_score,
						base_score,
						Some(state.query_intent),
						composite_cfg,
					);

					Some(hit)
				})
				.collect();

			reranked.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));

			for (rank, hit) in reranked.iter().take(3).enumerate() {
				let base_score = hit.metadata.get("base_score").map(String::as_str);

				tracing::info!(
					stage = "Rerank",
					action = "composite_top",
					rank = rank + 1,
					chunk_id = %hit.id,
					base_score = base_score.unwrap_or_default(),
					final_score = %format!("{:.4}", hit.score),
					intent = state.query_intent.as_str(),
					"Composite score."
				);
			}

			let k = reranked.len().min(state.rerank_top_k.max(1));
			let outcome = mmr::select(reranked, k, self.config.rerank.mmr.lambda);

			tracing::info!(
				stage = "Rerank",
				action = "mmr_done",
				selected = outcome.selected.len(),
				k,
				lambda = self.config.rerank.mmr.lambda,
				avg_redundancy = %format!("{:.4}", outcome.average_redundancy),
				"Diverse selection finished."
			);

			state.rerank_result = outcome.selected;

			if state.rerank_result.is_empty() {
				tracing::warn!(
					stage = "Rerank",
					action = "output",
					filtered_cnt = 0,
					session_id = %state.session_id,
					"Rerank kept nothing."
				);

				return Err(Error::NothingFound { stage: "rerank" });
			}

			tracing::info!(
				stage = "Rerank",
				action = "output",
				filtered_cnt = state.rerank_result.len(),
				"Rerank finished."
			);

			next.run(state).await
		})
	}
}

/// Threshold a hit's model score must exceed. History hits get a relieved threshold.
pub fn effective_threshold(match_type: MatchType, threshold: f64, cfg: &RerankConfig) -> f64 {
	if match_type == MatchType::History {
		(threshold - cfg.history_threshold_relief).max(cfg.history_threshold_floor)
	} else {
		threshold
	}
}

/// Keeps model results strictly above their effective threshold. Out-of-range indexes are
/// dropped.
pub fn filter_by_threshold(
	ranked: Vec<RankResult>,
	hits: &[RetrievalHit],
	threshold: f64,
	cfg: &RerankConfig,
) -> Vec<RankResult> {
	ranked
		.into_iter()
		.filter(|result| {
			hits.get(result.index).is_some_and(|hit| {
				result.relevance_score > effective_threshold(hit.match_type, threshold, cfg)
			})
		})
		.collect()
}
