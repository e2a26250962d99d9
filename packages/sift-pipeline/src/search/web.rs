use crate::{
	Services,
	state::PipelineState,
	time_serde,
	types::{ChunkType, CompressRequest, MatchType, RetrievalHit, TempKbState, WebResult},
};

pub const WEB_SEARCH_SOURCE: &str = "web_search";

/// Runs the web branch of a turn. Every failure degrades to fewer or uncompressed results.
pub async fn search_web(
	services: &Services,
	state: &PipelineState,
	default_score: f64,
) -> Vec<RetrievalHit> {
	if !state.web_search_enabled {
		return Vec::new();
	}

	let Some(web) = services.web_search.as_ref() else {
		return Vec::new();
	};
	let Some(config) = state.web_search_config.as_ref().filter(|cfg| !cfg.provider.is_empty())
	else {
		tracing::warn!(
			stage = "Search",
			action = "web_config_missing",
			session_id = %state.session_id,
			"Web search is enabled without a provider."
		);

		return Vec::new();
	};

	tracing::info!(
		stage = "Search",
		action = "web_request",
		provider = %config.provider,
		"Querying web search."
	);

	let mut results = match web.search(config, state.rewrite_query.trim()).await {
		Ok(results) => results,
		Err(err) => {
			tracing::warn!(
				stage = "Search",
				action = "web_search_error",
				error = %err,
				"Web search failed."
			);

			return Vec::new();
		},
	};

	if let Some(sessions) = services.sessions.as_ref() {
		let temp_state = match sessions.web_search_temp_kb_state(&state.session_id).await {
			Ok(temp_state) => temp_state,
			Err(err) => {
				tracing::warn!(
					stage = "Search",
					action = "web_state_load_error",
					session_id = %state.session_id,
					error = %err,
					"Temporary knowledge base state could not be loaded; starting empty."
				);

				TempKbState::default()
			},
		};
		let request = CompressRequest {
			session_id: state.session_id.clone(),
			state: temp_state,
			questions: state.search_queries(),
			results: results.clone(),
			config: config.clone(),
		};

		match web.compress_with_rag(request).await {
			Ok(outcome) => {
				results = outcome.results;

				if let Err(err) =
					sessions.save_web_search_temp_kb_state(&state.session_id, &outcome.state).await
				{
					tracing::warn!(
						stage = "Search",
						action = "web_state_save_error",
						session_id = %state.session_id,
						error = %err,
						"Temporary knowledge base state could not be saved."
					);
				}
			},
			Err(err) => {
				tracing::warn!(
					stage = "Search",
					action = "web_compress_error",
					error = %err,
					"Web result compression failed; using raw results."
				);
			},
		}
	}

	let hits = convert_web_results(&results, default_score);

	tracing::info!(
		stage = "Search",
		action = "web_hits",
		hit_count = hits.len(),
		"Web hits ready."
	);

	hits
}

pub fn convert_web_results(results: &[WebResult], default_score: f64) -> Vec<RetrievalHit> {
	results
		.iter()
		.enumerate()
		.map(|(idx, result)| {
			let id = if result.url.is_empty() {
				format!("web_search_{idx}")
			} else {
				result.url.clone()
			};
			let content = [&result.title, &result.snippet, &result.content]
				.into_iter()
				.filter(|part| !part.is_empty())
				.map(String::as_str)
				.collect::<Vec<_>>()
				.join("\n\n");
			let mut hit = RetrievalHit {
				id,
				end_at: content.chars().count() as i64,
				content,
				knowledge_title: result.title.clone(),
				score: default_score,
				match_type: MatchType::WebSearch,
				chunk_type: ChunkType::WebSearch,
				knowledge_source: WEB_SEARCH_SOURCE.to_string(),
				..Default::default()
			};

			hit.metadata.insert("url".to_string(), result.url.clone());
			hit.metadata.insert("source".to_string(), result.source.clone());
			hit.metadata.insert("title".to_string(), result.title.clone());
			hit.metadata.insert("snippet".to_string(), result.snippet.clone());

			if let Some(published) = result.published_at.as_ref().and_then(time_serde::format) {
				hit.metadata.insert("published_at".to_string(), published);
			}

			hit
		})
		.collect()
}
