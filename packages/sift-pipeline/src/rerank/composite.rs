use crate::{
	search::web::WEB_SEARCH_SOURCE,
	types::{ChunkType, QueryIntent, RetrievalHit},
};
use sift_config::RerankComposite;

/// Fuses model relevance with the retrieval score and source, intent and position priors.
///
/// `intent` is `None` on call paths that never classified the query. The result is always in
/// `[0, 1]`; a non-finite intermediate value scores zero.
pub fn composite_score(
	hit: &RetrievalHit,
	model_score: f64,
	base_score: f64,
	intent: Option<QueryIntent>,
	cfg: &RerankComposite,
) -> f64 {
	let source_trust = if hit.knowledge_source.eq_ignore_ascii_case(WEB_SEARCH_SOURCE) {
		cfg.web_source_trust
	} else {
		1.0
	};
	let weighted = cfg.model_weight * model_score
		+ cfg.base_weight * base_score
		+ cfg.source_weight * source_trust;
	let composite = weighted * intent_boost(hit, intent, cfg) * position_prior(hit, cfg);

	if composite.is_finite() { composite.clamp(0.0, 1.0) } else { 0.0 }
}

fn intent_boost(hit: &RetrievalHit, intent: Option<QueryIntent>, cfg: &RerankComposite) -> f64 {
	match intent {
		Some(QueryIntent::Definition) if hit.chunk_type == ChunkType::Summary =>
			cfg.definition_summary_boost,
		Some(QueryIntent::Howto) if hit.end_at - hit.start_at > cfg.howto_min_span =>
			cfg.howto_long_boost,
		_ => 1.0,
	}
}

/// Slight preference for content that starts early in its source.
///
/// Offsets outside the usual range still go through the clamp, so the prior stays within the cap.
fn position_prior(hit: &RetrievalHit, cfg: &RerankComposite) -> f64 {
	let span_end = hit.end_at + 1;

	// No division by zero.
	if span_end == 0 {
		return 1.0;
	}

	let ratio = 1.0 - hit.start_at as f64 / span_end as f64;

	1.0 + ratio.clamp(-cfg.position_prior_cap, cfg.position_prior_cap)
}
