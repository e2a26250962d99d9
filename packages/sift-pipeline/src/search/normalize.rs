use crate::types::{MatchType, RetrievalHit};
use sift_config::Normalization;

/// Bounds used for one keyword normalization pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeywordBounds {
	pub count: usize,
	pub raw_min: f64,
	pub raw_max: f64,
	pub lower: f64,
	pub upper: f64,
}

/// Rescales keyword-match scores of the whole batch onto `[0, 1]`.
///
/// Lexical scores from different knowledge bases are not comparable, so this must see every
/// keyword hit of a batch at once. Large batches are bounded by percentiles so one outlier
/// cannot squash everyone else towards zero. Returns `None` when the batch has no keyword hits.
pub fn normalize_keyword_scores<T>(hits: &mut [T], cfg: &Normalization) -> Option<KeywordBounds>
where
	T: AsMut<RetrievalHit>,
{
	let mut keyword: Vec<&mut RetrievalHit> = hits
		.iter_mut()
		.map(|hit| hit.as_mut())
		.filter(|hit| hit.match_type == MatchType::Keywords)
		.collect();
	let first = keyword.first()?.score;

	if keyword.len() == 1 {
		keyword[0].score = 1.0;

		return Some(KeywordBounds {
			count: 1,
			raw_min: first,
			raw_max: first,
			lower: first,
			upper: first,
		});
	}

	let (raw_min, raw_max) = keyword
		.iter()
		.fold((first, first), |(lo, hi), hit| (lo.min(hit.score), hi.max(hit.score)));
	let (lower, upper) = if keyword.len() >= cfg.percentile_min_batch {
		let mut sorted: Vec<f64> = keyword.iter().map(|hit| hit.score).collect();

		sorted.sort_by(f64::total_cmp);

		let len = sorted.len();
		let lower = sorted.get(len * cfg.low_percentile / 100).copied().unwrap_or(raw_min);
		let upper = sorted.get(len * cfg.high_percentile / 100).copied().unwrap_or(raw_max);

		(lower, upper)
	} else {
		(raw_min, raw_max)
	};
	let range = upper - lower;

	if raw_max <= raw_min || range <= 0.0 || !range.is_finite() {
		for hit in keyword.iter_mut() {
			hit.score = 1.0;
		}
	} else {
		for hit in keyword.iter_mut() {
			let clamped = hit.score.clamp(lower, upper);

			hit.score = ((clamped - lower) / range).clamp(0.0, 1.0);
		}
	}

	Some(KeywordBounds { count: keyword.len(), raw_min, raw_max, lower, upper })
}
