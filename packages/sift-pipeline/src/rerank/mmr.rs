use std::collections::HashSet;

use crate::{rerank::passage, types::RetrievalHit};
use sift_domain::text;

#[derive(Debug)]
pub struct MmrOutcome<T> {
	pub selected: Vec<T>,
	/// Mean pairwise token overlap among the selected hits.
	pub average_redundancy: f64,
}

/// Greedy maximal marginal relevance over `candidates`, keeping at most `k` of them.
///
/// Each round picks the candidate maximizing `lambda * score - (1 - lambda) * redundancy`, where
/// redundancy is the highest token overlap with anything already picked. Ties keep the earlier
/// candidate.
pub fn select<T>(candidates: Vec<T>, k: usize, lambda: f64) -> MmrOutcome<T>
where
	T: AsRef<RetrievalHit>,
{
	if k == 0 || candidates.is_empty() {
		return MmrOutcome { selected: Vec::new(), average_redundancy: 0.0 };
	}

	let mut pool: Vec<(T, HashSet<String>)> = candidates
		.into_iter()
		.map(|candidate| {
			let tokens = text::token_set(&passage::enriched_passage(candidate.as_ref()));

			(candidate, tokens)
		})
		.collect();
	let mut selected: Vec<(T, HashSet<String>)> = Vec::with_capacity(k.min(pool.len()));

	while selected.len() < k && !pool.is_empty() {
		let mut best_idx = 0;
		let mut best_score = f64::NEG_INFINITY;

		for (idx, (candidate, tokens)) in pool.iter().enumerate() {
			let redundancy = selected
				.iter()
				.map(|(_, picked)| text::jaccard(tokens, picked))
				.fold(0.0, f64::max);
			let score = lambda * candidate.as_ref().score - (1.0 - lambda) * redundancy;

			if score > best_score {
				best_score = score;
				best_idx = idx;
			}
		}

		selected.push(pool.remove(best_idx));
	}

	let average_redundancy = average_pairwise_overlap(&selected);

	MmrOutcome { selected: selected.into_iter().map(|(hit, _)| hit).collect(), average_redundancy }
}

fn average_pairwise_overlap<T>(selected: &[(T, HashSet<String>)]) -> f64 {
	let mut total = 0.0;
	let mut pairs = 0_usize;

	for (idx, (_, lhs)) in selected.iter().enumerate() {
		for (_, rhs) in &selected[idx + 1..] {
			total += text::jaccard(lhs, rhs);
			pairs += 1;
		}
	}

	if pairs == 0 { 0.0 } else { total / pairs as f64 }
}
