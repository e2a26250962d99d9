use std::collections::{HashMap, HashSet};

use crate::types::RetrievalHit;
use sift_domain::text;

/// Drops every hit that repeats an identity key or the content signature of an earlier hit.
///
/// The earliest hit wins even when a later duplicate scores higher. Empty content never counts
/// as a signature collision.
pub fn dedup_first_seen<T>(hits: Vec<T>) -> Vec<T>
where
	T: AsRef<RetrievalHit>,
{
	let mut seen_keys = HashSet::new();
	let mut seen_signatures = HashSet::new();
	let mut unique = Vec::with_capacity(hits.len());

	for item in hits {
		let hit = item.as_ref();
		let keys = hit.identity_keys();

		if keys.iter().any(|key| seen_keys.contains(key)) {
			continue;
		}

		let signature = text::content_signature(&hit.content);

		if !signature.is_empty() && !seen_signatures.insert(signature) {
			continue;
		}

		seen_keys.extend(keys);
		unique.push(item);
	}

	unique
}

/// Keeps the highest-scoring hit per chunk id, then applies [`dedup_first_seen`].
///
/// The surviving hit takes the position of the first occurrence of its id.
pub fn dedup_best_score<T>(hits: Vec<T>) -> Vec<T>
where
	T: AsRef<RetrievalHit>,
{
	let mut positions: HashMap<String, usize> = HashMap::new();
	let mut best: Vec<T> = Vec::with_capacity(hits.len());

	for item in hits {
		let id = item.as_ref().id.clone();

		match positions.get(&id) {
			Some(&idx) => {
				if item.as_ref().score > best[idx].as_ref().score {
					best[idx] = item;
				}
			},
			None => {
				positions.insert(id, best.len());
				best.push(item);
			},
		}
	}

	dedup_first_seen(best)
}
