use crate::types::{HistoryTurn, MatchType, RetrievalHit};

/// References of the most recent turn that has any, re-tagged as history matches.
pub fn last_turn_references(history: &[HistoryTurn]) -> Vec<RetrievalHit> {
	let Some(turn) = history.iter().rev().find(|turn| !turn.references.is_empty()) else {
		return Vec::new();
	};

	turn.references
		.iter()
		.cloned()
		.map(|mut hit| {
			hit.match_type = MatchType::History;

			hit
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn turn(ids: &[&str]) -> HistoryTurn {
		HistoryTurn {
			query: "q".to_string(),
			answer: "a".to_string(),
			references: ids
				.iter()
				.map(|id| RetrievalHit { id: id.to_string(), ..Default::default() })
				.collect(),
		}
	}

	#[test]
	fn scans_backwards_past_turns_without_references() {
		let history = vec![turn(&["old"]), turn(&["recent-1", "recent-2"]), turn(&[])];
		let hits = last_turn_references(&history);
		let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();

		assert_eq!(ids, vec!["recent-1", "recent-2"]);
		assert!(hits.iter().all(|hit| hit.match_type == MatchType::History));
	}

	#[test]
	fn no_referenced_turn_yields_nothing() {
		assert!(last_turn_references(&[turn(&[]), turn(&[])]).is_empty());
		assert!(last_turn_references(&[]).is_empty());
	}
}
