use std::collections::{BTreeMap, HashSet};

use sift_domain::text;
use sift_pipeline::{
	BoxFuture, Error, KnowledgeBase, KnowledgeBaseService, MatchType, Result, RetrievalHit,
	SearchParams,
};

use crate::FixtureKnowledgeBase;

const EVAL_SOURCE: &str = "eval_fixture";

struct IndexedChunk {
	hit: RetrievalHit,
	tokens: HashSet<String>,
}

struct IndexedBase {
	base: KnowledgeBase,
	chunks: Vec<IndexedChunk>,
}

/// Token-overlap index over dataset fixtures, standing in for a hybrid search backend.
///
/// The "vector" side scores overlap normalized by both token set sizes and honours the vector
/// threshold. The keyword side returns the raw overlap count, which the pipeline normalizes per
/// batch the same way it treats real lexical scores.
pub struct LexicalKnowledgeBases {
	bases: BTreeMap<String, IndexedBase>,
}
impl LexicalKnowledgeBases {
	pub fn new(fixtures: &[FixtureKnowledgeBase]) -> Self {
		let bases = fixtures
			.iter()
			.map(|fixture| {
				let base = KnowledgeBase {
					id: fixture.id.clone(),
					name: fixture.name.clone().unwrap_or_else(|| fixture.id.clone()),
					kind: fixture.kind,
					graph: None,
				};
				let chunks = fixture
					.chunks
					.iter()
					.enumerate()
					.map(|(idx, chunk)| {
						let knowledge_id =
							chunk.knowledge_id.clone().unwrap_or_else(|| chunk.id.clone());
						let hit = RetrievalHit {
							id: chunk.id.clone(),
							content: chunk.content.clone(),
							knowledge_title: chunk
								.title
								.clone()
								.unwrap_or_else(|| knowledge_id.clone()),
							knowledge_id,
							knowledge_base_id: fixture.id.clone(),
							chunk_index: idx as i64,
							chunk_type: chunk.chunk_type,
							knowledge_source: EVAL_SOURCE.to_string(),
							end_at: chunk.content.chars().count() as i64,
							..Default::default()
						};

						IndexedChunk { tokens: text::token_set(&chunk.content), hit }
					})
					.collect();

				(fixture.id.clone(), IndexedBase { base, chunks })
			})
			.collect();

		Self { bases }
	}

	fn search(&self, indexed: &IndexedBase, params: &SearchParams) -> Vec<RetrievalHit> {
		let query_tokens = text::token_set(&params.query_text);

		if query_tokens.is_empty() {
			return Vec::new();
		}

		let mut vector = Vec::new();
		let mut keyword = Vec::new();

		for chunk in &indexed.chunks {
			let overlap = query_tokens.intersection(&chunk.tokens).count();

			if overlap == 0 {
				continue;
			}

			let similarity =
				overlap as f64 / ((query_tokens.len() * chunk.tokens.len()) as f64).sqrt();
			let coverage = overlap as f64 / query_tokens.len() as f64;

			if !params.disable_vector_match && similarity >= params.vector_threshold {
				vector.push(RetrievalHit {
					score: similarity,
					match_type: MatchType::Embedding,
					..chunk.hit.clone()
				});
			}
			if !params.disable_keywords_match && coverage >= params.keyword_threshold {
				keyword.push(RetrievalHit {
					score: overlap as f64,
					match_type: MatchType::Keywords,
					..chunk.hit.clone()
				});
			}
		}

		for hits in [&mut vector, &mut keyword] {
			hits.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));

			if params.match_count > 0 {
				hits.truncate(params.match_count);
			}
		}

		vector.extend(keyword);

		vector
	}
}
impl KnowledgeBaseService for LexicalKnowledgeBases {
	fn hybrid_search<'a>(
		&'a self,
		knowledge_base_id: &'a str,
		params: &'a SearchParams,
	) -> BoxFuture<'a, Result<Vec<RetrievalHit>>> {
		Box::pin(async move {
			let indexed = self.bases.get(knowledge_base_id).ok_or_else(|| Error::Search {
				message: format!("Unknown knowledge base {knowledge_base_id}."),
			})?;

			Ok(self.search(indexed, params))
		})
	}

	fn knowledge_base<'a>(
		&'a self,
		knowledge_base_id: &'a str,
	) -> BoxFuture<'a, Result<KnowledgeBase>> {
		Box::pin(async move {
			let indexed = self.bases.get(knowledge_base_id).ok_or_else(|| Error::Search {
				message: format!("Unknown knowledge base {knowledge_base_id}."),
			})?;

			Ok(indexed.base.clone())
		})
	}
}
