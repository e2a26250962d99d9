use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Retrieval mode that produced a hit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
	#[default]
	Embedding,
	Keywords,
	History,
	WebSearch,
	Graph,
}
impl MatchType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Embedding => "embedding",
			Self::Keywords => "keywords",
			Self::History => "history",
			Self::WebSearch => "web_search",
			Self::Graph => "graph",
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
	#[default]
	Text,
	Summary,
	Faq,
	WebSearch,
	ImageCaption,
	ImageOcr,
	Entity,
	Relationship,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
	Definition,
	Howto,
	Compare,
	Qa,
	#[default]
	General,
}
impl QueryIntent {
	/// Maps a classifier label onto a known intent. Unknown labels yield `None`.
	pub fn parse(label: &str) -> Option<Self> {
		match label.trim().to_lowercase().as_str() {
			"definition" => Some(Self::Definition),
			"howto" => Some(Self::Howto),
			"compare" => Some(Self::Compare),
			"qa" => Some(Self::Qa),
			"general" => Some(Self::General),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Definition => "definition",
			Self::Howto => "howto",
			Self::Compare => "compare",
			Self::Qa => "qa",
			Self::General => "general",
		}
	}
}

/// One retrieved chunk with its score and provenance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalHit {
	pub id: String,
	pub content: String,
	pub knowledge_id: String,
	pub knowledge_base_id: String,
	pub knowledge_title: String,
	pub chunk_index: i64,
	pub parent_chunk_id: Option<String>,
	pub score: f64,
	pub match_type: MatchType,
	pub chunk_type: ChunkType,
	pub knowledge_source: String,
	/// JSON array of `{caption, ocr_text}` objects attached to the chunk.
	pub image_info: Option<String>,
	pub metadata: BTreeMap<String, String>,
	pub start_at: i64,
	pub end_at: i64,
}
impl RetrievalHit {
	/// Keys under which two hits count as the same chunk.
	pub fn identity_keys(&self) -> Vec<String> {
		let mut keys = vec![self.id.clone()];

		if let Some(parent) = self.parent_chunk_id.as_deref().filter(|id| !id.is_empty()) {
			keys.push(format!("parent:{parent}"));
		}
		if !self.knowledge_id.is_empty() {
			keys.push(format!("kb:{}#{}", self.knowledge_id, self.chunk_index));
		}

		keys
	}
}
impl AsRef<RetrievalHit> for RetrievalHit {
	fn as_ref(&self) -> &RetrievalHit {
		self
	}
}
impl AsMut<RetrievalHit> for RetrievalHit {
	fn as_mut(&mut self) -> &mut RetrievalHit {
		self
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
	pub query_text: String,
	pub match_count: usize,
	pub vector_threshold: f64,
	pub keyword_threshold: f64,
	pub disable_vector_match: bool,
	pub disable_keywords_match: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBaseKind {
	#[default]
	Document,
	Faq,
}
impl KnowledgeBaseKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Document => "document",
			Self::Faq => "faq",
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphExtraction {
	pub nodes: Vec<String>,
	pub relations: Vec<String>,
}
impl GraphExtraction {
	pub fn is_configured(&self) -> bool {
		!self.nodes.is_empty() || !self.relations.is_empty()
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBase {
	pub id: String,
	pub name: String,
	pub kind: KnowledgeBaseKind,
	pub graph: Option<GraphExtraction>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebResult {
	pub title: String,
	pub url: String,
	pub snippet: String,
	pub content: String,
	pub source: String,
	#[serde(with = "crate::time_serde")]
	pub published_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
	pub provider: String,
	pub max_results: usize,
}

/// Session-scoped marker for the temporary knowledge base that holds compressed web pages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempKbState {
	pub temp_kb_id: Option<String>,
	pub seen_urls: BTreeSet<String>,
	pub knowledge_ids: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CompressRequest {
	pub session_id: String,
	pub state: TempKbState,
	pub questions: Vec<String>,
	pub results: Vec<WebResult>,
	pub config: WebSearchConfig,
}

#[derive(Clone, Debug)]
pub struct CompressOutcome {
	pub results: Vec<WebResult>,
	pub state: TempKbState,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryTurn {
	pub query: String,
	pub answer: String,
	pub references: Vec<RetrievalHit>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_keys_cover_parent_and_position() {
		let hit = RetrievalHit {
			id: "c1".to_string(),
			knowledge_id: "doc".to_string(),
			chunk_index: 3,
			parent_chunk_id: Some("p1".to_string()),
			..Default::default()
		};

		assert_eq!(hit.identity_keys(), vec!["c1", "parent:p1", "kb:doc#3"]);
	}

	#[test]
	fn intent_labels_are_case_insensitive() {
		assert_eq!(QueryIntent::parse(" HowTo "), Some(QueryIntent::Howto));
		assert_eq!(QueryIntent::parse("chitchat"), None);
	}

	#[test]
	fn web_result_timestamp_round_trips_as_rfc3339() {
		let raw = serde_json::json!({
			"title": "Release notes",
			"url": "https://example.com/notes",
			"published_at": "2024-05-01T08:30:00Z"
		});
		let parsed: WebResult = serde_json::from_value(raw).expect("Web result must parse.");
		let rendered = serde_json::to_value(&parsed).expect("Web result must serialize.");

		assert!(parsed.published_at.is_some());
		assert_eq!(rendered["published_at"], serde_json::json!("2024-05-01T08:30:00Z"));
	}
}
