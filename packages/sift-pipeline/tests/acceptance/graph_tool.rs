use std::sync::Arc;

use serde_json::json;

use sift_pipeline::{
	Error, GraphExtraction, KnowledgeBase, KnowledgeBaseKind, MatchType,
	tool::{GraphQueryTool, Tool},
};
use sift_testkit::{InMemoryKnowledgeBases, hit};

use super::config;

fn graph_base(id: &str, graph: Option<GraphExtraction>) -> KnowledgeBase {
	KnowledgeBase {
		id: id.to_string(),
		name: id.to_string(),
		kind: KnowledgeBaseKind::Document,
		graph,
	}
}

fn people_graph() -> GraphExtraction {
	GraphExtraction {
		nodes: vec!["Person".to_string(), "Team".to_string()],
		relations: vec!["member_of".to_string()],
	}
}

#[tokio::test]
async fn unconfigured_bases_are_reported_and_never_searched() {
	let knowledge_bases = Arc::new(
		InMemoryKnowledgeBases::new()
			.with_base(
				graph_base("kb-graph", Some(people_graph())),
				vec![
					hit("g1", "kb-graph", "alice member_of platform", 0.65, MatchType::Graph),
					hit("g2", "kb-graph", "bob member_of platform", 0.9, MatchType::Graph),
				],
			)
			.with_base(
				graph_base("kb-plain", None),
				vec![hit("p1", "kb-plain", "plain text", 0.99, MatchType::Embedding)],
			),
	);
	let tool = GraphQueryTool::new(config(), knowledge_bases.clone());
	let result = tool
		.execute(json!({ "knowledge_base_ids": ["kb-graph", "kb-plain"], "query": "platform" }))
		.await
		.expect("Graph query must succeed.");
	let calls = knowledge_bases.calls();

	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, "kb-graph");
	assert_eq!(calls[0].1.match_count, 10);
	assert!(result.output.contains("=== Partial Failures ==="));
	assert!(result.output.contains("KB kb-plain: Graph extraction is not configured."));
	assert!(result.output.contains("Entity types (2): Person, Team"));
	assert!(result.output.contains("Relevance: 0.90 (high)"));
	assert!(result.output.contains("Relevance: 0.65 (medium)"));
	assert_eq!(result.data["results"][0]["chunk_id"], "g2");
	assert_eq!(result.data["count"], 2);
	assert_eq!(result.data["display_type"], "graph_query_results");
}

#[tokio::test]
async fn no_graph_results_is_a_plain_message() {
	let knowledge_bases = Arc::new(
		InMemoryKnowledgeBases::new().with_base(graph_base("kb-plain", None), Vec::new()),
	);
	let tool = GraphQueryTool::new(config(), knowledge_bases);
	let result = tool
		.execute(json!({ "knowledge_base_ids": ["kb-plain", "kb-missing"], "query": "alice" }))
		.await
		.expect("Graph query must succeed.");

	assert_eq!(result.output, "No related graph information found.");
	assert_eq!(result.data["errors"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn graph_query_requires_bases_and_query() {
	let tool = GraphQueryTool::new(config(), Arc::new(InMemoryKnowledgeBases::new()));

	for args in [
		json!({ "knowledge_base_ids": [], "query": "alice" }),
		json!({ "knowledge_base_ids": ["kb-graph"], "query": "  " }),
	] {
		let err = tool.execute(args).await.expect_err("Arguments must be rejected.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}
}
