use std::sync::Arc;

use serde_json::json;

use sift_pipeline::{
	Error, KnowledgeBase, KnowledgeBaseKind, MatchType,
	tool::{KnowledgeSearchTool, Tool, knowledge_search::ToolHit},
};
use sift_testkit::{FakeRerankModel, InMemoryKnowledgeBases, ScriptedChatModel, hit};

use super::config;

fn docs_and_faq() -> Arc<InMemoryKnowledgeBases> {
	let faq = KnowledgeBase {
		id: "kb-faq".to_string(),
		name: "Support FAQ".to_string(),
		kind: KnowledgeBaseKind::Faq,
		graph: None,
	};

	Arc::new(
		InMemoryKnowledgeBases::new()
			.with_knowledge_base(
				"kb-docs",
				vec![hit("d1", "kb-docs", "doc passage", 0.8, MatchType::Embedding)],
			)
			.with_base(faq, vec![hit("f1", "kb-faq", "faq answer", 0.7, MatchType::Embedding)]),
	)
}

fn two_docs() -> Arc<InMemoryKnowledgeBases> {
	Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base(
		"kb-docs",
		vec![
			hit("d1", "kb-docs", "doc one", 0.8, MatchType::Embedding),
			hit("d2", "kb-docs", "doc two", 0.7, MatchType::Embedding),
		],
	))
}

fn scored(results: &[ToolHit]) -> Vec<(&str, f64)> {
	results.iter().map(|result| (result.hit.id.as_str(), result.hit.score)).collect()
}

fn assert_scores(results: &[ToolHit], expected: &[(&str, f64)]) {
	let actual = scored(results);

	assert_eq!(actual.len(), expected.len(), "Unexpected results: {actual:?}");

	for ((id, score), (expected_id, expected_score)) in actual.iter().zip(expected) {
		assert_eq!(id, expected_id, "Unexpected order: {actual:?}");
		assert!((score - expected_score).abs() < 1e-9, "Unexpected score for {id}: {score}");
	}
}

fn strings(values: &[&str]) -> Vec<String> {
	values.iter().map(|value| value.to_string()).collect()
}

#[tokio::test]
async fn faq_hits_keep_their_retrieval_score() {
	let model = Arc::new(FakeRerankModel::fixed(vec![("doc passage", 0.9), ("faq answer", 0.0)]));
	let tool = KnowledgeSearchTool::new(config(), docs_and_faq(), Vec::new())
		.with_rerank_model(model.clone());
	let results =
		tool.search(&strings(&["reset password"]), &strings(&["kb-docs", "kb-faq"])).await;

	// d1: (0.6 * 0.9 + 0.3 * 0.8 + 0.1) * 1.05
	assert_scores(&results, &[("d1", 0.924), ("f1", 0.7)]);
	assert_eq!(results[1].knowledge_base_kind, KnowledgeBaseKind::Faq);
	assert_eq!(results[1].source_query, "reset password");
	assert_eq!(model.queries(), vec!["reset password"]);
}

#[tokio::test]
async fn chat_batches_take_over_when_the_rerank_model_fails() {
	let chat = Arc::new(
		ScriptedChatModel::new().reply_when("reranking expert", "Passage 1: 0.2\nPassage 2: 0.95"),
	);
	let tool = KnowledgeSearchTool::new(config(), two_docs(), Vec::new())
		.with_rerank_model(Arc::new(FakeRerankModel::failing()))
		.with_chat_model(chat.clone());
	let results = tool.search(&strings(&["doc"]), &strings(&["kb-docs"])).await;

	assert_scores(&results, &[("d2", 0.924), ("d1", 0.483)]);
	assert_eq!(chat.call_count("reranking expert"), 1);
}

#[tokio::test]
async fn failed_chat_batch_keeps_retrieval_scores() {
	let chat = Arc::new(ScriptedChatModel::new().fail_when("reranking expert", "overloaded"));
	let tool =
		KnowledgeSearchTool::new(config(), two_docs(), Vec::new()).with_chat_model(chat.clone());
	let results = tool.search(&strings(&["doc"]), &strings(&["kb-docs"])).await;

	// The retrieval score stands in for the model score.
	assert_scores(&results, &[("d1", 0.861), ("d2", 0.7665)]);
	assert_eq!(chat.call_count("reranking expert"), 1);
}

#[tokio::test]
async fn weak_hits_are_dropped_before_ranking() {
	let knowledge_bases = Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base(
		"kb-docs",
		vec![
			hit("strong", "kb-docs", "strong match", 0.7, MatchType::Embedding),
			hit("weak", "kb-docs", "weak match", 0.55, MatchType::Embedding),
		],
	));
	let tool = KnowledgeSearchTool::new(config(), knowledge_bases, Vec::new());
	let results = tool.search(&strings(&["match"]), &strings(&["kb-docs"])).await;

	assert_scores(&results, &[("strong", 0.7)]);
}

#[tokio::test]
async fn execute_caps_queries_and_formats_results() {
	let knowledge_bases = two_docs();
	let tool =
		KnowledgeSearchTool::new(config(), knowledge_bases.clone(), strings(&["kb-docs"]));
	let args = json!({ "queries": ["q1", "q2", "q3", "q4", "q5", "q6"] });
	let result = tool.execute(args).await.expect("Search must succeed.");

	assert_eq!(knowledge_bases.calls().len(), 5);
	assert!(result.success);
	assert!(result.output.starts_with("=== Search Results ===\nFound 2 relevant results"));
	assert!(result.output.contains("[Source Document: d1.md]"));
	assert!(result.output.contains("Result #2:\n  [chunk_id: d2][chunk_index: 0]"));
	assert_eq!(result.data["count"], 2);
	assert_eq!(result.data["queries"].as_array().map(Vec::len), Some(5));
	assert_eq!(result.data["results"][0]["source_query"], "q1");
	assert_eq!(result.data["results"][0]["knowledge_base_type"], "document");
	assert_eq!(result.data["display_type"], "search_results");
}

#[tokio::test]
async fn execute_reports_when_nothing_matches() {
	let knowledge_bases =
		Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base("kb-docs", Vec::new()));
	let tool = KnowledgeSearchTool::new(config(), knowledge_bases, strings(&["kb-docs"]));
	let result =
		tool.execute(json!({ "queries": ["anything"] })).await.expect("Search must succeed.");

	assert!(result.output.starts_with("No relevant content found in 1 knowledge base(s)."));
	assert_eq!(result.data["count"], 0);
}

#[tokio::test]
async fn execute_rejects_unusable_arguments() {
	let tool = KnowledgeSearchTool::new(config(), two_docs(), Vec::new());

	for args in [
		json!({ "queries": ["  "] }),
		json!({ "queries": ["reset"] }),
		json!({ "queries": "reset" }),
	] {
		let err = tool.execute(args.clone()).await.expect_err("Arguments must be rejected.");

		assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error for {args}: {err}");
	}
}
