use std::sync::Arc;

use sift_pipeline::{
	Error, EventType, HistoryTurn, MatchType, Services, WebResult, WebSearchConfig,
	search::Search,
};
use sift_testkit::{
	FakeWebSearch, InMemoryKnowledgeBases, InMemorySessionStore, ScriptedChatModel,
	StaticModelService, hit,
};

use super::{CHAT_MODEL, config, ids, run_stage, state};

fn search(knowledge_bases: Arc<InMemoryKnowledgeBases>) -> Search {
	Search::new(config(), Services::new(Arc::new(StaticModelService::new()), knowledge_bases))
}

fn web_result(title: &str, url: &str) -> WebResult {
	WebResult {
		title: title.to_string(),
		url: url.to_string(),
		snippet: format!("{title} snippet"),
		..Default::default()
	}
}

#[tokio::test]
async fn failing_knowledge_base_does_not_sink_the_turn() {
	let knowledge_bases = Arc::new(
		InMemoryKnowledgeBases::new()
			.with_knowledge_base(
				"kb-a",
				vec![
					hit("a1", "kb-a", "alpha passage", 0.8, MatchType::Embedding),
					hit("a2", "kb-a", "alpha detail", 0.7, MatchType::Embedding),
				],
			)
			.with_knowledge_base(
				"kb-b",
				vec![hit("b1", "kb-b", "beta passage", 0.9, MatchType::Embedding)],
			)
			.failing("kb-b")
			.with_knowledge_base(
				"kb-c",
				vec![hit("c1", "kb-c", "gamma passage", 0.9, MatchType::Embedding)],
			),
	);
	let mut state = state("alpha", &["kb-a", "kb-b", "kb-c"]);

	state.enable_query_expansion = false;

	run_stage(Arc::new(search(knowledge_bases.clone())), EventType::ChunkSearch, &mut state)
		.await
		.expect("Search must survive one failing knowledge base.");

	assert_eq!(ids(&state.search_result), vec!["a1", "a2", "c1"]);
	assert_eq!(knowledge_bases.calls().len(), 3);
}

#[tokio::test]
async fn processed_query_gets_its_own_round() {
	let knowledge_bases = Arc::new(
		InMemoryKnowledgeBases::new()
			.with_knowledge_base("kb-a", Vec::new())
			.with_query_hits(
				"kb-a",
				"How To Reset",
				vec![hit("r1", "kb-a", "reset from settings", 0.8, MatchType::Embedding)],
			)
			.with_query_hits(
				"kb-a",
				"how to reset",
				vec![hit("p1", "kb-a", "reset with the cli", 0.7, MatchType::Embedding)],
			),
	);
	let mut state = state("How To Reset", &["kb-a"]);

	state.processed_query = "how to reset".to_string();
	state.enable_query_expansion = false;

	run_stage(Arc::new(search(knowledge_bases.clone())), EventType::ChunkSearch, &mut state)
		.await
		.expect("Search must succeed.");

	let queries: Vec<String> =
		knowledge_bases.calls().into_iter().map(|(_, params)| params.query_text).collect();

	assert_eq!(queries, vec!["How To Reset", "how to reset"]);
	assert_eq!(ids(&state.search_result), vec!["r1", "p1"]);
}

async fn run_with_base_hits(count: usize) -> (Arc<ScriptedChatModel>, Vec<String>, usize) {
	let base: Vec<_> = (0..count)
		.map(|idx| {
			let content = format!("password passage number {idx}");

			hit(&format!("e{idx}"), "kb-a", &content, 0.9, MatchType::Embedding)
		})
		.collect();
	let knowledge_bases = Arc::new(
		InMemoryKnowledgeBases::new().with_knowledge_base("kb-a", base).with_query_hits(
			"kb-a",
			"reset password steps",
			vec![hit("x1", "kb-a", "step by step password reset", 4.2, MatchType::Keywords)],
		),
	);
	let chat = Arc::new(
		ScriptedChatModel::new()
			.reply_when("paraphrases", r#"["reset password steps", "recover account"]"#),
	);
	let models = StaticModelService::new().with_chat(CHAT_MODEL, chat.clone());
	let stage = Search::new(config(), Services::new(Arc::new(models), knowledge_bases.clone()));
	let mut state = state("how to reset password", &["kb-a"]);

	state.chat_model_id = Some(CHAT_MODEL.to_string());

	run_stage(Arc::new(stage), EventType::ChunkSearch, &mut state)
		.await
		.expect("Search must succeed.");

	let expansion_calls = knowledge_bases
		.calls()
		.iter()
		.filter(|(_, params)| params.disable_vector_match && !params.disable_keywords_match)
		.count();
	let found = state.search_result.iter().map(|hit| hit.id.clone()).collect();

	(chat, found, expansion_calls)
}

#[tokio::test]
async fn low_recall_triggers_keyword_expansion() {
	let (chat, found, expansion_calls) = run_with_base_hits(3).await;

	assert_eq!(chat.call_count("paraphrases"), 1);
	assert_eq!(expansion_calls, 2);
	assert_eq!(found, vec!["e0", "e1", "e2", "x1"]);
}

#[tokio::test]
async fn enough_recall_skips_expansion() {
	let (chat, found, expansion_calls) = run_with_base_hits(6).await;

	assert_eq!(chat.call_count("paraphrases"), 0);
	assert_eq!(expansion_calls, 0);
	assert_eq!(found.len(), 6);
}

#[tokio::test]
async fn expansion_keyword_scores_are_normalized() {
	let knowledge_bases = Arc::new(
		InMemoryKnowledgeBases::new().with_knowledge_base("kb-a", Vec::new()).with_query_hits(
			"kb-a",
			"recover account",
			vec![
				hit("k1", "kb-a", "account recovery form", 12.0, MatchType::Keywords),
				hit("k2", "kb-a", "recovery codes", 3.0, MatchType::Keywords),
			],
		),
	);
	let chat =
		Arc::new(ScriptedChatModel::new().reply_when("paraphrases", r#"["recover account"]"#));
	let models = StaticModelService::new().with_chat(CHAT_MODEL, chat);
	let stage = Search::new(config(), Services::new(Arc::new(models), knowledge_bases));
	let mut state = state("lost my login", &["kb-a"]);

	state.chat_model_id = Some(CHAT_MODEL.to_string());

	run_stage(Arc::new(stage), EventType::ChunkSearch, &mut state)
		.await
		.expect("Search must succeed.");

	let scores: Vec<f64> = state.search_result.iter().map(|hit| hit.score).collect();

	assert_eq!(ids(&state.search_result), vec!["k1", "k2"]);
	assert_eq!(scores, vec![1.0, 0.0]);
}

#[tokio::test]
async fn history_references_join_after_fresh_hits() {
	let knowledge_bases = Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base(
		"kb-a",
		vec![hit("a1", "kb-a", "shared chunk", 0.4, MatchType::Embedding)],
	));
	let mut state = state("follow up", &["kb-a"]);

	state.enable_query_expansion = false;
	state.history = vec![HistoryTurn {
		query: "first question".to_string(),
		answer: "first answer".to_string(),
		references: vec![
			hit("a1", "kb-a", "shared chunk", 0.9, MatchType::Embedding),
			hit("h2", "kb-a", "earlier source", 0.6, MatchType::Embedding),
		],
	}];

	run_stage(Arc::new(search(knowledge_bases)), EventType::ChunkSearch, &mut state)
		.await
		.expect("Search must succeed.");

	assert_eq!(ids(&state.search_result), vec!["a1", "h2"]);
	assert_eq!(state.search_result[0].match_type, MatchType::Embedding);
	assert_eq!(state.search_result[0].score, 0.4);
	assert_eq!(state.search_result[1].match_type, MatchType::History);
}

#[tokio::test]
async fn empty_candidates_end_the_turn() {
	let knowledge_bases =
		Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base("kb-a", Vec::new()));
	let mut state = state("anything", &["kb-a"]);

	state.enable_query_expansion = false;

	let err = run_stage(Arc::new(search(knowledge_bases)), EventType::ChunkSearch, &mut state)
		.await
		.expect_err("An empty search must stop the turn.");

	assert!(err.is_nothing_found());
	assert!(matches!(err, Error::NothingFound { stage: "search" }));
}

#[tokio::test]
async fn knowledge_base_is_required_even_with_web_search() {
	let knowledge_bases = Arc::new(InMemoryKnowledgeBases::new());
	let mut state = state("anything", &[]);

	state.web_search_enabled = true;

	let err = run_stage(Arc::new(search(knowledge_bases)), EventType::ChunkSearch, &mut state)
		.await
		.expect_err("A turn without knowledge bases is invalid.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

fn web_state() -> sift_pipeline::PipelineState {
	let mut state = state("rust edition", &["kb-a"]);

	state.enable_query_expansion = false;
	state.web_search_enabled = true;
	state.web_search_config =
		Some(WebSearchConfig { provider: "duckduckgo".to_string(), max_results: 5 });

	state
}

fn web_knowledge_bases() -> Arc<InMemoryKnowledgeBases> {
	Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base(
		"kb-a",
		vec![hit("a1", "kb-a", "edition guide", 0.8, MatchType::Embedding)],
	))
}

#[tokio::test]
async fn web_results_are_compressed_and_the_marker_is_saved() {
	let web = Arc::new(FakeWebSearch::new(vec![
		web_result("Rust 2024", "https://example.com/rust-2024"),
		web_result("Editions", "https://example.com/editions"),
	]));
	let sessions = Arc::new(InMemorySessionStore::new());
	let services = Services::new(Arc::new(StaticModelService::new()), web_knowledge_bases())
		.with_web_search(web.clone(), sessions.clone());
	let mut state = web_state();

	run_stage(Arc::new(Search::new(config(), services)), EventType::ChunkSearch, &mut state)
		.await
		.expect("Search must succeed.");

	assert_eq!(
		ids(&state.search_result),
		vec!["a1", "https://example.com/rust-2024", "https://example.com/editions"]
	);

	let web_hit = &state.search_result[1];

	assert_eq!(web_hit.match_type, MatchType::WebSearch);
	assert_eq!(web_hit.score, 0.6);
	assert_eq!(web_hit.knowledge_source, "web_search");

	let requests = web.compress_requests();

	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].questions, vec!["rust edition"]);

	let saved = sessions.state("session-1").expect("Marker must be saved.");

	assert_eq!(saved.temp_kb_id.as_deref(), Some("temp-session-1"));
	assert_eq!(saved.seen_urls.len(), 2);
}

#[tokio::test]
async fn web_failure_degrades_to_knowledge_base_hits() {
	let services = Services::new(Arc::new(StaticModelService::new()), web_knowledge_bases())
		.with_web_search(Arc::new(FakeWebSearch::failing()), Arc::new(InMemorySessionStore::new()));
	let mut state = web_state();

	run_stage(Arc::new(Search::new(config(), services)), EventType::ChunkSearch, &mut state)
		.await
		.expect("Web failures must not fail the turn.");

	assert_eq!(ids(&state.search_result), vec!["a1"]);
}

#[tokio::test]
async fn compression_failure_keeps_raw_web_results() {
	let web = Arc::new(
		FakeWebSearch::new(vec![web_result("Rust 2024", "https://example.com/rust-2024")])
			.failing_compression(),
	);
	let sessions = Arc::new(InMemorySessionStore::failing_load());
	let services = Services::new(Arc::new(StaticModelService::new()), web_knowledge_bases())
		.with_web_search(web.clone(), sessions.clone());
	let mut state = web_state();

	run_stage(Arc::new(Search::new(config(), services)), EventType::ChunkSearch, &mut state)
		.await
		.expect("Web failures must not fail the turn.");

	assert_eq!(ids(&state.search_result), vec!["a1", "https://example.com/rust-2024"]);
	assert_eq!(web.compress_requests().len(), 1);
	assert!(sessions.state("session-1").is_none());
}
