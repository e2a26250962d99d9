use std::sync::Arc;

use sift_pipeline::{ChunkType, EventType, MatchType, Pipeline, QueryIntent, Services};
use sift_testkit::{
	FakeRerankModel, InMemoryKnowledgeBases, ScriptedChatModel, StaticModelService, hit,
};

use super::{CHAT_MODEL, RERANK_MODEL, config, ids, state};

const INTENT_REPLY: &str = "```json\n{\"intent\": \"definition\", \"confidence\": 0.9}\n```";

fn pipeline(
	knowledge_bases: Arc<InMemoryKnowledgeBases>,
	chat: Arc<ScriptedChatModel>,
) -> Pipeline {
	let models = StaticModelService::new()
		.with_chat(CHAT_MODEL, chat)
		.with_rerank(RERANK_MODEL, Arc::new(FakeRerankModel::new(|_, _| 0.8)));

	Pipeline::new(config(), Services::new(Arc::new(models), knowledge_bases))
}

#[tokio::test]
async fn definition_turn_prefers_summary_chunks() {
	let overview = "retrieval augmented generation overview";
	let mut summary = hit("s1", "kb-a", overview, 0.8, MatchType::Embedding);

	summary.chunk_type = ChunkType::Summary;

	let knowledge_bases = Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base(
		"kb-a",
		vec![
			hit("t1", "kb-a", "rag pipelines combine retrieval", 0.8, MatchType::Embedding),
			summary,
		],
	));
	let chat = Arc::new(ScriptedChatModel::new().reply_when("intent classifier", INTENT_REPLY));
	let pipeline = pipeline(knowledge_bases, chat.clone());
	let mut state = state("What is RAG?", &["kb-a"]);

	state.chat_model_id = Some(CHAT_MODEL.to_string());

	pipeline.run(&mut state).await.expect("The turn must succeed.");

	assert_eq!(state.query_intent, QueryIntent::Definition);
	assert_eq!(chat.call_count("intent classifier"), 1);
	assert_eq!(ids(&state.search_result), vec!["t1", "s1"]);
	assert_eq!(ids(&state.rerank_result), vec!["s1", "t1"]);
	assert!(state.rerank_result[0].score > state.rerank_result[1].score);
}

#[tokio::test]
async fn stages_register_for_their_own_events() {
	let pipeline = pipeline(
		Arc::new(InMemoryKnowledgeBases::new()),
		Arc::new(ScriptedChatModel::new()),
	);

	assert_eq!(pipeline.events().stage_names(EventType::PreprocessQuery), vec!["Preprocess"]);
	assert_eq!(pipeline.events().stage_names(EventType::ChunkSearch), vec!["Search"]);
	assert_eq!(pipeline.events().stage_names(EventType::ChunkRerank), vec!["Rerank"]);
}

#[tokio::test]
async fn empty_search_stops_before_rerank() {
	let knowledge_bases =
		Arc::new(InMemoryKnowledgeBases::new().with_knowledge_base("kb-a", Vec::new()));
	let pipeline = pipeline(knowledge_bases, Arc::new(ScriptedChatModel::new()));
	let mut state = state("What is RAG?", &["kb-a"]);

	state.enable_query_expansion = false;

	let err = pipeline.run(&mut state).await.expect_err("An empty turn must stop.");

	assert!(err.is_nothing_found());
	assert_eq!(state.query_intent, QueryIntent::General);
	assert!(state.rerank_result.is_empty());
}
