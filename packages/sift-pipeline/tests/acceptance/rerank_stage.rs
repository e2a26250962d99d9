use std::sync::Arc;

use sift_pipeline::{Error, EventType, MatchType, PipelineState, Stage, rerank::Rerank};
use sift_testkit::{FakeRerankModel, StaticModelService, hit};

use super::{config, ids, run_stage, state};

fn rerank_stage(model: Arc<FakeRerankModel>) -> Arc<dyn Stage> {
	let models = StaticModelService::new().with_rerank(super::RERANK_MODEL, model);

	Arc::new(Rerank::new(config(), Arc::new(models)))
}

fn reset_state() -> PipelineState {
	let mut state = state("How To Reset", &["kb-a"]);

	state.processed_query = "how to reset".to_string();

	state
}

#[tokio::test]
async fn history_hits_pass_a_relieved_threshold() {
	let model = Arc::new(FakeRerankModel::fixed(vec![("alpha", 0.52), ("beta", 0.52)]));
	let mut state = reset_state();

	state.rerank_threshold = 0.6;
	state.search_result = vec![
		hit("k1", "kb-a", "alpha text", 0.9, MatchType::Keywords),
		hit("h1", "kb-a", "beta text", 0.9, MatchType::History),
	];

	run_stage(rerank_stage(model), EventType::ChunkRerank, &mut state)
		.await
		.expect("The history hit must survive.");

	assert_eq!(ids(&state.rerank_result), vec!["h1"]);
}

#[tokio::test]
async fn composite_score_replaces_the_model_score() {
	let model = Arc::new(FakeRerankModel::fixed(vec![("alpha", 0.9)]));
	let mut state = reset_state();

	state.search_result = vec![hit("e1", "kb-a", "alpha text", 0.8, MatchType::Embedding)];

	run_stage(rerank_stage(model), EventType::ChunkRerank, &mut state)
		.await
		.expect("Rerank must succeed.");

	let selected = &state.rerank_result[0];

	// (0.6 * 0.9 + 0.3 * 0.8 + 0.1) * 1.05
	assert!((selected.score - 0.924).abs() < 1e-9, "Unexpected score: {}", selected.score);
	assert_eq!(selected.metadata.get("base_score").map(String::as_str), Some("0.8000"));
}

#[tokio::test]
async fn failed_attempt_falls_back_to_the_processed_query() {
	let model =
		Arc::new(FakeRerankModel::fixed(vec![("alpha", 0.9)]).fail_for_query("How To Reset"));
	let mut state = reset_state();

	state.search_result = vec![hit("e1", "kb-a", "alpha text", 0.8, MatchType::Embedding)];

	run_stage(rerank_stage(model.clone()), EventType::ChunkRerank, &mut state)
		.await
		.expect("The processed query must rescue the turn.");

	assert_eq!(ids(&state.rerank_result), vec!["e1"]);
	assert_eq!(model.queries(), vec!["How To Reset", "how to reset"]);
}

#[tokio::test]
async fn nothing_above_threshold_ends_the_turn() {
	let model = Arc::new(FakeRerankModel::new(|_, _| 0.1));
	let mut state = reset_state();

	state.search_result = vec![hit("e1", "kb-a", "alpha text", 0.8, MatchType::Embedding)];

	let err = run_stage(rerank_stage(model.clone()), EventType::ChunkRerank, &mut state)
		.await
		.expect_err("Low scores must stop the turn.");

	assert!(matches!(err, Error::NothingFound { stage: "rerank" }));
	// The raw query equals the rewrite query and is not retried.
	assert_eq!(model.queries(), vec!["How To Reset", "how to reset"]);
	assert!(state.rerank_result.is_empty());
}

#[tokio::test]
async fn selection_is_capped_at_rerank_top_k() {
	let model = Arc::new(FakeRerankModel::new(|_, _| 0.9));
	let mut state = reset_state();

	state.rerank_top_k = 2;
	state.search_result = vec![
		hit("e1", "kb-a", "install the agent", 0.9, MatchType::Embedding),
		hit("e2", "kb-a", "configure logging output", 0.8, MatchType::Embedding),
		hit("e3", "kb-a", "rotate api keys", 0.7, MatchType::Embedding),
	];

	run_stage(rerank_stage(model), EventType::ChunkRerank, &mut state)
		.await
		.expect("Rerank must succeed.");

	assert_eq!(ids(&state.rerank_result), vec!["e1", "e2"]);
}

#[tokio::test]
async fn missing_rerank_model_is_a_configuration_error() {
	let model = Arc::new(FakeRerankModel::new(|_, _| 0.9));
	let mut state = reset_state();

	state.rerank_model_id = None;
	state.search_result = vec![hit("e1", "kb-a", "alpha text", 0.8, MatchType::Embedding)];

	let err = run_stage(rerank_stage(model.clone()), EventType::ChunkRerank, &mut state)
		.await
		.expect_err("A turn without a rerank model must fail.");

	assert!(matches!(err, Error::ModelNotConfigured { .. }));
	assert!(model.queries().is_empty());

	state.rerank_model_id = Some("unknown".to_string());

	let err = run_stage(rerank_stage(model), EventType::ChunkRerank, &mut state)
		.await
		.expect_err("An unknown rerank model must fail.");

	assert!(matches!(err, Error::ModelNotFound { .. }));
}

#[tokio::test]
async fn empty_search_result_is_nothing_found_without_a_model_call() {
	let model = Arc::new(FakeRerankModel::new(|_, _| 0.9));
	let mut state = reset_state();

	state.rerank_model_id = None;
	state.rerank_result = vec![hit("stale", "kb-a", "left over", 0.9, MatchType::Embedding)];

	let err = run_stage(rerank_stage(model.clone()), EventType::ChunkRerank, &mut state)
		.await
		.expect_err("An empty candidate set must stop the turn.");

	assert!(matches!(err, Error::NothingFound { stage: "rerank" }));
	assert!(state.rerank_result.is_empty());
	assert!(model.queries().is_empty());
}
