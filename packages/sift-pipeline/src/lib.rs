pub mod error;
pub mod event;
pub mod pipeline;
pub mod preprocess;
pub mod providers;
pub mod rerank;
pub mod search;
pub mod state;
pub mod time_serde;
pub mod tool;
pub mod types;

pub use error::{Error, Result};
pub use event::{EventManager, EventType, Next, Stage};
pub use pipeline::Pipeline;
pub use sift_providers::{ChatOptions, RankResult};
pub use state::PipelineState;
pub use types::{
	ChunkType, CompressOutcome, CompressRequest, GraphExtraction, HistoryTurn, KnowledgeBase,
	KnowledgeBaseKind, MatchType, QueryIntent, RetrievalHit, SearchParams, TempKbState, WebResult,
	WebSearchConfig,
};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ChatModel
where
	Self: Send + Sync,
{
	fn chat<'a>(
		&'a self,
		messages: &'a [Value],
		options: &'a ChatOptions,
	) -> BoxFuture<'a, Result<String>>;
}

pub trait RerankModel
where
	Self: Send + Sync,
{
	/// Returns relevance scores sorted by descending relevance. `index` refers to `passages`.
	fn rerank<'a>(
		&'a self,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, Result<Vec<RankResult>>>;
}

pub trait ModelService
where
	Self: Send + Sync,
{
	fn chat_model<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, Result<Arc<dyn ChatModel>>>;

	fn rerank_model<'a>(&'a self, model_id: &'a str)
	-> BoxFuture<'a, Result<Arc<dyn RerankModel>>>;
}

pub trait KnowledgeBaseService
where
	Self: Send + Sync,
{
	fn hybrid_search<'a>(
		&'a self,
		knowledge_base_id: &'a str,
		params: &'a SearchParams,
	) -> BoxFuture<'a, Result<Vec<RetrievalHit>>>;

	fn knowledge_base<'a>(
		&'a self,
		knowledge_base_id: &'a str,
	) -> BoxFuture<'a, Result<KnowledgeBase>>;
}

pub trait WebSearchService
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		config: &'a WebSearchConfig,
		query: &'a str,
	) -> BoxFuture<'a, Result<Vec<WebResult>>>;

	/// Folds web pages into the session's temporary knowledge base and returns the passages
	/// most relevant to `questions` together with the updated marker.
	fn compress_with_rag<'a>(
		&'a self,
		request: CompressRequest,
	) -> BoxFuture<'a, Result<CompressOutcome>>;
}

pub trait SessionService
where
	Self: Send + Sync,
{
	fn web_search_temp_kb_state<'a>(
		&'a self,
		session_id: &'a str,
	) -> BoxFuture<'a, Result<TempKbState>>;

	fn save_web_search_temp_kb_state<'a>(
		&'a self,
		session_id: &'a str,
		state: &'a TempKbState,
	) -> BoxFuture<'a, Result<()>>;
}

/// Collaborators the pipeline stages call out to.
#[derive(Clone)]
pub struct Services {
	pub models: Arc<dyn ModelService>,
	pub knowledge_bases: Arc<dyn KnowledgeBaseService>,
	pub web_search: Option<Arc<dyn WebSearchService>>,
	pub sessions: Option<Arc<dyn SessionService>>,
}
impl Services {
	pub fn new(
		models: Arc<dyn ModelService>,
		knowledge_bases: Arc<dyn KnowledgeBaseService>,
	) -> Self {
		Self { models, knowledge_bases, web_search: None, sessions: None }
	}

	pub fn with_web_search(
		mut self,
		web_search: Arc<dyn WebSearchService>,
		sessions: Arc<dyn SessionService>,
	) -> Self {
		self.web_search = Some(web_search);
		self.sessions = Some(sessions);

		self
	}
}
