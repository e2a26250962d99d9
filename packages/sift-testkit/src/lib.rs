//! Deterministic in-memory collaborators for driving the retrieval pipeline in tests.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{Arc, Mutex},
};

use serde_json::Value;

use sift_config::{
	Config, Expansion, Normalization, Preprocess, Providers, Rerank, Retrieval, Service, Tool, Web,
};
use sift_pipeline::{
	BoxFuture, ChatModel, ChatOptions, CompressOutcome, CompressRequest, Error, KnowledgeBase,
	KnowledgeBaseKind, KnowledgeBaseService, MatchType, ModelService, RankResult, RerankModel,
	Result, RetrievalHit, SearchParams, SessionService, TempKbState, WebResult, WebSearchConfig,
	WebSearchService,
};

type Scorer = dyn Fn(&str, &str) -> f64 + Send + Sync;

/// A config with every tunable at its default and no providers.
pub fn test_config() -> Config {
	Config {
		service: Service { log_level: "info".to_string() },
		providers: Providers::default(),
		retrieval: Retrieval::default(),
		preprocess: Preprocess::default(),
		expansion: Expansion::default(),
		normalization: Normalization::default(),
		web: Web::default(),
		rerank: Rerank::default(),
		tool: Tool::default(),
	}
}

/// A text chunk of its own document `doc-{id}` in knowledge base `knowledge_base_id`.
pub fn hit(
	id: &str,
	knowledge_base_id: &str,
	content: &str,
	score: f64,
	match_type: MatchType,
) -> RetrievalHit {
	RetrievalHit {
		id: id.to_string(),
		content: content.to_string(),
		knowledge_id: format!("doc-{id}"),
		knowledge_base_id: knowledge_base_id.to_string(),
		knowledge_title: format!("{id}.md"),
		score,
		match_type,
		..Default::default()
	}
}

/// Chat model that answers by matching a needle against the system prompt.
///
/// Rules are checked in insertion order. A call no rule matches fails.
#[derive(Default)]
pub struct ScriptedChatModel {
	rules: Vec<(String, Result<String, String>)>,
	calls: Mutex<Vec<Vec<Value>>>,
}
impl ScriptedChatModel {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reply_when(mut self, needle: &str, reply: &str) -> Self {
		self.rules.push((needle.to_string(), Ok(reply.to_string())));

		self
	}

	pub fn fail_when(mut self, needle: &str, message: &str) -> Self {
		self.rules.push((needle.to_string(), Err(message.to_string())));

		self
	}

	pub fn calls(&self) -> Vec<Vec<Value>> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	/// Calls whose system prompt contains `needle`.
	pub fn call_count(&self, needle: &str) -> usize {
		self.calls().iter().filter(|messages| system_prompt(messages).contains(needle)).count()
	}
}
impl ChatModel for ScriptedChatModel {
	fn chat<'a>(
		&'a self,
		messages: &'a [Value],
		_options: &'a ChatOptions,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			self.calls.lock().unwrap_or_else(|err| err.into_inner()).push(messages.to_vec());

			let prompt = system_prompt(messages);
			let Some((_, outcome)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle))
			else {
				return Err(Error::Provider { message: "No scripted reply.".to_string() });
			};

			outcome.clone().map_err(|message| Error::Provider { message })
		})
	}
}

/// Rerank model backed by a scoring closure over `(query, passage)`.
pub struct FakeRerankModel {
	scorer: Box<Scorer>,
	failing_queries: HashSet<String>,
	fail_all: bool,
	queries: Mutex<Vec<String>>,
}
impl FakeRerankModel {
	pub fn new(scorer: impl Fn(&str, &str) -> f64 + Send + Sync + 'static) -> Self {
		Self {
			scorer: Box::new(scorer),
			failing_queries: HashSet::new(),
			fail_all: false,
			queries: Mutex::new(Vec::new()),
		}
	}

	/// Scores a passage by the first entry whose content it starts with, zero otherwise.
	pub fn fixed(scores: Vec<(&str, f64)>) -> Self {
		let scores: Vec<(String, f64)> =
			scores.into_iter().map(|(content, score)| (content.to_string(), score)).collect();

		Self::new(move |_, passage| {
			scores
				.iter()
				.find(|(content, _)| passage.starts_with(content.as_str()))
				.map_or(0.0, |(_, score)| *score)
		})
	}

	pub fn failing() -> Self {
		Self { fail_all: true, ..Self::new(|_, _| 0.0) }
	}

	pub fn fail_for_query(mut self, query: &str) -> Self {
		self.failing_queries.insert(query.to_string());

		self
	}

	/// Queries in the order they were sent.
	pub fn queries(&self) -> Vec<String> {
		self.queries.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl RerankModel for FakeRerankModel {
	fn rerank<'a>(
		&'a self,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, Result<Vec<RankResult>>> {
		Box::pin(async move {
			self.queries.lock().unwrap_or_else(|err| err.into_inner()).push(query.to_string());

			if self.fail_all || self.failing_queries.contains(query) {
				return Err(Error::Provider { message: "Rerank service unavailable.".to_string() });
			}

			let mut results: Vec<RankResult> = passages
				.iter()
				.enumerate()
				.map(|(index, passage)| RankResult {
					index,
					relevance_score: (self.scorer)(query, passage),
				})
				.collect();

			results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

			Ok(results)
		})
	}
}

/// Model registry keyed by model id.
#[derive(Default)]
pub struct StaticModelService {
	chat: HashMap<String, Arc<dyn ChatModel>>,
	rerank: HashMap<String, Arc<dyn RerankModel>>,
}
impl StaticModelService {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_chat(mut self, model_id: &str, model: Arc<dyn ChatModel>) -> Self {
		self.chat.insert(model_id.to_string(), model);

		self
	}

	pub fn with_rerank(mut self, model_id: &str, model: Arc<dyn RerankModel>) -> Self {
		self.rerank.insert(model_id.to_string(), model);

		self
	}
}
impl ModelService for StaticModelService {
	fn chat_model<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, Result<Arc<dyn ChatModel>>> {
		Box::pin(async move {
			self.chat.get(model_id).cloned().ok_or_else(|| Error::ModelNotFound {
				message: format!("Unknown chat model {model_id}."),
			})
		})
	}

	fn rerank_model<'a>(
		&'a self,
		model_id: &'a str,
	) -> BoxFuture<'a, Result<Arc<dyn RerankModel>>> {
		Box::pin(async move {
			self.rerank.get(model_id).cloned().ok_or_else(|| Error::ModelNotFound {
				message: format!("Unknown rerank model {model_id}."),
			})
		})
	}
}

struct Fixture {
	base: KnowledgeBase,
	hits: Vec<RetrievalHit>,
}

/// Knowledge bases that answer every query with a fixed hit list.
///
/// Hits registered for a specific query text replace the default list for that query. The
/// disable flags of a search drop the matching retrieval mode and `match_count` truncates.
#[derive(Default)]
pub struct InMemoryKnowledgeBases {
	fixtures: BTreeMap<String, Fixture>,
	by_query: HashMap<(String, String), Vec<RetrievalHit>>,
	failing: HashSet<String>,
	calls: Mutex<Vec<(String, SearchParams)>>,
}
impl InMemoryKnowledgeBases {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_knowledge_base(mut self, id: &str, hits: Vec<RetrievalHit>) -> Self {
		let base = KnowledgeBase {
			id: id.to_string(),
			name: id.to_string(),
			kind: KnowledgeBaseKind::Document,
			graph: None,
		};

		self.fixtures.insert(id.to_string(), Fixture { base, hits });

		self
	}

	/// Registers a knowledge base with full metadata, such as its kind or graph schema.
	pub fn with_base(mut self, base: KnowledgeBase, hits: Vec<RetrievalHit>) -> Self {
		self.fixtures.insert(base.id.clone(), Fixture { base, hits });

		self
	}

	pub fn with_query_hits(mut self, id: &str, query: &str, hits: Vec<RetrievalHit>) -> Self {
		self.by_query.insert((id.to_string(), query.to_string()), hits);

		self
	}

	/// Searches against `id` fail. Metadata lookups still succeed.
	pub fn failing(mut self, id: &str) -> Self {
		self.failing.insert(id.to_string());

		self
	}

	pub fn calls(&self) -> Vec<(String, SearchParams)> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl KnowledgeBaseService for InMemoryKnowledgeBases {
	fn hybrid_search<'a>(
		&'a self,
		knowledge_base_id: &'a str,
		params: &'a SearchParams,
	) -> BoxFuture<'a, Result<Vec<RetrievalHit>>> {
		Box::pin(async move {
			self.calls
				.lock()
				.unwrap_or_else(|err| err.into_inner())
				.push((knowledge_base_id.to_string(), params.clone()));

			if self.failing.contains(knowledge_base_id) {
				return Err(Error::Search {
					message: format!("Knowledge base {knowledge_base_id} is unavailable."),
				});
			}

			let Some(fixture) = self.fixtures.get(knowledge_base_id) else {
				return Err(Error::Search {
					message: format!("Unknown knowledge base {knowledge_base_id}."),
				});
			};
			let key = (knowledge_base_id.to_string(), params.query_text.clone());
			let source = self.by_query.get(&key).unwrap_or(&fixture.hits);
			let mut hits: Vec<RetrievalHit> = source
				.iter()
				.filter(|hit| match hit.match_type {
					MatchType::Embedding => !params.disable_vector_match,
					MatchType::Keywords => !params.disable_keywords_match,
					_ => true,
				})
				.cloned()
				.collect();

			if params.match_count > 0 {
				hits.truncate(params.match_count);
			}

			Ok(hits)
		})
	}

	fn knowledge_base<'a>(
		&'a self,
		knowledge_base_id: &'a str,
	) -> BoxFuture<'a, Result<KnowledgeBase>> {
		Box::pin(async move {
			let fixture = self.fixtures.get(knowledge_base_id).ok_or_else(|| Error::Search {
				message: format!("Unknown knowledge base {knowledge_base_id}."),
			})?;

			Ok(fixture.base.clone())
		})
	}
}

#[derive(Clone, Debug, Default)]
enum CompressMode {
	#[default]
	PassThrough,
	Replace(Vec<WebResult>),
	Fail,
}

/// Web search that returns canned results and records compression requests.
#[derive(Default)]
pub struct FakeWebSearch {
	results: Vec<WebResult>,
	fail_search: bool,
	compress: CompressMode,
	requests: Mutex<Vec<CompressRequest>>,
}
impl FakeWebSearch {
	pub fn new(results: Vec<WebResult>) -> Self {
		Self { results, ..Self::default() }
	}

	pub fn failing() -> Self {
		Self { fail_search: true, ..Self::default() }
	}

	pub fn compressing_to(mut self, results: Vec<WebResult>) -> Self {
		self.compress = CompressMode::Replace(results);

		self
	}

	pub fn failing_compression(mut self) -> Self {
		self.compress = CompressMode::Fail;

		self
	}

	pub fn compress_requests(&self) -> Vec<CompressRequest> {
		self.requests.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl WebSearchService for FakeWebSearch {
	fn search<'a>(
		&'a self,
		config: &'a WebSearchConfig,
		_query: &'a str,
	) -> BoxFuture<'a, Result<Vec<WebResult>>> {
		Box::pin(async move {
			if self.fail_search {
				return Err(Error::Search { message: "Web search provider failed.".to_string() });
			}

			let mut results = self.results.clone();

			if config.max_results > 0 {
				results.truncate(config.max_results);
			}

			Ok(results)
		})
	}

	fn compress_with_rag<'a>(
		&'a self,
		request: CompressRequest,
	) -> BoxFuture<'a, Result<CompressOutcome>> {
		Box::pin(async move {
			self.requests.lock().unwrap_or_else(|err| err.into_inner()).push(request.clone());

			let results = match &self.compress {
				CompressMode::PassThrough => request.results.clone(),
				CompressMode::Replace(results) => results.clone(),
				CompressMode::Fail => {
					return Err(Error::Search {
						message: "Compression backend failed.".to_string(),
					});
				},
			};
			let mut state = request.state;

			state.temp_kb_id.get_or_insert_with(|| format!("temp-{}", request.session_id));
			state.seen_urls.extend(request.results.iter().map(|result| result.url.clone()));

			Ok(CompressOutcome { results, state })
		})
	}
}

/// Session store for temporary web knowledge base markers.
#[derive(Default)]
pub struct InMemorySessionStore {
	states: Mutex<HashMap<String, TempKbState>>,
	fail_load: bool,
}
impl InMemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn failing_load() -> Self {
		Self { fail_load: true, ..Self::default() }
	}

	pub fn state(&self, session_id: &str) -> Option<TempKbState> {
		self.states.lock().unwrap_or_else(|err| err.into_inner()).get(session_id).cloned()
	}
}
impl SessionService for InMemorySessionStore {
	fn web_search_temp_kb_state<'a>(
		&'a self,
		session_id: &'a str,
	) -> BoxFuture<'a, Result<TempKbState>> {
		Box::pin(async move {
			if self.fail_load {
				return Err(Error::Session { message: "Session store is offline.".to_string() });
			}

			Ok(self.state(session_id).unwrap_or_default())
		})
	}

	fn save_web_search_temp_kb_state<'a>(
		&'a self,
		session_id: &'a str,
		state: &'a TempKbState,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.states
				.lock()
				.unwrap_or_else(|err| err.into_inner())
				.insert(session_id.to_string(), state.clone());

			Ok(())
		})
	}
}

fn system_prompt(messages: &[Value]) -> &str {
	messages
		.iter()
		.find(|message| message.get("role").and_then(Value::as_str) == Some("system"))
		.and_then(|message| message.get("content"))
		.and_then(Value::as_str)
		.unwrap_or_default()
}
