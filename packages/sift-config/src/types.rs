use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	#[serde(default)]
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub preprocess: Preprocess,
	#[serde(default)]
	pub expansion: Expansion,
	#[serde(default)]
	pub normalization: Normalization,
	#[serde(default)]
	pub web: Web,
	#[serde(default)]
	pub rerank: Rerank,
	#[serde(default)]
	pub tool: Tool,
}
impl Config {
	pub fn chat_provider(&self, provider_id: &str) -> Option<&LlmProviderConfig> {
		self.providers.chat.iter().find(|provider| provider.provider_id == provider_id)
	}

	pub fn rerank_provider(&self, provider_id: &str) -> Option<&ProviderConfig> {
		self.providers.rerank.iter().find(|provider| provider.provider_id == provider_id)
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Providers {
	pub chat: Vec<LlmProviderConfig>,
	pub rerank: Vec<ProviderConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Per-turn retrieval defaults. A caller may override any of them on the pipeline state.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub vector_threshold: f64,
	pub keyword_threshold: f64,
	pub embedding_top_k: usize,
	pub rerank_top_k: usize,
	pub rerank_threshold: f64,
	pub enable_query_expansion: bool,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			vector_threshold: 0.5,
			keyword_threshold: 0.3,
			embedding_top_k: 10,
			rerank_top_k: 10,
			rerank_threshold: 0.3,
			enable_query_expansion: true,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Preprocess {
	pub max_cjk_tokens: usize,
	pub intent_max_tokens: u32,
}
impl Default for Preprocess {
	fn default() -> Self {
		Self { max_cjk_tokens: 12, intent_max_tokens: 64 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Expansion {
	pub max_variants: usize,
	pub max_concurrency: usize,
	/// Fraction of the configured keyword threshold used for variant searches.
	pub keyword_threshold_ratio: f64,
	pub match_count_multiplier: usize,
	pub max_completion_tokens: u32,
}
impl Default for Expansion {
	fn default() -> Self {
		Self {
			max_variants: 5,
			max_concurrency: 16,
			keyword_threshold_ratio: 0.8,
			match_count_multiplier: 2,
			max_completion_tokens: 200,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Normalization {
	/// Batches at least this large use percentile bounds instead of min/max.
	pub percentile_min_batch: usize,
	pub low_percentile: usize,
	pub high_percentile: usize,
}
impl Default for Normalization {
	fn default() -> Self {
		Self { percentile_min_batch: 10, low_percentile: 5, high_percentile: 95 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Web {
	pub default_score: f64,
}
impl Default for Web {
	fn default() -> Self {
		Self { default_score: 0.6 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub history_threshold_relief: f64,
	pub history_threshold_floor: f64,
	pub composite: RerankComposite,
	pub mmr: RerankMmr,
}
impl Default for Rerank {
	fn default() -> Self {
		Self {
			history_threshold_relief: 0.1,
			history_threshold_floor: 0.5,
			composite: RerankComposite::default(),
			mmr: RerankMmr::default(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RerankComposite {
	pub model_weight: f64,
	pub base_weight: f64,
	pub source_weight: f64,
	pub web_source_trust: f64,
	pub definition_summary_boost: f64,
	pub howto_long_boost: f64,
	/// Characters a chunk must span before the how-to boost applies.
	pub howto_min_span: i64,
	pub position_prior_cap: f64,
}
impl Default for RerankComposite {
	fn default() -> Self {
		Self {
			model_weight: 0.6,
			base_weight: 0.3,
			source_weight: 0.1,
			web_source_trust: 0.95,
			definition_summary_boost: 1.05,
			howto_long_boost: 1.03,
			howto_min_span: 300,
			position_prior_cap: 0.05,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RerankMmr {
	pub lambda: f64,
}
impl Default for RerankMmr {
	fn default() -> Self {
		Self { lambda: 0.7 }
	}
}

/// Defaults for the agent-facing knowledge search and graph query tools.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Tool {
	pub top_k: usize,
	pub vector_threshold: f64,
	pub keyword_threshold: f64,
	pub min_score: f64,
	pub max_queries: usize,
	pub rerank_batch_size: usize,
	pub max_passage_chars: usize,
	pub mmr_lambda: f64,
	pub graph_match_count: usize,
}
impl Default for Tool {
	fn default() -> Self {
		Self {
			top_k: 5,
			vector_threshold: 0.6,
			keyword_threshold: 0.5,
			min_score: 0.3,
			max_queries: 5,
			rerank_batch_size: 15,
			max_passage_chars: 800,
			mmr_lambda: 0.7,
			graph_match_count: 10,
		}
	}
}
