mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Expansion, LlmProviderConfig, Normalization, Preprocess, ProviderConfig, Providers,
	Rerank, RerankComposite, RerankMmr, Retrieval, Service, Tool, Web,
};

use std::{collections::HashSet, fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}

	for (label, value) in [
		("retrieval.vector_threshold", cfg.retrieval.vector_threshold),
		("retrieval.keyword_threshold", cfg.retrieval.keyword_threshold),
		("retrieval.rerank_threshold", cfg.retrieval.rerank_threshold),
		("rerank.history_threshold_floor", cfg.rerank.history_threshold_floor),
		("rerank.mmr.lambda", cfg.rerank.mmr.lambda),
		("web.default_score", cfg.web.default_score),
		("tool.vector_threshold", cfg.tool.vector_threshold),
		("tool.keyword_threshold", cfg.tool.keyword_threshold),
		("tool.min_score", cfg.tool.min_score),
		("tool.mmr_lambda", cfg.tool.mmr_lambda),
	] {
		check_unit_range(label, value)?;
	}

	for (label, value) in [
		("retrieval.embedding_top_k", cfg.retrieval.embedding_top_k),
		("retrieval.rerank_top_k", cfg.retrieval.rerank_top_k),
		("preprocess.max_cjk_tokens", cfg.preprocess.max_cjk_tokens),
		("expansion.max_variants", cfg.expansion.max_variants),
		("expansion.max_concurrency", cfg.expansion.max_concurrency),
		("expansion.match_count_multiplier", cfg.expansion.match_count_multiplier),
		("tool.top_k", cfg.tool.top_k),
		("tool.max_queries", cfg.tool.max_queries),
		("tool.rerank_batch_size", cfg.tool.rerank_batch_size),
		("tool.max_passage_chars", cfg.tool.max_passage_chars),
		("tool.graph_match_count", cfg.tool.graph_match_count),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	let ratio = cfg.expansion.keyword_threshold_ratio;

	if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
		return Err(Error::Validation {
			message: "expansion.keyword_threshold_ratio must be in the range (0.0, 1.0]."
				.to_string(),
		});
	}

	let normalization = &cfg.normalization;

	if normalization.low_percentile >= normalization.high_percentile
		|| normalization.high_percentile > 100
	{
		return Err(Error::Validation {
			message: "normalization percentiles must satisfy low < high <= 100.".to_string(),
		});
	}
	if normalization.percentile_min_batch < 2 {
		return Err(Error::Validation {
			message: "normalization.percentile_min_batch must be at least 2.".to_string(),
		});
	}

	let composite = &cfg.rerank.composite;

	for (label, value) in [
		("rerank.composite.model_weight", composite.model_weight),
		("rerank.composite.base_weight", composite.base_weight),
		("rerank.composite.source_weight", composite.source_weight),
		("rerank.composite.web_source_trust", composite.web_source_trust),
		("rerank.composite.definition_summary_boost", composite.definition_summary_boost),
		("rerank.composite.howto_long_boost", composite.howto_long_boost),
		("rerank.composite.position_prior_cap", composite.position_prior_cap),
		("rerank.history_threshold_relief", cfg.rerank.history_threshold_relief),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if value < 0.0 {
			return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
		}
	}

	let mut seen = HashSet::new();

	for (label, provider_id, api_key) in cfg
		.providers
		.chat
		.iter()
		.map(|p| ("chat", p.provider_id.as_str(), p.api_key.as_str()))
		.chain(
			cfg.providers
				.rerank
				.iter()
				.map(|p| ("rerank", p.provider_id.as_str(), p.api_key.as_str())),
		) {
		if provider_id.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} provider_id must be non-empty."),
			});
		}
		if api_key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} {provider_id} api_key must be non-empty."),
			});
		}
		if !seen.insert((label, provider_id)) {
			return Err(Error::Validation {
				message: format!("Provider {label} {provider_id} is declared more than once."),
			});
		}
	}

	Ok(())
}

fn check_unit_range(label: &str, value: f64) -> Result<()> {
	if !value.is_finite() {
		return Err(Error::Validation { message: format!("{label} must be a finite number.") });
	}
	if !(0.0..=1.0).contains(&value) {
		return Err(Error::Validation {
			message: format!("{label} must be in the range 0.0-1.0."),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for provider in &mut cfg.providers.chat {
		trim_api_base(&mut provider.api_base);
	}
	for provider in &mut cfg.providers.rerank {
		trim_api_base(&mut provider.api_base);
	}
}

fn trim_api_base(api_base: &mut String) {
	while api_base.ends_with('/') {
		api_base.pop();
	}
}
