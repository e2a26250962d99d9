use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};
use sift_config::ProviderConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankResult {
	/// Position of the passage in the request.
	pub index: usize,
	pub relevance_score: f64,
}

/// Scores `docs` against `query`. Results are sorted by descending relevance and only cover
/// passages the provider returned.
pub async fn rerank(
	cfg: &ProviderConfig,
	query: &str,
	docs: &[String],
) -> Result<Vec<RankResult>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": docs });
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(&json, docs.len())
}

fn parse_rerank_response(json: &Value, doc_count: usize) -> Result<Vec<RankResult>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or(Error::MissingRerankResults)?;
	let mut ranked = Vec::with_capacity(results.len());

	for (position, item) in results.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or(Error::MalformedRerankItem { position, field: "index" })? as usize;
		let relevance_score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or(Error::MalformedRerankItem { position, field: "relevance_score" })?;

		if index < doc_count {
			ranked.push(RankResult { index, relevance_score });
		}
	}

	ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

	Ok(ranked)
}
