mod lexical;

pub use lexical::LexicalKnowledgeBases;

use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Instant,
};

use clap::Parser;
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;

use sift_config::Config;
use sift_pipeline::{
	ChunkType, KnowledgeBaseKind, Pipeline, PipelineState, Services, providers::HttpModelService,
};

#[derive(Debug, Parser)]
#[command(
	version = sift_cli::VERSION,
	rename_all = "kebab",
	styles = sift_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
	/// Overrides the rerank top-k of the config and the dataset.
	#[arg(long, value_name = "N")]
	pub top_k: Option<usize>,
	#[arg(long, value_name = "N", default_value_t = 1)]
	pub runs_per_query: u32,
}

#[derive(Debug, Deserialize)]
pub struct EvalDataset {
	pub name: Option<String>,
	#[serde(default)]
	pub defaults: EvalDefaults,
	pub knowledge_bases: Vec<FixtureKnowledgeBase>,
	pub queries: Vec<EvalQuery>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EvalDefaults {
	pub chat_model_id: Option<String>,
	pub rerank_model_id: Option<String>,
	#[serde(default)]
	pub knowledge_base_ids: Vec<String>,
	pub top_k: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureKnowledgeBase {
	pub id: String,
	pub name: Option<String>,
	#[serde(default)]
	pub kind: KnowledgeBaseKind,
	pub chunks: Vec<FixtureChunk>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureChunk {
	pub id: String,
	pub content: String,
	pub knowledge_id: Option<String>,
	pub title: Option<String>,
	#[serde(default)]
	pub chunk_type: ChunkType,
}

#[derive(Debug, Deserialize)]
pub struct EvalQuery {
	pub id: Option<String>,
	pub query: String,
	#[serde(default)]
	pub knowledge_base_ids: Vec<String>,
	pub expected_chunk_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EvalOutput {
	dataset: EvalDatasetInfo,
	settings: EvalSettings,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

#[derive(Debug, Serialize)]
struct EvalDatasetInfo {
	name: String,
	query_count: usize,
	knowledge_base_count: usize,
}

#[derive(Debug, Serialize)]
struct EvalSettings {
	config_path: String,
	top_k: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	runs_per_query: Option<u32>,
	generated_at: String,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct EvalSummary {
	pub avg_recall_at_k: f64,
	pub avg_precision_at_k: f64,
	pub mean_rr: f64,
	pub nothing_found_count: usize,
	pub latency_ms_p50: f64,
	pub latency_ms_p95: f64,
}

#[derive(Debug, Serialize)]
pub struct QueryReport {
	pub id: String,
	pub query: String,
	pub expected_count: usize,
	pub retrieved_count: usize,
	pub relevant_count: usize,
	pub recall_at_k: f64,
	pub precision_at_k: f64,
	pub rr: f64,
	pub nothing_found: bool,
	pub latency_ms: f64,
	pub expected_chunk_ids: Vec<String>,
	pub retrieved_chunk_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metrics {
	pub recall_at_k: f64,
	pub precision_at_k: f64,
	pub rr: f64,
	pub relevant_count: usize,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = sift_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let dataset = load_dataset(&args.dataset)?;
	let output = eval_config(&args.config, config, &dataset, &args).await?;
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

pub fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;
	let dataset: EvalDataset = serde_json::from_str(&raw)?;

	if dataset.queries.is_empty() {
		return Err(eyre::eyre!("Dataset must include at least one query."));
	}
	if dataset.knowledge_bases.is_empty() {
		return Err(eyre::eyre!("Dataset must include at least one knowledge base."));
	}

	Ok(dataset)
}

async fn eval_config(
	config_path: &Path,
	config: Config,
	dataset: &EvalDataset,
	args: &Args,
) -> color_eyre::Result<EvalOutput> {
	let config = Arc::new(config);
	let knowledge_bases = Arc::new(LexicalKnowledgeBases::new(&dataset.knowledge_bases));
	let models = Arc::new(HttpModelService::new(config.clone()));
	let pipeline = Pipeline::new(config.clone(), Services::new(models, knowledge_bases));
	let defaults = &dataset.defaults;
	let top_k = args.top_k.or(defaults.top_k).unwrap_or(config.retrieval.rerank_top_k).max(1);
	let runs_per_query = args.runs_per_query.max(1);
	let mut reports = Vec::with_capacity(dataset.queries.len());

	for (index, query) in dataset.queries.iter().enumerate() {
		let knowledge_base_ids = if query.knowledge_base_ids.is_empty() {
			if defaults.knowledge_base_ids.is_empty() {
				dataset.knowledge_bases.iter().map(|kb| kb.id.clone()).collect()
			} else {
				defaults.knowledge_base_ids.clone()
			}
		} else {
			query.knowledge_base_ids.clone()
		};
		let id = query.id.clone().unwrap_or_else(|| format!("q{}", index + 1));
		let mut state = PipelineState::new(format!("eval-{id}"), &query.query, &config.retrieval);

		state.knowledge_base_ids = knowledge_base_ids;
		state.rerank_top_k = top_k;
		state.chat_model_id = defaults.chat_model_id.clone();
		state.rerank_model_id = defaults.rerank_model_id.clone();

		let (retrieved, latency_ms) =
			run_query_n_times(&pipeline, &state, runs_per_query).await?;
		let expected: HashSet<&str> = query.expected_chunk_ids.iter().map(String::as_str).collect();
		let metrics = compute_metrics(retrieved.as_deref().unwrap_or_default(), &expected);
		let nothing_found = retrieved.is_none();

		tracing::info!(
			query_id = %id,
			recall = metrics.recall_at_k,
			rr = metrics.rr,
			nothing_found,
			latency_ms,
			"Evaluated query."
		);

		reports.push(QueryReport {
			id,
			query: query.query.clone(),
			expected_count: expected.len(),
			retrieved_count: retrieved.as_ref().map_or(0, Vec::len),
			relevant_count: metrics.relevant_count,
			recall_at_k: metrics.recall_at_k,
			precision_at_k: metrics.precision_at_k,
			rr: metrics.rr,
			nothing_found,
			latency_ms,
			expected_chunk_ids: query.expected_chunk_ids.clone(),
			retrieved_chunk_ids: retrieved.unwrap_or_default(),
		});
	}

	let summary = summarize(&reports);

	Ok(EvalOutput {
		dataset: EvalDatasetInfo {
			name: dataset.name.clone().unwrap_or_else(|| "eval".to_string()),
			query_count: reports.len(),
			knowledge_base_count: dataset.knowledge_bases.len(),
		},
		settings: EvalSettings {
			config_path: config_path.display().to_string(),
			top_k,
			runs_per_query: (runs_per_query > 1).then_some(runs_per_query),
			generated_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
		},
		summary,
		queries: reports,
	})
}

/// Runs one query `runs` times and keeps the first run's chunk ids with the mean latency.
///
/// `None` means the turn found nothing; that scores zero rather than failing the evaluation.
async fn run_query_n_times(
	pipeline: &Pipeline,
	template: &PipelineState,
	runs: u32,
) -> color_eyre::Result<(Option<Vec<String>>, f64)> {
	let mut first: Option<Option<Vec<String>>> = None;
	let mut latency_total_ms = 0.0_f64;

	for _ in 0..runs {
		let mut state = template.clone();
		let start = Instant::now();
		let outcome = pipeline.run(&mut state).await;

		latency_total_ms += start.elapsed().as_secs_f64() * 1_000.0;

		let retrieved = match outcome {
			Ok(()) => Some(unique_ids(state.rerank_result.iter().map(|hit| hit.id.clone()))),
			Err(err) if err.is_nothing_found() => None,
			Err(err) => return Err(err.into()),
		};

		first.get_or_insert(retrieved);
	}

	let retrieved = first.ok_or_else(|| eyre::eyre!("No pipeline runs were collected."))?;

	Ok((retrieved, latency_total_ms / runs.max(1) as f64))
}

fn unique_ids<I>(iter: I) -> Vec<String>
where
	I: Iterator<Item = String>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for id in iter {
		if seen.insert(id.clone()) {
			out.push(id);
		}
	}

	out
}

pub fn compute_metrics(retrieved: &[String], expected: &HashSet<&str>) -> Metrics {
	let mut relevant_count = 0_usize;
	let mut first_hit: Option<usize> = None;

	for (idx, id) in retrieved.iter().enumerate() {
		if expected.contains(id.as_str()) {
			relevant_count += 1;
			first_hit.get_or_insert(idx + 1);
		}
	}

	let rr = first_hit.map_or(0.0, |rank| 1.0 / rank as f64);
	let precision_at_k =
		if retrieved.is_empty() { 0.0 } else { relevant_count as f64 / retrieved.len() as f64 };
	let recall_at_k =
		if expected.is_empty() { 0.0 } else { relevant_count as f64 / expected.len() as f64 };

	Metrics { recall_at_k, precision_at_k, rr, relevant_count }
}

pub fn summarize(reports: &[QueryReport]) -> EvalSummary {
	let count = reports.len().max(1) as f64;
	let avg_recall_at_k = reports.iter().map(|r| r.recall_at_k).sum::<f64>() / count;
	let avg_precision_at_k = reports.iter().map(|r| r.precision_at_k).sum::<f64>() / count;
	let mean_rr = reports.iter().map(|r| r.rr).sum::<f64>() / count;
	let mut latencies: Vec<f64> = reports.iter().map(|r| r.latency_ms).collect();

	latencies.sort_by(f64::total_cmp);

	EvalSummary {
		avg_recall_at_k,
		avg_precision_at_k,
		mean_rr,
		nothing_found_count: reports.iter().filter(|r| r.nothing_found).count(),
		latency_ms_p50: percentile(&latencies, 0.50),
		latency_ms_p95: percentile(&latencies, 0.95),
	}
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}

	let clamped = percentile.clamp(0.0, 1.0);
	let pos = clamped * (values.len() as f64 - 1.0);
	let lower = pos.floor() as usize;
	let upper = pos.ceil() as usize;

	if lower == upper {
		values[lower]
	} else {
		let weight = pos - lower as f64;

		values[lower] * (1.0 - weight) + values[upper] * weight
	}
}
