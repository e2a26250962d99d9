use std::{
	collections::{BTreeMap, HashMap},
	fmt::Write as _,
	sync::Arc,
};

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinSet;

use crate::{
	BoxFuture, Error, KnowledgeBaseService, Result,
	tool::{self, Tool, ToolResult},
	types::{GraphExtraction, RetrievalHit, SearchParams},
};
use sift_config::Config;

const STAGE: &str = "GraphQueryTool";
const DESCRIPTION: &str = "Queries knowledge bases that have graph extraction configured, for \
relationships between entities, related concepts and how parts of a system connect. Pass 1-10 \
`knowledge_base_ids` and a `query` naming an entity, a relation or a concept. Knowledge bases \
without graph extraction are reported and skipped. Results are deduplicated across knowledge \
bases and sorted by relevance; use knowledge_search for plain text retrieval.";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphQueryArgs {
	knowledge_base_ids: Vec<String>,
	query: String,
}

/// What one knowledge base contributed to a graph query.
#[derive(Debug)]
struct GraphOutcome {
	knowledge_base_id: String,
	result: std::result::Result<(GraphExtraction, Vec<RetrievalHit>), String>,
}

/// The `query_knowledge_graph` agent tool.
pub struct GraphQueryTool {
	config: Arc<Config>,
	knowledge_bases: Arc<dyn KnowledgeBaseService>,
}
impl GraphQueryTool {
	pub fn new(config: Arc<Config>, knowledge_bases: Arc<dyn KnowledgeBaseService>) -> Self {
		Self { config, knowledge_bases }
	}

	/// One task per knowledge base. Outcomes come back in input order.
	async fn query_all(&self, knowledge_base_ids: &[String], query: &str) -> Vec<GraphOutcome> {
		let params = SearchParams {
			query_text: query.to_string(),
			match_count: self.config.tool.graph_match_count,
			..Default::default()
		};
		let mut slots: Vec<Option<GraphOutcome>> =
			std::iter::repeat_with(|| None).take(knowledge_base_ids.len()).collect();
		let mut tasks = JoinSet::new();

		for (slot, id) in knowledge_base_ids.iter().enumerate() {
			let knowledge_bases = self.knowledge_bases.clone();
			let knowledge_base_id = id.clone();
			let params = params.clone();

			tasks.spawn(async move {
				let result = query_one(knowledge_bases.as_ref(), &knowledge_base_id, &params).await;

				(slot, GraphOutcome { knowledge_base_id, result })
			});
		}

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((slot, outcome)) => slots[slot] = Some(outcome),
				Err(err) => {
					tracing::warn!(
						stage = STAGE,
						action = "task_join_error",
						error = %err,
						"Graph query task aborted."
					);
				},
			}
		}

		slots
			.into_iter()
			.zip(knowledge_base_ids)
			.map(|(outcome, id)| {
				outcome.unwrap_or_else(|| GraphOutcome {
					knowledge_base_id: id.clone(),
					result: Err("Query task aborted.".to_string()),
				})
			})
			.collect()
	}
}
impl Tool for GraphQueryTool {
	fn name(&self) -> &'static str {
		"query_knowledge_graph"
	}

	fn description(&self) -> &'static str {
		DESCRIPTION
	}

	fn parameters(&self) -> Value {
		json!({
			"type": "object",
			"required": ["knowledge_base_ids", "query"],
			"properties": {
				"knowledge_base_ids": {
					"type": "array",
					"description": "Knowledge base ids to query.",
					"items": { "type": "string" },
					"minItems": 1,
					"maxItems": 10
				},
				"query": {
					"type": "string",
					"description": "Entity name or query text."
				}
			}
		})
	}

	fn execute<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<ToolResult>> {
		Box::pin(async move {
			let args: GraphQueryArgs = tool::parse_args(self.name(), args)?;
			let knowledge_base_ids = tool::trimmed_non_empty(args.knowledge_base_ids);
			let query = args.query.trim().to_string();

			if knowledge_base_ids.is_empty() {
				return Err(Error::InvalidRequest {
					message: "knowledge_base_ids must contain at least one id.".to_string(),
				});
			}
			if query.is_empty() {
				return Err(Error::InvalidRequest { message: "query is required.".to_string() });
			}

			tracing::info!(
				stage = STAGE,
				action = "input",
				kb_ids = %knowledge_base_ids.join(","),
				query = %sift_domain::text::truncate_for_log(&query),
				"Graph query started."
			);

			let outcomes = self.query_all(&knowledge_base_ids, &query).await;

			Ok(format_output(outcomes, &knowledge_base_ids, &query))
		})
	}
}

async fn query_one(
	knowledge_bases: &dyn KnowledgeBaseService,
	knowledge_base_id: &str,
	params: &SearchParams,
) -> std::result::Result<(GraphExtraction, Vec<RetrievalHit>), String> {
	let kb = knowledge_bases
		.knowledge_base(knowledge_base_id)
		.await
		.map_err(|err| format!("Knowledge base lookup failed: {err}"))?;
	let Some(graph) = kb.graph.filter(GraphExtraction::is_configured) else {
		return Err("Graph extraction is not configured.".to_string());
	};
	let hits = knowledge_bases
		.hybrid_search(knowledge_base_id, params)
		.await
		.map_err(|err| format!("Query failed: {err}"))?;

	Ok((graph, hits))
}

/// Keeps the higher-scoring copy of each chunk id at its first position, then sorts by score.
fn merge_graph_hits(per_kb: Vec<Vec<RetrievalHit>>) -> Vec<RetrievalHit> {
	let mut positions: HashMap<String, usize> = HashMap::new();
	let mut merged: Vec<RetrievalHit> = Vec::new();

	for hit in per_kb.into_iter().flatten() {
		match positions.get(&hit.id) {
			Some(&idx) =>
				if hit.score > merged[idx].score {
					merged[idx] = hit;
				},
			None => {
				positions.insert(hit.id.clone(), merged.len());
				merged.push(hit);
			},
		}
	}

	merged.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));

	merged
}

fn relevance_level(score: f64) -> &'static str {
	if score >= 0.8 {
		"high"
	} else if score >= 0.6 {
		"medium"
	} else {
		"low"
	}
}

fn format_output(
	outcomes: Vec<GraphOutcome>,
	knowledge_base_ids: &[String],
	query: &str,
) -> ToolResult {
	let mut errors = Vec::new();
	let mut graph_configs: BTreeMap<String, GraphExtraction> = BTreeMap::new();
	let mut kb_counts: BTreeMap<String, usize> = BTreeMap::new();
	let mut per_kb = Vec::with_capacity(outcomes.len());

	for outcome in outcomes {
		match outcome.result {
			Ok((graph, hits)) => {
				kb_counts.insert(outcome.knowledge_base_id.clone(), hits.len());
				graph_configs.insert(outcome.knowledge_base_id, graph);
				per_kb.push(hits);
			},
			Err(err) => {
				tracing::warn!(
					stage = STAGE,
					action = "kb_error",
					kb_id = %outcome.knowledge_base_id,
					error = %err,
					"Graph query failed for a knowledge base."
				);

				errors.push(format!("KB {}: {err}", outcome.knowledge_base_id));
			},
		}
	}

	let results = merge_graph_hits(per_kb);

	tracing::info!(
		stage = STAGE,
		action = "output",
		result_count = results.len(),
		error_count = errors.len(),
		"Graph query finished."
	);

	if results.is_empty() {
		return ToolResult {
			success: true,
			output: "No related graph information found.".to_string(),
			data: json!({
				"knowledge_base_ids": knowledge_base_ids,
				"query": query,
				"results": [],
				"graph_configs": graph_configs,
				"errors": errors,
			}),
		};
	}

	let mut output = String::from("=== Knowledge Graph Query ===\n\n");

	let _ = writeln!(output, "Query: {query}");
	let _ = writeln!(output, "Knowledge bases: {}", knowledge_base_ids.join(", "));
	let _ = writeln!(output, "Found {} results (deduplicated)\n", results.len());

	if !errors.is_empty() {
		output.push_str("=== Partial Failures ===\n");

		for err in &errors {
			let _ = writeln!(output, "  - {err}");
		}

		output.push('\n');
	}

	output.push_str("=== Graph Configuration ===\n\n");

	for (kb_id, graph) in &graph_configs {
		let _ = writeln!(output, "Knowledge base [{kb_id}]:");

		if graph.nodes.is_empty() {
			output.push_str("  No entity types configured\n");
		} else {
			let _ = writeln!(
				output,
				"  Entity types ({}): {}",
				graph.nodes.len(),
				graph.nodes.join(", ")
			);
		}
		if graph.relations.is_empty() {
			output.push_str("  No relation types configured\n");
		} else {
			let _ = writeln!(
				output,
				"  Relation types ({}): {}",
				graph.relations.len(),
				graph.relations.join(", ")
			);
		}

		output.push('\n');
	}

	output.push_str("=== Knowledge Base Coverage ===\n");

	for (kb_id, count) in &kb_counts {
		let _ = writeln!(output, "  - {kb_id}: {count} results");
	}

	output.push_str("\n=== Results ===\n\n");

	let mut formatted = Vec::with_capacity(results.len());
	let mut current_knowledge: Option<&str> = None;

	for (idx, hit) in results.iter().enumerate() {
		if current_knowledge != Some(hit.knowledge_id.as_str()) {
			current_knowledge = Some(hit.knowledge_id.as_str());

			if idx > 0 {
				output.push('\n');
			}

			let _ = writeln!(output, "[Source Document: {}]\n", hit.knowledge_title);
		}

		let level = relevance_level(hit.score);
		let _ = write!(
			output,
			"Result #{}:\n  Relevance: {:.2} ({level})\n  Match type: {}\n  Content: {}\n  \
			 chunk_id: {}\n\n",
			idx + 1,
			hit.score,
			hit.match_type.as_str(),
			hit.content,
			hit.id
		);

		formatted.push(json!({
			"result_index": idx + 1,
			"chunk_id": hit.id,
			"content": hit.content,
			"score": hit.score,
			"relevance_level": level,
			"knowledge_id": hit.knowledge_id,
			"knowledge_title": hit.knowledge_title,
			"match_type": hit.match_type.as_str(),
		}));
	}

	ToolResult {
		success: true,
		output,
		data: json!({
			"knowledge_base_ids": knowledge_base_ids,
			"query": query,
			"results": formatted,
			"count": results.len(),
			"kb_counts": kb_counts,
			"graph_configs": graph_configs,
			"has_graph_config": !graph_configs.is_empty(),
			"errors": errors,
			"display_type": "graph_query_results",
		}),
	}
}
