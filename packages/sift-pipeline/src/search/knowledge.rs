use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
	KnowledgeBaseService,
	types::{RetrievalHit, SearchParams},
};
use sift_domain::text;

/// One hybrid-search call against one knowledge base.
#[derive(Clone, Debug)]
pub struct SearchJob {
	pub knowledge_base_id: String,
	/// Which query form produced the job, for logs.
	pub query_kind: &'static str,
	pub params: SearchParams,
}
impl SearchJob {
	pub fn new(
		knowledge_base_id: impl Into<String>,
		query_kind: &'static str,
		params: SearchParams,
	) -> Self {
		Self { knowledge_base_id: knowledge_base_id.into(), query_kind, params }
	}
}

/// One job per knowledge base, all sharing `params`.
pub fn jobs_for_query(
	knowledge_base_ids: &[String],
	query_kind: &'static str,
	params: &SearchParams,
) -> Vec<SearchJob> {
	knowledge_base_ids.iter().map(|id| SearchJob::new(id, query_kind, params.clone())).collect()
}

/// Runs every job as its own task and waits for all of them.
///
/// A failing job is logged and skipped; it never cancels its siblings. When `max_in_flight` is
/// set, at most that many calls are outstanding at once. Results come back in job order whatever
/// order the calls finish in, so merges downstream are deterministic.
pub async fn fan_out(
	knowledge_bases: &Arc<dyn KnowledgeBaseService>,
	jobs: Vec<SearchJob>,
	max_in_flight: Option<usize>,
	stage: &'static str,
) -> Vec<(SearchJob, Vec<RetrievalHit>)> {
	let semaphore = max_in_flight.map(|permits| Arc::new(Semaphore::new(permits.max(1))));
	let mut slots: Vec<Option<(SearchJob, Vec<RetrievalHit>)>> = vec![None; jobs.len()];
	let mut tasks = JoinSet::new();

	for (slot, job) in jobs.into_iter().enumerate() {
		let knowledge_bases = knowledge_bases.clone();
		let semaphore = semaphore.clone();

		tasks.spawn(async move {
			let _permit = match semaphore {
				Some(semaphore) => semaphore.acquire_owned().await.ok(),
				None => None,
			};
			let outcome = knowledge_bases.hybrid_search(&job.knowledge_base_id, &job.params).await;

			(slot, job, outcome)
		});
	}

	while let Some(joined) = tasks.join_next().await {
		let (slot, job, outcome) = match joined {
			Ok(done) => done,
			Err(err) => {
				tracing::warn!(
					stage,
					action = "task_join_error",
					error = %err,
					"Search task aborted."
				);

				continue;
			},
		};

		match outcome {
			Ok(hits) => {
				tracing::info!(
					stage,
					action = "kb_result",
					kb_id = %job.knowledge_base_id,
					query_kind = job.query_kind,
					hit_count = hits.len(),
					"Knowledge base search finished."
				);

				slots[slot] = Some((job, hits));
			},
			Err(err) => {
				tracing::warn!(
					stage,
					action = "kb_search_error",
					kb_id = %job.knowledge_base_id,
					query_kind = job.query_kind,
					query = %text::truncate_for_log(&job.params.query_text),
					error = %err,
					"Knowledge base search failed; skipping it."
				);
			},
		}
	}

	slots.into_iter().flatten().collect()
}

/// Flattens fan-out results into one hit list, keeping job order.
pub fn merge_hits(results: Vec<(SearchJob, Vec<RetrievalHit>)>) -> Vec<RetrievalHit> {
	results.into_iter().flat_map(|(_, hits)| hits).collect()
}
