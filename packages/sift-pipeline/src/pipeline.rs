use std::sync::Arc;

use crate::{
	Result, Services,
	event::{EventManager, EventType, Stage},
	preprocess::Preprocess,
	rerank::Rerank,
	search::Search,
	state::PipelineState,
};
use sift_config::Config;

/// A retrieval turn: preprocess, search, then rerank, each dispatched as its own event.
pub struct Pipeline {
	events: EventManager,
}
impl Pipeline {
	pub fn new(config: Arc<Config>, services: Services) -> Self {
		let models = services.models.clone();
		let stages: [Arc<dyn Stage>; 3] = [
			Arc::new(Preprocess::new(config.clone(), models.clone())),
			Arc::new(Search::new(config.clone(), services)),
			Arc::new(Rerank::new(config, models)),
		];

		Self::with_stages(stages)
	}

	pub fn with_stages(stages: impl IntoIterator<Item = Arc<dyn Stage>>) -> Self {
		let mut events = EventManager::new();

		for stage in stages {
			events.register(stage);
		}

		Self { events }
	}

	pub fn events(&self) -> &EventManager {
		&self.events
	}

	/// Runs every event in order and stops at the first error. On success the selected hits are in
	/// `state.rerank_result`.
	pub async fn run(&self, state: &mut PipelineState) -> Result<()> {
		for event in EventType::PIPELINE {
			if let Err(err) = self.events.trigger(event, state).await {
				tracing::warn!(
					event = event.as_str(),
					session_id = %state.session_id,
					error = %err,
					"Pipeline stopped."
				);

				return Err(err);
			}
		}

		tracing::info!(
			session_id = %state.session_id,
			selected = state.rerank_result.len(),
			"Pipeline finished."
		);

		Ok(())
	}
}
