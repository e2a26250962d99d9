use std::{collections::HashMap, sync::Arc};

use crate::{BoxFuture, Result, state::PipelineState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
	PreprocessQuery,
	ChunkSearch,
	ChunkRerank,
}
impl EventType {
	/// Dispatch order of a retrieval turn.
	pub const PIPELINE: [Self; 3] = [Self::PreprocessQuery, Self::ChunkSearch, Self::ChunkRerank];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::PreprocessQuery => "PREPROCESS_QUERY",
			Self::ChunkSearch => "CHUNK_SEARCH",
			Self::ChunkRerank => "CHUNK_RERANK",
		}
	}
}

/// A pipeline stage. A stage hands control to the following stage registered for the same event
/// by running `next`; returning without doing so ends the chain for that event.
pub trait Stage
where
	Self: Send + Sync,
{
	fn name(&self) -> &'static str;

	fn activation_events(&self) -> &'static [EventType];

	fn on_event<'a>(
		&'a self,
		event: EventType,
		state: &'a mut PipelineState,
		next: Next<'a>,
	) -> BoxFuture<'a, Result<()>>;
}

/// Continuation over the stages that follow the current one.
pub struct Next<'a> {
	event: EventType,
	stages: &'a [Arc<dyn Stage>],
}
impl<'a> Next<'a> {
	pub fn run<'s>(self, state: &'s mut PipelineState) -> BoxFuture<'s, Result<()>>
	where
		'a: 's,
	{
		Box::pin(async move {
			let Some((stage, rest)) = self.stages.split_first() else {
				return Ok(());
			};

			stage.on_event(self.event, state, Next { event: self.event, stages: rest }).await
		})
	}
}

#[derive(Default)]
pub struct EventManager {
	stages: HashMap<EventType, Vec<Arc<dyn Stage>>>,
}
impl EventManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, stage: Arc<dyn Stage>) {
		for event in stage.activation_events() {
			self.stages.entry(*event).or_default().push(stage.clone());
		}
	}

	pub fn stage_names(&self, event: EventType) -> Vec<&'static str> {
		self.stages
			.get(&event)
			.map(|stages| stages.iter().map(|stage| stage.name()).collect())
			.unwrap_or_default()
	}

	pub async fn trigger(&self, event: EventType, state: &mut PipelineState) -> Result<()> {
		let stages = self.stages.get(&event).map(Vec::as_slice).unwrap_or_default();

		tracing::debug!(
			event = event.as_str(),
			stages = stages.len(),
			"Dispatching pipeline event."
		);

		Next { event, stages }.run(state).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Tag {
		label: &'static str,
		forward: bool,
	}
	impl Stage for Tag {
		fn name(&self) -> &'static str {
			self.label
		}

		fn activation_events(&self) -> &'static [EventType] {
			&[EventType::ChunkSearch]
		}

		fn on_event<'a>(
			&'a self,
			_event: EventType,
			state: &'a mut PipelineState,
			next: Next<'a>,
		) -> BoxFuture<'a, Result<()>> {
			Box::pin(async move {
				state.processed_query.push_str(self.label);

				if self.forward { next.run(state).await } else { Ok(()) }
			})
		}
	}

	#[tokio::test]
	async fn chain_stops_where_a_stage_declines_to_continue() {
		let mut manager = EventManager::new();

		manager.register(Arc::new(Tag { label: "a", forward: true }));
		manager.register(Arc::new(Tag { label: "b", forward: false }));
		manager.register(Arc::new(Tag { label: "c", forward: true }));

		let mut state = PipelineState::default();

		manager.trigger(EventType::ChunkSearch, &mut state).await.expect("Chain must succeed.");

		assert_eq!(state.processed_query, "ab");
		assert_eq!(manager.stage_names(EventType::ChunkSearch), vec!["a", "b", "c"]);
	}

	#[tokio::test]
	async fn unregistered_event_is_a_no_op() {
		let manager = EventManager::new();
		let mut state = PipelineState::default();

		manager
			.trigger(EventType::ChunkRerank, &mut state)
			.await
			.expect("Empty chain must succeed.");

		assert!(state.processed_query.is_empty());
	}
}
