//! Agent-facing tools that reuse the retrieval primitives outside the turn pipeline.

pub mod graph;
pub mod knowledge_search;
pub mod llm_rerank;

pub use graph::GraphQueryTool;
pub use knowledge_search::KnowledgeSearchTool;

use serde::Serialize;
use serde_json::Value;

use crate::{BoxFuture, Result};

/// What a tool hands back to the agent: a text report plus structured data for display.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolResult {
	pub success: bool,
	pub output: String,
	pub data: Value,
}

pub trait Tool
where
	Self: Send + Sync,
{
	fn name(&self) -> &'static str;

	fn description(&self) -> &'static str;

	/// JSON schema of the arguments `execute` accepts.
	fn parameters(&self) -> Value;

	fn execute<'a>(&'a self, args: Value) -> BoxFuture<'a, Result<ToolResult>>;
}

fn parse_args<T>(tool: &'static str, args: Value) -> Result<T>
where
	T: serde::de::DeserializeOwned,
{
	serde_json::from_value(args).map_err(|err| crate::Error::InvalidRequest {
		message: format!("Invalid {tool} arguments: {err}."),
	})
}

fn trimmed_non_empty(values: Vec<String>) -> Vec<String> {
	values
		.into_iter()
		.map(|value| value.trim().to_string())
		.filter(|value| !value.is_empty())
		.collect()
}
