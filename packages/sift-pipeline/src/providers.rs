use std::sync::Arc;

use serde_json::Value;

use crate::{
	BoxFuture, ChatModel, ChatOptions, Error, ModelService, RankResult, RerankModel, Result,
};
use sift_config::{Config, LlmProviderConfig, ProviderConfig};

/// Resolves model ids against the configured HTTP providers.
pub struct HttpModelService {
	config: Arc<Config>,
}
impl HttpModelService {
	pub fn new(config: Arc<Config>) -> Self {
		Self { config }
	}
}
impl ModelService for HttpModelService {
	fn chat_model<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, Result<Arc<dyn ChatModel>>> {
		Box::pin(async move {
			let provider = self.config.chat_provider(model_id).ok_or_else(|| {
				Error::ModelNotFound { message: format!("No chat provider named {model_id}.") }
			})?;
			let model: Arc<dyn ChatModel> = Arc::new(HttpChatModel { provider: provider.clone() });

			Ok(model)
		})
	}

	fn rerank_model<'a>(
		&'a self,
		model_id: &'a str,
	) -> BoxFuture<'a, Result<Arc<dyn RerankModel>>> {
		Box::pin(async move {
			let provider = self.config.rerank_provider(model_id).ok_or_else(|| {
				Error::ModelNotFound { message: format!("No rerank provider named {model_id}.") }
			})?;
			let model: Arc<dyn RerankModel> =
				Arc::new(HttpRerankModel { provider: provider.clone() });

			Ok(model)
		})
	}
}

struct HttpChatModel {
	provider: LlmProviderConfig,
}
impl ChatModel for HttpChatModel {
	fn chat<'a>(
		&'a self,
		messages: &'a [Value],
		options: &'a ChatOptions,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			Ok(sift_providers::chat::complete(&self.provider, messages, options).await?)
		})
	}
}

struct HttpRerankModel {
	provider: ProviderConfig,
}
impl RerankModel for HttpRerankModel {
	fn rerank<'a>(
		&'a self,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, Result<Vec<RankResult>>> {
		Box::pin(async move {
			Ok(sift_providers::rerank::rerank(&self.provider, query, passages).await?)
		})
	}
}
