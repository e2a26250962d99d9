pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Provider request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("Default header name is invalid: {0}")]
	HeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error("Header value is invalid: {0}")]
	HeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("Default header {name} must be a string.")]
	NonStringHeader { name: String },
	#[error("Chat response has no choices[0].message.content.")]
	MissingChatContent,
	#[error("Rerank response has neither a results nor a data array.")]
	MissingRerankResults,
	/// `position` is the item's place in the response array, not the passage index.
	#[error("Rerank result #{position} has no usable {field}.")]
	MalformedRerankItem { position: usize, field: &'static str },
}
