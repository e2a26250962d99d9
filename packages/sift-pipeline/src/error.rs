pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Model not configured: {message}")]
	ModelNotConfigured { message: String },
	#[error("Model not found: {message}")]
	ModelNotFound { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Search error: {message}")]
	Search { message: String },
	#[error("Session error: {message}")]
	Session { message: String },
	/// Retrieval finished without a usable candidate. Callers should answer with an explicit
	/// empty result instead of synthesizing from nothing.
	#[error("Nothing found at the {stage} stage.")]
	NothingFound { stage: &'static str },
}
impl Error {
	pub fn is_nothing_found(&self) -> bool {
		matches!(self, Self::NothingFound { .. })
	}
}

impl From<sift_providers::Error> for Error {
	fn from(err: sift_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
