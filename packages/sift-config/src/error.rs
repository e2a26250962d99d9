use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read sift config {}.", path.display())]
	ReadConfig { path: PathBuf, source: std::io::Error },
	#[error("Sift config {} is not valid TOML: {source}", path.display())]
	ParseConfig { path: PathBuf, source: toml::de::Error },
	/// The file parsed but a value breaks a range, uniqueness or presence rule.
	#[error("Invalid sift config: {message}")]
	Validation { message: String },
}
