//! Lenient extraction of JSON payloads from chat model replies.
//!
//! Models wrap JSON in markdown fences or surround it with prose, so the payload is located by
//! the first opening and last closing delimiter rather than by parsing the fence.

use serde::de::DeserializeOwned;

pub fn extract_json_object(text: &str) -> &str {
	extract_span(text, '{', '}').unwrap_or("{}")
}

pub fn extract_json_array(text: &str) -> &str {
	extract_span(text, '[', ']').unwrap_or("[]")
}

pub fn parse_json_object<T>(text: &str) -> Option<T>
where
	T: DeserializeOwned,
{
	serde_json::from_str(extract_json_object(text)).ok()
}

/// Parses a string array, dropping blank entries. `None` means no array could be decoded.
pub fn parse_string_array(text: &str) -> Option<Vec<String>> {
	let items: Vec<String> = serde_json::from_str(extract_json_array(text)).ok()?;

	Some(
		items
			.into_iter()
			.map(|item| item.trim().to_string())
			.filter(|item| !item.is_empty())
			.collect(),
	)
}

fn extract_span(text: &str, open: char, close: char) -> Option<&str> {
	let start = text.find(open)?;
	let end = text.rfind(close)?;

	(end > start).then(|| &text[start..=end])
}
