use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_script::{Script, UnicodeScript};

pub const CONTENT_SIGNATURE_CHARS: usize = 128;
pub const LOG_PREVIEW_CHARS: usize = 300;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(?:https?://|ftp://|www\.)\S+").expect("URL regex is valid.")
});
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("Email regex is valid.")
});
static PUNCTUATION_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"[\p{P}\p{S}]+").expect("Punctuation regex is valid."));

pub fn collapse_whitespace(input: &str) -> String {
	input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn strip_urls_and_emails(input: &str) -> String {
	let mut out = input.to_string();

	for pattern in [&URL_PATTERN, &EMAIL_PATTERN] {
		out = pattern.replace_all(&out, " ").into_owned();
	}

	out
}

pub fn strip_punctuation(input: &str) -> String {
	PUNCTUATION_PATTERN.replace_all(input, " ").into_owned()
}

/// NFKC-folds, drops URLs, emails and punctuation, and collapses whitespace.
pub fn clean_query(input: &str) -> String {
	let folded: String = input.nfkc().collect();
	let collapsed = collapse_whitespace(&folded);
	let stripped = strip_punctuation(&strip_urls_and_emails(&collapsed));

	collapse_whitespace(&stripped)
}

/// True when the text has letters and every letter is Latin script.
pub fn is_latin_text(input: &str) -> bool {
	let mut letters = input.chars().filter(|c| c.is_alphabetic()).peekable();

	letters.peek().is_some() && letters.all(|c| c.script() == Script::Latin)
}

/// Lower-cased, whitespace-collapsed prefix used to spot near-duplicate content.
pub fn content_signature(content: &str) -> String {
	let lowered = content.trim().to_lowercase();

	truncate_chars(&collapse_whitespace(&lowered), CONTENT_SIGNATURE_CHARS)
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
	match input.char_indices().nth(max_chars) {
		Some((byte_idx, _)) => input[..byte_idx].to_string(),
		None => input.to_string(),
	}
}

pub fn truncate_for_log(input: &str) -> String {
	let escaped = input.replace('\n', "\\n");

	match escaped.char_indices().nth(LOG_PREVIEW_CHARS) {
		Some((byte_idx, _)) => format!("{}...", &escaped[..byte_idx]),
		None => escaped,
	}
}

/// Case-folded whitespace tokens longer than one character.
pub fn token_set(input: &str) -> HashSet<String> {
	input
		.to_lowercase()
		.split_whitespace()
		.filter(|token| token.chars().count() > 1)
		.map(str::to_string)
		.collect()
}

pub fn jaccard(lhs: &HashSet<String>, rhs: &HashSet<String>) -> f64 {
	if lhs.is_empty() && rhs.is_empty() {
		return 0.0;
	}

	let intersection = lhs.intersection(rhs).count();
	let union = lhs.len() + rhs.len() - intersection;

	if union == 0 { 0.0 } else { intersection as f64 / union as f64 }
}
