use std::sync::LazyLock;

use jieba_rs::Jieba;
use unicode_segmentation::UnicodeSegmentation;

static JIEBA: LazyLock<Jieba> = LazyLock::new(Jieba::new);

pub fn is_cjk(c: char) -> bool {
	matches!(
		c as u32,
		0x3000..=0x303F | 0x3040..=0x309F | 0x30A0..=0x30FF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF
	)
}

/// Han ideographs, the only script the dictionary segmenter knows words for.
pub fn is_han(c: char) -> bool {
	matches!(c as u32, 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF)
}

pub fn contains_cjk(input: &str) -> bool {
	input.chars().any(is_cjk)
}

/// Splits text into search-mode tokens.
///
/// Runs of Han ideographs go through the dictionary segmenter in search mode, which emits every
/// word plus the shorter dictionary words inside long ones. Everything else, kana and hangul
/// included, is split into UAX #29 word segments. Punctuation and whitespace are dropped.
pub fn segment_for_search(input: &str) -> Vec<String> {
	let mut tokens = Vec::new();
	let mut run = String::new();

	for segment in input.split_word_bounds() {
		if segment.chars().all(is_han) {
			run.push_str(segment);

			continue;
		}

		flush_run(&mut run, &mut tokens);

		if segment.chars().any(char::is_alphanumeric) {
			tokens.push(segment.to_string());
		}
	}

	flush_run(&mut run, &mut tokens);

	tokens
}

fn flush_run(run: &mut String, tokens: &mut Vec<String>) {
	if run.is_empty() {
		return;
	}

	tokens.extend(
		JIEBA
			.cut_for_search(run, true)
			.into_iter()
			.filter(|word| word.chars().any(char::is_alphanumeric))
			.map(str::to_string),
	);

	run.clear();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_cjk_ranges() {
		assert!(contains_cjk("向量检索"));
		assert!(contains_cjk("カタカナ"));
		assert!(contains_cjk("검색"));
		assert!(!contains_cjk("vector search"));
	}

	#[test]
	fn search_mode_adds_inner_dictionary_words() {
		assert_eq!(
			segment_for_search("南京市长江大桥"),
			vec!["南京", "京市", "南京市", "长江", "大桥", "长江大桥"]
		);
	}

	#[test]
	fn han_runs_split_into_dictionary_words() {
		assert_eq!(segment_for_search("如何配置向量检索"), vec!["如何", "配置", "向量", "检索"]);
	}

	#[test]
	fn mixed_script_keeps_latin_words() {
		assert_eq!(segment_for_search("Rust 中国，v2"), vec!["Rust", "中国", "v2"]);
	}

	#[test]
	fn single_characters_are_kept() {
		assert_eq!(segment_for_search("和 a"), vec!["和", "a"]);
	}
}
