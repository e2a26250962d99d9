use serde::Deserialize;

use crate::types::RetrievalHit;
use sift_domain::text;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageInfo {
	caption: String,
	ocr_text: String,
}

/// The text a relevance model sees for a hit: its content plus any image captions and OCR text.
pub fn enriched_passage(hit: &RetrievalHit) -> String {
	let Some(raw) = hit.image_info.as_deref().filter(|raw| !raw.trim().is_empty()) else {
		return hit.content.clone();
	};
	let images: Vec<ImageInfo> = match serde_json::from_str(raw) {
		Ok(images) => images,
		Err(err) => {
			tracing::warn!(
				action = "image_info_parse",
				chunk_id = %hit.id,
				error = %err,
				"Image info could not be parsed; using content only."
			);

			return hit.content.clone();
		},
	};
	let mut image_texts = Vec::new();

	for image in &images {
		if !image.caption.is_empty() {
			image_texts.push(format!("Image caption: {}", image.caption));
		}
		if !image.ocr_text.is_empty() {
			image_texts.push(format!("Image text: {}", image.ocr_text));
		}
	}

	if image_texts.is_empty() {
		return hit.content.clone();
	}

	let mut passage = hit.content.clone();

	if !passage.is_empty() {
		passage.push_str("\n\n");
	}

	passage.push_str(&image_texts.join("\n"));

	passage
}

/// Cuts a passage to `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_passage(passage: &str, max_chars: usize) -> String {
	let truncated = text::truncate_chars(passage, max_chars);

	if truncated.len() < passage.len() { format!("{truncated}...") } else { truncated }
}
