//! System prompt for slide classification.
//!
//! Callers can override it via [`crate::config::PipelineConfig::system_prompt`];
//! the constant here is used only when no override is provided. Whatever the
//! prompt, the reply is parsed by [`crate::pipeline::llm::parse_reply`], so an
//! override must still ask for the same JSON object.

use crate::model::SlideKind;

/// Default prompt: one slide image in, one JSON object out.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You extract the content of a single presentation slide from its image.

Reply with ONE JSON object and nothing else, in exactly this shape:

{
  "title": "The main title or heading of the slide",
  "content": "All visible text on the slide, including bullet points and paragraphs",
  "type": "regular",
  "links": []
}

Rules:
- "title": the slide heading. Use an empty string if the slide has none.
- "content": every visible line of text in reading order. Keep bullet points, one per line, prefixed with "- ".
- "type": one of regular, quiz, video, reference, resources.
  - quiz: questions with answer options
  - video: a slide that embeds or points at a video
  - reference: citations or bibliography
  - resources: a list of further reading, tools or downloads
  - regular: anything else
- "links": every URL visible on the slide, verbatim. Empty list if none.
- Do NOT wrap the object in ```json fences.
- Do NOT add commentary."#;

/// Comma-separated classification values, as listed in the prompt.
pub fn classification_values() -> String {
    SlideKind::ALL
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_classification() {
        for kind in SlideKind::ALL {
            assert!(
                DEFAULT_SYSTEM_PROMPT.contains(kind.as_str()),
                "prompt is missing {kind}"
            );
        }
        assert!(DEFAULT_SYSTEM_PROMPT.contains(&classification_values()));
    }

    #[test]
    fn prompt_names_every_reply_field() {
        for field in ["\"title\"", "\"content\"", "\"type\"", "\"links\""] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(field));
        }
    }
}
