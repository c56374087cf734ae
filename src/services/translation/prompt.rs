// Prompt templates in the translation model's dataset format

use crate::core::language::{self, AUTO_LANGUAGE};

/// Placeholder the PDF worker substitutes with each extracted text block
pub const WORKER_TEXT_PLACEHOLDER: &str = "${text}";

/// Prompt for a single text translation.
///
/// Unknown or missing codes resolve to the auto-detect name so the model
/// picks the direction itself.
pub fn build_text_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    let input_lang = language::display_name_or(source_lang, AUTO_LANGUAGE);
    let output_lang = language::display_name_or(target_lang, AUTO_LANGUAGE);
    format!(
        "<|plamo:op|>dataset\ntranslation\n\n<|plamo:op|>input lang={}\n{}<|plamo:op|>output lang={}",
        input_lang, text, output_lang
    )
}

/// Prompt template handed to the PDF worker, which fills in the text itself.
pub fn build_document_prompt(input_lang: &str, output_lang: &str) -> String {
    format!(
        "<|plamo:op|>dataset\ntranslation\n<|plamo:op|>input lang={}\n{}\n<|plamo:op|>output lang={}",
        input_lang, WORKER_TEXT_PLACEHOLDER, output_lang
    )
}

/// Language names for a document task. Documents default to English → Japanese.
pub fn document_languages(source_lang: &str, target_lang: &str) -> (&'static str, &'static str) {
    (
        language::display_name_or(source_lang, "English"),
        language::display_name_or(target_lang, "Japanese"),
    )
}
