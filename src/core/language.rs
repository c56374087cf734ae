// Language code → display name lookup used when building prompts

/// Display name used when a code is missing or unknown in the text path.
pub const AUTO_LANGUAGE: &str = "English|Japanese";

/// Map a client language code to the name the translation model expects.
pub fn display_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "ja" => "Japanese",
        "ja-easy" => "Japanese(easy)",
        "en" => "English",
        "zh" => "Chinese",
        "zh-tw" => "Taiwanese",
        "ko" => "Korean",
        "ar" => "Arabic",
        "it" => "Italian",
        "id" => "Indonesian",
        "nl" => "Dutch",
        "es" => "Spanish",
        "th" => "Thai",
        "de" => "German",
        "fr" => "French",
        "vi" => "Vietnamese",
        "ru" => "Russian",
        "auto" => AUTO_LANGUAGE,
        _ => return None,
    };
    Some(name)
}

/// Resolve a code, falling back to `fallback` for unknown codes.
pub fn display_name_or(code: &str, fallback: &'static str) -> &'static str {
    display_name(code).unwrap_or(fallback)
}
