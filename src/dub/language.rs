use crate::dub::config::FormatterConfig;

/// ISO 639-1 codes and English names of languages not written in Latin script.
const NON_LATIN: &[(&str, &str)] = &[
    ("ar", "arabic"),
    ("bg", "bulgarian"),
    ("bn", "bengali"),
    ("el", "greek"),
    ("fa", "persian"),
    ("gu", "gujarati"),
    ("he", "hebrew"),
    ("hi", "hindi"),
    ("hy", "armenian"),
    ("ja", "japanese"),
    ("ka", "georgian"),
    ("km", "khmer"),
    ("kn", "kannada"),
    ("ko", "korean"),
    ("ml", "malayalam"),
    ("mr", "marathi"),
    ("ne", "nepali"),
    ("pa", "punjabi"),
    ("ru", "russian"),
    ("sr", "serbian"),
    ("ta", "tamil"),
    ("te", "telugu"),
    ("th", "thai"),
    ("uk", "ukrainian"),
    ("ur", "urdu"),
    ("zh", "chinese"),
];

/// Accepts a code (`ja`, `zh-CN`) or an English name (`Japanese`).
pub fn is_non_latin(language: &str) -> bool {
    let normalized = language.trim().to_lowercase();
    let primary = normalized
        .split(['-', '_'])
        .next()
        .unwrap_or(normalized.as_str());
    NON_LATIN
        .iter()
        .any(|(code, name)| *code == primary || *name == normalized)
}

pub fn max_chars_for(language: &str, config: &FormatterConfig) -> usize {
    if is_non_latin(language) {
        config.max_characters_non_latin
    } else {
        config.max_characters
    }
}
