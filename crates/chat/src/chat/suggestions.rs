/// Prompts offered before the first question.
pub const DEFAULT_SUGGESTIONS: [&str; 4] = [
    "What paperwork do I need before releasing my music?",
    "How do I set up the essential accounts for music distribution?",
    "What are ISRC codes and why do I need them?",
    "How can I build my artist profile on streaming platforms?",
];

pub fn default_suggestions() -> Vec<String> {
    DEFAULT_SUGGESTIONS
        .iter()
        .map(|suggestion| suggestion.to_string())
        .collect()
}

/// Drops blank entries; falls back to the defaults when nothing is left.
pub fn normalize_suggestions(suggestions: Vec<String>) -> Vec<String> {
    let suggestions = suggestions
        .into_iter()
        .map(|suggestion| suggestion.trim().to_string())
        .filter(|suggestion| !suggestion.is_empty())
        .collect::<Vec<_>>();

    if suggestions.is_empty() {
        default_suggestions()
    } else {
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_suggestions_fall_back_to_defaults() {
        assert_eq!(
            normalize_suggestions(vec!["  ".into(), String::new()]),
            default_suggestions()
        );
    }

    #[test]
    fn custom_suggestions_are_trimmed() {
        assert_eq!(
            normalize_suggestions(vec!["  What is a UPC?  ".into(), " ".into()]),
            vec!["What is a UPC?".to_string()]
        );
    }
}
