//! Tag text conversion.
//!
//! Tags travel as an ordered list but are edited as one comma-separated line.

/// Split comma-separated text into trimmed, non-empty tags, keeping order.
pub fn parse_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render tags as the comma-separated text used in edit fields.
pub fn format_tags(tags: &[String]) -> String {
    tags.join(", ")
}
