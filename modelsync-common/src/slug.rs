//! Entity name normalization
//!
//! `normalize` produces the canonical slug that joins observations,
//! canonical records, cache keys and room names. Every component relies on
//! it being pure, idempotent and stable across runs.

/// Normalize a free-text entity name to its canonical slug.
///
/// Lower-cases, collapses every run of non-alphanumeric characters
/// (whitespace, dots, underscores, punctuation) to a single `-`, and
/// trims leading and trailing delimiters.
///
/// # Examples
///
/// ```
/// use modelsync_common::slug::normalize;
///
/// assert_eq!(normalize("Claude 3.5 Sonnet"), "claude-3-5-sonnet");
/// assert_eq!(normalize("claude   3.5  sonnet"), "claude-3-5-sonnet");
/// assert_eq!(normalize("GPT-4o"), "gpt-4o");
/// ```
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_delim = false;

    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_delim {
                out.push('-');
                pending_delim = false;
            }
            out.push(c);
        } else if !out.is_empty() {
            // Separator run: collapse, drop when leading or trailing
            pending_delim = true;
        }
    }

    out
}

/// Infer a provider id from an entity name.
///
/// Substring match against the well-known vendor families; returns
/// `"other"` when nothing matches. Used when an observation carries no
/// explicit provider field.
pub fn infer_provider(name: &str) -> &'static str {
    let lower = name.to_lowercase();

    if lower.contains("gpt") || lower.contains("openai") {
        "openai"
    } else if lower.contains("claude") || lower.contains("anthropic") {
        "anthropic"
    } else if lower.contains("gemini") || lower.contains("google") {
        "google"
    } else if lower.contains("llama") || lower.contains("meta") {
        "meta"
    } else if lower.contains("mistral") {
        "mistral"
    } else if lower.contains("cohere") {
        "cohere"
    } else if lower.contains("deepseek") {
        "deepseek"
    } else {
        "other"
    }
}
