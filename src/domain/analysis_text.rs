// Normalisation of per-node analysis text before it is stored or folded.

use once_cell::sync::Lazy;
use regex::Regex;

static XML_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```xml(.*?)```").unwrap());
static ENHANCED_PATHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(<enhanced_paths>.*?</enhanced_paths>)").unwrap());
static VALID_PATHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(<valid_paths>.*?</valid_paths>)").unwrap());

/// Reduce a reply to its log-sequence payload.
///
/// The body of a fenced ```xml block wins over the surrounding prose; inside it
/// an `<enhanced_paths>` element is preferred, then `<valid_paths>`. Text with
/// none of these markers comes back unchanged.
pub fn extract_log_sequence(message: &str) -> String {
    let body = match XML_FENCE.captures(message).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => message,
    };

    let element = if body.contains("<enhanced_paths>") {
        ENHANCED_PATHS.captures(body)
    } else if body.contains("<valid_paths>") {
        VALID_PATHS.captures(body)
    } else {
        None
    };

    match element.and_then(|c| c.get(1)) {
        Some(m) => m.as_str().to_string(),
        None => body.to_string(),
    }
}
