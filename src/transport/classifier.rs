//! Transport error classification.
//!
//! A heuristic over error text, not a typed hierarchy: anything that does not
//! look like a timeout or a reset/refused connection is treated as fatal.

/// Returns true if the error text describes a transient network condition.
pub fn is_transient(error_text: &str) -> bool {
    let text = error_text.to_lowercase();
    if text.contains("time") && text.contains("out") {
        return true;
    }
    text.contains("connection") && (text.contains("refused") || text.contains("reset"))
}

/// Flatten an error and its source chain into one line of text.
///
/// reqwest puts the interesting part ("connection refused", "operation timed
/// out") in the source chain, so the classifier has to see all of it.
pub fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
