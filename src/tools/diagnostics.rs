//! Translation of extractor diagnostics into [`ExtractionError`]

use crate::error::ExtractionError;

/// Longest message carried over when no `ERROR:` line is present
const MAX_FALLBACK_LEN: usize = 300;

/// Map the extractor's stderr to the closest [`ExtractionError`]
///
/// `format_id` is the format that was requested, if any, so a "requested
/// format not available" failure can name it.
pub fn translate_extractor_error(stderr: &str, format_id: Option<&str>) -> ExtractionError {
    let lower = stderr.to_lowercase();
    let detail = last_error_line(stderr);

    if lower.contains("http error 429") || lower.contains("too many requests") {
        return ExtractionError::RateLimited(detail);
    }
    if lower.contains("requested format") && lower.contains("not available") {
        return ExtractionError::FormatNotFound {
            format_id: format_id.unwrap_or("unknown").to_string(),
        };
    }
    if lower.contains("private video")
        || lower.contains("sign in to confirm")
        || lower.contains("login required")
        || lower.contains("members-only")
    {
        return ExtractionError::Private(detail);
    }
    if lower.contains("unsupported url")
        || lower.contains("is not a valid url")
        || lower.contains("no video formats")
    {
        return ExtractionError::Unsupported(detail);
    }
    if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("http error 404")
        || lower.contains("http error 403")
        || (lower.contains("geo") && lower.contains("block"))
        || lower.contains("copyright")
    {
        return ExtractionError::Unavailable(detail);
    }

    ExtractionError::Unavailable(detail)
}

fn last_error_line(stderr: &str) -> String {
    let line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.to_ascii_lowercase().starts_with("error"));

    match line {
        Some(line) => line
            .strip_prefix("ERROR:")
            .or_else(|| line.strip_prefix("error:"))
            .unwrap_or(line)
            .trim()
            .to_string(),
        None => {
            let trimmed = stderr.trim();
            if trimmed.is_empty() {
                return "extractor failed without diagnostics".to_string();
            }
            trimmed.chars().take(MAX_FALLBACK_LEN).collect()
        }
    }
}
