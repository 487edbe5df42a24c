//! Utility functions for filenames, content types, and time formatting

/// Maximum length of a sanitized filename (including extension)
const MAX_FILENAME_LEN: usize = 120;

/// Reduce a raw title to a filename that is safe inside a quoted header value
///
/// Keeps ASCII letters, digits, space, dot, underscore, and hyphen. Any run of
/// other characters becomes a single underscore. Leading and trailing dots,
/// spaces, and underscores are removed. Never returns an empty string.
///
/// # Examples
///
/// ```
/// use remux_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("My \"Movie\": Part 2"), "My _Movie_ Part 2");
/// assert_eq!(sanitize_filename("///"), "download");
/// ```
pub fn sanitize_filename(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_replaced = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
            out.push(c);
            last_replaced = false;
        } else if !last_replaced {
            out.push('_');
            last_replaced = true;
        }
    }

    let trimmed = out.trim_matches(|c: char| matches!(c, ' ' | '.' | '_'));
    let mut name: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    // truncation may expose a trailing separator
    while name.ends_with([' ', '.', '_']) {
        name.pop();
    }

    if name.is_empty() {
        "download".to_string()
    } else {
        name
    }
}

/// Build the attachment filename for a title, quality label, and container
///
/// # Examples
///
/// ```
/// use remux_dl::utils::build_filename;
///
/// assert_eq!(build_filename("Big Buck Bunny", "720p", "mp4"), "Big Buck Bunny_720p.mp4");
/// ```
pub fn build_filename(title: &str, quality_label: &str, container: &str) -> String {
    let extension = sanitize_filename(container).to_ascii_lowercase();
    let stem = sanitize_filename(&format!("{title}_{quality_label}"));
    let max_stem = MAX_FILENAME_LEN.saturating_sub(extension.len() + 1);
    let stem: String = stem.chars().take(max_stem).collect();
    format!("{stem}.{extension}")
}

/// Container extension of a filename (lowercased), if any
pub fn container_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for a container extension
pub fn content_type_for(container: &str) -> &'static str {
    match container.to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "m4a" => "audio/mp4",
        "weba" | "opus" => "audio/webm",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Whether a string may be used verbatim as a descriptor id in a URL path
pub fn is_url_safe_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Format seconds as HH:MM:SS
pub fn format_hms(total_secs: f64) -> String {
    let total = if total_secs.is_finite() && total_secs > 0.0 {
        total_secs.round() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_filename("Big Buck Bunny-2008.v2"), "Big Buck Bunny-2008.v2");
    }

    #[test]
    fn sanitize_collapses_unsafe_runs() {
        assert_eq!(sanitize_filename("a<>:\"/\\|?*b"), "a_b");
        assert_eq!(sanitize_filename("naïve café"), "na_ve caf");
    }

    #[test]
    fn sanitize_strips_header_breaking_characters() {
        let name = sanitize_filename("evil\"\r\nSet-Cookie: x=1");
        assert!(!name.contains('"'));
        assert!(!name.contains('\r'));
        assert!(!name.contains('\n'));
        assert!(!name.contains(':'));
    }

    #[test]
    fn sanitize_never_empty() {
        assert_eq!(sanitize_filename(""), "download");
        assert_eq!(sanitize_filename("..."), "download");
        assert_eq!(sanitize_filename("日本語"), "download");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn build_filename_appends_label_and_extension() {
        assert_eq!(build_filename("Trailer: 4K", "2160p", "mp4"), "Trailer_ 4K_2160p.mp4");
        let long = build_filename(&"y".repeat(300), "720p", "webm");
        assert!(long.len() <= MAX_FILENAME_LEN);
        assert!(long.ends_with(".webm"));
    }

    #[test]
    fn container_of_lowercases() {
        assert_eq!(container_of("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(container_of("noext"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("mp4"), "video/mp4");
        assert_eq!(content_type_for("WEBM"), "video/webm");
        assert_eq!(content_type_for("m4a"), "audio/mp4");
        assert_eq!(content_type_for("xyz"), "application/octet-stream");
    }

    #[test]
    fn url_safe_ids() {
        assert!(is_url_safe_id("0123abcd"));
        assert!(is_url_safe_id("a-b_c"));
        assert!(!is_url_safe_id("a/b"));
        assert!(!is_url_safe_id(&"a".repeat(65)));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(3725.4), "01:02:05");
        assert_eq!(format_hms(-3.0), "00:00:00");
        assert_eq!(format_hms(f64::NAN), "00:00:00");
    }
}
