//! Filename sanitization for Content-Disposition headers.

/// Characters that are invalid in filenames on at least one platform, plus
/// quote and control characters that would break the header.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum filename length in a Content-Disposition header.
const MAX_DISPOSITION_LEN: usize = 200;

/// Sanitize a filename for use in `Content-Disposition: attachment`.
///
/// Invalid characters are replaced with underscores (consecutive runs
/// collapse to one), the result is trimmed of spaces and dots, and the
/// length is capped at 200 bytes on a char boundary. Empty results become
/// "download".
pub fn sanitize_disposition_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "download".to_string();
    }

    if trimmed.len() <= MAX_DISPOSITION_LEN {
        return trimmed.to_string();
    }

    let mut cut = MAX_DISPOSITION_LEN;
    while cut > 0 && !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_chars_replaced() {
        assert_eq!(sanitize_disposition_filename("a:b?c"), "a_b_c");
        assert_eq!(sanitize_disposition_filename("logs/app.log"), "logs_app.log");
        assert_eq!(sanitize_disposition_filename("he\"llo"), "he_llo");
    }

    #[test]
    fn test_consecutive_runs_collapse() {
        assert_eq!(sanitize_disposition_filename("a<>:b"), "a_b");
    }

    #[test]
    fn test_empty_becomes_download() {
        assert_eq!(sanitize_disposition_filename(""), "download");
        assert_eq!(sanitize_disposition_filename("   "), "download");
        assert_eq!(sanitize_disposition_filename("..."), "download");
    }

    #[test]
    fn test_length_capped_on_char_boundary() {
        let long = "é".repeat(300);
        let sanitized = sanitize_disposition_filename(&long);
        assert!(sanitized.len() <= 200);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_unicode_preserved() {
        assert_eq!(sanitize_disposition_filename("报告.pdf"), "报告.pdf");
    }
}
