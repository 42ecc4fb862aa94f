//! Filename sanitization for run ids and answer files.

/// Replace any run of characters outside `[A-Za-z0-9._-]` with a single `-`.
pub fn sanitize_component(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            if pending_dash && !output.is_empty() {
                output.push('-');
            }
            pending_dash = false;
            output.push(ch);
        } else {
            pending_dash = true;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_input_passes_through() {
        assert_eq!(sanitize_component("release-2.1_rc"), "release-2.1_rc");
    }

    #[test]
    fn test_runs_of_bad_chars_collapse_to_one_dash() {
        assert_eq!(sanitize_component("deploy to: prod!"), "deploy-to-prod");
        assert_eq!(sanitize_component("a//b\\c"), "a-b-c");
    }

    #[test]
    fn test_leading_and_trailing_bad_chars_drop() {
        assert_eq!(sanitize_component("  spaced  "), "spaced");
    }

    #[test]
    fn test_unicode_replaced() {
        assert_eq!(sanitize_component("café☕run"), "caf-run");
    }
}
