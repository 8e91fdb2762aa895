//! Deterministic classification of interpreter diagnostics.
//!
//! Never fails: any input, including missing or empty text, maps to an
//! [`ErrorDescriptor`].

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ErrorCategory, ErrorDescriptor};

static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)file "([^"]+)", line (\d+)"#).expect("valid regex"));

static KIND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
});

const SYNTAX_KINDS: &[&str] = &["SyntaxError", "IndentationError", "TabError"];

/// Lines kept by [`extract_error_context`].
const CONTEXT_LINES: usize = 3;

/// Classify raw diagnostic text into a structured descriptor.
pub fn classify(stderr: Option<&str>) -> ErrorDescriptor {
    let text = stderr.unwrap_or_default();
    let Some(last) = text.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return ErrorDescriptor {
            kind: "Unknown".to_string(),
            message: String::new(),
            line_number: None,
            source_location: None,
            category: ErrorCategory::Runtime,
        };
    };

    let (kind, message) = split_kind(last);
    let (source_location, line_number) = match locate(text) {
        Some((name, line)) => (Some(name), Some(line)),
        None => (None, None),
    };
    let category = if SYNTAX_KINDS.contains(&kind.as_str()) {
        ErrorCategory::Syntax
    } else {
        ErrorCategory::Runtime
    };

    ErrorDescriptor {
        kind,
        message,
        line_number,
        source_location,
        category,
    }
}

fn split_kind(line: &str) -> (String, String) {
    if let Some((kind, message)) = line.split_once(": ")
        && KIND_RE.is_match(kind.trim())
    {
        // Qualified names such as `json.decoder.JSONDecodeError` keep the class only.
        let kind = kind.trim().rsplit('.').next().unwrap_or(kind).to_string();
        return (kind, message.trim().to_string());
    }
    // A bare exception name with no message (e.g. `KeyboardInterrupt`).
    if KIND_RE.is_match(line) && line.ends_with("Error") {
        return (line.to_string(), String::new());
    }
    ("UnknownError".to_string(), line.to_string())
}

/// Find the most relevant `File "...", line N` reference.
///
/// Scans from the end; the first reference to a dynamic buffer (`<...>`) wins,
/// otherwise the deepest frame found is used.
fn locate(text: &str) -> Option<(String, u32)> {
    let mut fallback = None;
    for line in text.lines().rev() {
        let Some(caps) = LOCATION_RE.captures(line) else {
            continue;
        };
        let name = caps[1].to_string();
        let Ok(number) = caps[2].parse::<u32>() else {
            continue;
        };
        if name.starts_with('<') && name.ends_with('>') {
            return Some((name, number));
        }
        if fallback.is_none() {
            fallback = Some((name, number));
        }
    }
    fallback
}

/// Condense diagnostic text to its tail for display.
pub fn extract_error_context(stderr: Option<&str>) -> String {
    let text = stderr.unwrap_or_default();
    if text.trim().is_empty() {
        return "Unknown Error".to_string();
    }
    let lines: Vec<&str> = text.trim_end().lines().collect();
    if lines.len() > CONTEXT_LINES {
        lines[lines.len() - CONTEXT_LINES..].join("\n")
    } else {
        text.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME_ERROR: &str = "Traceback (most recent call last):\n  File \"<sandbox>\", line 1, in <module>\nNameError: name 'x' is not defined\n";

    #[test]
    fn classify_name_error_with_location() {
        let desc = classify(Some(NAME_ERROR));
        assert_eq!(desc.kind, "NameError");
        assert_eq!(desc.message, "name 'x' is not defined");
        assert_eq!(desc.line_number, Some(1));
        assert_eq!(desc.source_location.as_deref(), Some("<sandbox>"));
        assert_eq!(desc.category, ErrorCategory::Runtime);
    }

    #[test]
    fn classify_empty_and_missing_input_is_unknown() {
        for input in [None, Some(""), Some("  \n\n")] {
            let desc = classify(input);
            assert_eq!(desc.kind, "Unknown");
            assert_eq!(desc.line_number, None);
            assert_eq!(desc.source_location, None);
        }
    }

    #[test]
    fn classify_line_without_delimiter_is_unknown_error() {
        let desc = classify(Some("Segmentation fault"));
        assert_eq!(desc.kind, "UnknownError");
        assert_eq!(desc.message, "Segmentation fault");
    }

    #[test]
    fn classify_timeout_message_is_unknown_error() {
        let desc = classify(Some(
            "Execution timed out after 5 second(s) (possible infinite loop)",
        ));
        assert_eq!(desc.kind, "UnknownError");
    }

    #[test]
    fn classify_prefers_user_buffer_frame() {
        let stderr = "Traceback (most recent call last):\n  File \"<sandbox>\", line 7, in <module>\n  File \"/usr/lib/python3/json/__init__.py\", line 346, in loads\nValueError: bad\n";
        let desc = classify(Some(stderr));
        assert_eq!(desc.line_number, Some(7));
        assert_eq!(desc.source_location.as_deref(), Some("<sandbox>"));
    }

    #[test]
    fn classify_falls_back_to_deepest_frame() {
        let stderr = "  File \"/tmp/a.py\", line 2, in f\n  File \"/tmp/b.py\", line 9, in g\nKeyError: 'k'\n";
        let desc = classify(Some(stderr));
        assert_eq!(desc.line_number, Some(9));
        assert_eq!(desc.source_location.as_deref(), Some("/tmp/b.py"));
    }

    #[test]
    fn classify_location_is_case_insensitive() {
        let desc = classify(Some("file \"<sandbox>\", LINE 3\nTypeError: nope\n"));
        assert_eq!(desc.line_number, Some(3));
    }

    #[test]
    fn classify_syntax_family_sets_syntax_category() {
        let stderr = "  File \"<sandbox>\", line 2\n    x = (\n        ^\nSyntaxError: '(' was never closed\n";
        let desc = classify(Some(stderr));
        assert_eq!(desc.kind, "SyntaxError");
        assert_eq!(desc.category, ErrorCategory::Syntax);
        assert_eq!(desc.line_number, Some(2));

        let desc = classify(Some("IndentationError: unexpected indent"));
        assert_eq!(desc.category, ErrorCategory::Syntax);
    }

    #[test]
    fn classify_qualified_kind_keeps_class_name() {
        let desc = classify(Some("json.decoder.JSONDecodeError: Expecting value"));
        assert_eq!(desc.kind, "JSONDecodeError");
        assert_eq!(desc.message, "Expecting value");
    }

    #[test]
    fn classify_message_with_colons_splits_once() {
        let desc = classify(Some("ValueError: invalid literal for int() with base 10: 'a'"));
        assert_eq!(desc.kind, "ValueError");
        assert_eq!(desc.message, "invalid literal for int() with base 10: 'a'");
    }

    #[test]
    fn classify_prose_with_colon_is_not_a_kind() {
        let desc = classify(Some("something went wrong: see log"));
        assert_eq!(desc.kind, "UnknownError");
        assert_eq!(desc.message, "something went wrong: see log");
    }

    #[test]
    fn classify_bare_exception_name() {
        let desc = classify(Some("Traceback...\nMemoryError"));
        assert_eq!(desc.kind, "MemoryError");
        assert_eq!(desc.message, "");
    }

    #[test]
    fn context_keeps_last_three_lines() {
        let text = "a\nb\nc\nd\ne\n";
        assert_eq!(extract_error_context(Some(text)), "c\nd\ne");
    }

    #[test]
    fn context_keeps_short_text_whole() {
        assert_eq!(extract_error_context(Some("a\nb\n")), "a\nb");
        assert_eq!(extract_error_context(Some("only")), "only");
    }

    #[test]
    fn context_of_empty_input_is_unknown_error() {
        assert_eq!(extract_error_context(None), "Unknown Error");
        assert_eq!(extract_error_context(Some("")), "Unknown Error");
    }
}
