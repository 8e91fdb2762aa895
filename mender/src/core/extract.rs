//! Recover program text from free-form collaborator replies.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").expect("valid regex")
});

const PREAMBLE_PREFIXES: &[&str] = &[
    "here is",
    "here's",
    "sure",
    "certainly",
    "the fixed",
    "the corrected",
    "fixed code",
    "corrected code",
    "i've",
    "i have",
    "i added",
    "i changed",
    "i cannot",
    "i can't",
    "sorry",
    "unfortunately",
    "this ",
    "explanation",
    "note:",
];

/// Pull a program out of `reply`.
///
/// Preference order: a fenced block tagged `python`/`py`, then the first
/// fenced block of any tag, then the reply with conversational lead-in and
/// sign-off lines removed. Returns `None` when nothing but prose remains.
pub fn extract_code_block(reply: &str) -> Option<String> {
    let blocks: Vec<(String, String)> = FENCE_RE
        .captures_iter(reply)
        .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].to_string()))
        .collect();

    let fenced = blocks
        .iter()
        .find(|(tag, _)| tag == "python" || tag == "py")
        .or_else(|| blocks.first())
        .map(|(_, body)| body.clone());
    if let Some(body) = fenced {
        return non_empty(body);
    }

    let kept: Vec<&str> = reply
        .lines()
        .skip_while(|line| is_prose(line))
        .collect();
    let end = kept
        .iter()
        .rposition(|line| !is_prose(line))
        .map_or(0, |idx| idx + 1);
    non_empty(kept[..end].join("\n") + "\n")
}

fn is_prose(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    PREAMBLE_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn non_empty(body: String) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let mut body = body.trim_matches('\n').to_string();
    body.push('\n');
    Some(body)
}
