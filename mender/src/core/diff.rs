//! Line-based unified diffs between program versions.
//!
//! Diffs are computed from a longest-common-subsequence alignment of lines and
//! rendered in the conventional `---`/`+++`/`@@` format with three lines of
//! context. [`apply_unified_diff`] is the inverse used by clients that only
//! hold a diff.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

const CONTEXT: usize = 3;

static HUNK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("malformed hunk header: {0}")]
    MalformedHunk(String),
    #[error("hunk at original line {line} does not match the source")]
    ContextMismatch { line: usize },
    #[error("hunks overlap or are out of order at original line {line}")]
    OutOfOrder { line: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    tag: Tag,
    a: usize,
    b: usize,
}

/// Render a unified diff from `original` to `fixed`.
///
/// Returns an empty string when the two texts have identical lines.
pub fn unified_diff(original: &str, fixed: &str, from_label: &str, to_label: &str) -> String {
    let a: Vec<&str> = original.lines().collect();
    let b: Vec<&str> = fixed.lines().collect();
    let ops = edit_script(&a, &b);
    if ops.iter().all(|op| op.tag == Tag::Equal) {
        return String::new();
    }

    let mut out = format!("--- {from_label}\n+++ {to_label}\n");
    for (start, end) in group_hunks(&ops) {
        let hunk = &ops[start..end];
        let a_len = hunk.iter().filter(|op| op.tag != Tag::Insert).count();
        let b_len = hunk.iter().filter(|op| op.tag != Tag::Delete).count();
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(hunk[0].a, a_len),
            format_range(hunk[0].b, b_len)
        ));
        for op in hunk {
            let (prefix, line) = match op.tag {
                Tag::Equal => (' ', a[op.a]),
                Tag::Delete => ('-', a[op.a]),
                Tag::Insert => ('+', b[op.b]),
            };
            out.push(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{len}", start + 1),
    }
}

/// Largest LCS table built for the differing middle section. Beyond it the
/// middle is emitted as a plain delete-then-insert block.
const MAX_TABLE_CELLS: usize = 4_000_000;

/// LCS alignment of two line sequences as `(a_index, b_index)` pairs.
///
/// The common prefix and suffix are matched directly; only the differing
/// middle gets a quadratic table.
fn lcs_alignment(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut alignment: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    alignment.extend(
        middle_alignment(a_mid, b_mid)
            .into_iter()
            .map(|(i, j)| (i + prefix, j + prefix)),
    );
    let (a_tail, b_tail) = (a.len() - suffix, b.len() - suffix);
    alignment.extend((0..suffix).map(|k| (a_tail + k, b_tail + k)));
    alignment
}

fn middle_alignment(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let m = a.len();
    let n = b.len();
    if m == 0 || n == 0 {
        return Vec::new();
    }
    if (m + 1).saturating_mul(n + 1) > MAX_TABLE_CELLS {
        return Vec::new();
    }

    // dp[i][j] = LCS length of a[i..] and b[j..]
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut alignment = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if a[i] == b[j] {
            alignment.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    alignment
}

fn edit_script(a: &[&str], b: &[&str]) -> Vec<Op> {
    let mut ops = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    let push_gap = |ops: &mut Vec<Op>, i: &mut usize, j: &mut usize, ai: usize, bj: usize| {
        while *i < ai {
            ops.push(Op { tag: Tag::Delete, a: *i, b: *j });
            *i += 1;
        }
        while *j < bj {
            ops.push(Op { tag: Tag::Insert, a: *i, b: *j });
            *j += 1;
        }
    };
    for (ai, bj) in lcs_alignment(a, b) {
        push_gap(&mut ops, &mut i, &mut j, ai, bj);
        ops.push(Op { tag: Tag::Equal, a: i, b: j });
        i += 1;
        j += 1;
    }
    push_gap(&mut ops, &mut i, &mut j, a.len(), b.len());
    ops
}

/// Group change ops into `[start, end)` hunk ranges with surrounding context.
fn group_hunks(ops: &[Op]) -> Vec<(usize, usize)> {
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.tag != Tag::Equal)
        .map(|(idx, _)| idx)
        .collect();

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for idx in changes {
        let start = idx.saturating_sub(CONTEXT);
        let end = (idx + 1 + CONTEXT).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }
    hunks
}

/// Apply a unified diff to `original`.
///
/// File headers and anything before the first hunk are ignored. Context and
/// removed lines must match the source.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String, DiffError> {
    let source: Vec<&str> = original.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(source.len());
    let mut pos = 0usize;
    let mut in_hunk = false;

    for line in diff.lines() {
        if line.starts_with("@@") {
            let caps = HUNK_RE
                .captures(line)
                .ok_or_else(|| DiffError::MalformedHunk(line.to_string()))?;
            let a_start: usize = caps[1]
                .parse()
                .map_err(|_| DiffError::MalformedHunk(line.to_string()))?;
            let a_len: usize = match caps.get(2) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| DiffError::MalformedHunk(line.to_string()))?,
                None => 1,
            };
            // A zero-length range names the line *after which* to insert.
            let target = if a_len == 0 { a_start } else { a_start.saturating_sub(1) };
            if target < pos || target > source.len() {
                return Err(DiffError::OutOfOrder { line: a_start });
            }
            result.extend(source[pos..target].iter().map(|s| (*s).to_string()));
            pos = target;
            in_hunk = true;
            continue;
        }
        if !in_hunk || line.starts_with('\\') {
            continue;
        }
        match line.chars().next() {
            Some('+') => result.push(line[1..].to_string()),
            Some('-') => {
                expect_line(&source, pos, &line[1..])?;
                pos += 1;
            }
            Some(' ') => {
                expect_line(&source, pos, &line[1..])?;
                result.push(source[pos].to_string());
                pos += 1;
            }
            // Some tools emit bare empty lines for empty context.
            None => {
                expect_line(&source, pos, "")?;
                result.push(String::new());
                pos += 1;
            }
            Some(_) => {}
        }
    }
    result.extend(source[pos..].iter().map(|s| (*s).to_string()));

    let mut out = result.join("\n");
    if !out.is_empty() && (original.ends_with('\n') || original.is_empty()) {
        out.push('\n');
    }
    Ok(out)
}

fn expect_line(source: &[&str], pos: usize, expected: &str) -> Result<(), DiffError> {
    match source.get(pos) {
        Some(actual) if *actual == expected => Ok(()),
        _ => Err(DiffError::ContextMismatch { line: pos + 1 }),
    }
}
