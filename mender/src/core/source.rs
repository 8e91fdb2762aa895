//! Line-level view of a program used by the patch strategies.
//!
//! Edits are whole-line insertions or single-line replacements. Inserted lines
//! inherit the leading whitespace of the line they are anchored to.
//!
//! The built-in strategies use the 0-based [`SourceLines::insert_before`] and
//! [`SourceLines::replace`]. The 1-based [`SourceLines::insert_statement`],
//! [`SourceLines::wrap_in_try_except`] and [`SourceLines::add_import`] are
//! library API for callers composing their own rewrites.

use std::sync::LazyLock;

use regex::Regex;

static DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+\w+\s*\(([^)]*)\)\s*(?:->[^:]*)?:(.*)$")
        .expect("valid regex")
});

/// Keywords that continue the block of a preceding statement.
const CONTINUATION_KEYWORDS: &[&str] = &["elif", "else", "except", "finally", "case"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl SourceLines {
    pub fn parse(code: &str) -> Self {
        Self {
            lines: code.lines().map(str::to_string).collect(),
            trailing_newline: code.ends_with('\n'),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line at 0-based `idx`.
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(String::as_str)
    }

    /// Leading whitespace of the line at `idx`.
    pub fn indent(&self, idx: usize) -> &str {
        self.get(idx).map(leading_whitespace).unwrap_or_default()
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Whether a new statement may be placed directly above line `idx`
    /// without splitting a compound statement or a continued line.
    pub fn can_insert_before(&self, idx: usize) -> bool {
        let Some(line) = self.get(idx) else {
            return false;
        };
        let first_word = line
            .trim_start()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .next()
            .unwrap_or_default();
        if CONTINUATION_KEYWORDS.contains(&first_word) {
            return false;
        }
        match self.previous_code_line(idx) {
            Some(prev) => {
                let prev = self.lines[prev].trim_end();
                !prev.ends_with('\\') && !ends_inside_brackets(prev)
            }
            None => true,
        }
    }

    /// Insert `statement` above 0-based `idx`, indented like that line.
    pub fn insert_before(&mut self, idx: usize, statement: &str) {
        let indent = self.indent(idx).to_string();
        self.insert_raw(idx, format!("{indent}{statement}"));
    }

    /// Insert an already-indented line at 0-based `idx`.
    pub fn insert_raw(&mut self, idx: usize, line: String) {
        let idx = idx.min(self.lines.len());
        self.lines.insert(idx, line);
    }

    /// Replace the line at 0-based `idx`. Returns `false` when out of range.
    pub fn replace(&mut self, idx: usize, line: String) -> bool {
        match self.lines.get_mut(idx) {
            Some(slot) => {
                *slot = line;
                true
            }
            None => false,
        }
    }

    /// Insert `statement` above 1-based `line_number`, copying its indentation.
    pub fn insert_statement(&mut self, line_number: usize, statement: &str) -> bool {
        let Some(idx) = line_number.checked_sub(1) else {
            return false;
        };
        if idx >= self.lines.len() {
            return false;
        }
        self.insert_before(idx, statement);
        true
    }

    /// Wrap the simple statement at 1-based `line_number` in `try`/`except`.
    pub fn wrap_in_try_except(&mut self, line_number: usize, exception: &str) -> bool {
        let Some(idx) = line_number.checked_sub(1) else {
            return false;
        };
        let Some(line) = self.get(idx) else {
            return false;
        };
        if line.trim_end().ends_with(':') || !self.can_insert_before(idx) {
            return false;
        }
        let indent = leading_whitespace(line).to_string();
        let body = line.trim_start().to_string();
        self.lines.splice(
            idx..=idx,
            [
                format!("{indent}try:"),
                format!("{indent}    {body}"),
                format!("{indent}except {exception}:"),
                format!("{indent}    pass"),
            ],
        );
        true
    }

    /// Add `import module` at the top unless an equivalent import exists.
    pub fn add_import(&mut self, module: &str) -> bool {
        let wanted = format!("import {module}");
        if self.lines.iter().any(|l| l.trim() == wanted) {
            return false;
        }
        self.lines.insert(0, wanted);
        true
    }

    /// Nearest `def` above 0-based `idx` whose body contains that line.
    pub fn enclosing_def(&self, idx: usize) -> Option<usize> {
        let mut indent = indent_width(self.get(idx)?);
        for j in (0..idx).rev() {
            let line = &self.lines[j];
            if is_blank_or_comment(line) {
                continue;
            }
            let width = indent_width(line);
            if width < indent {
                if DEF_RE.is_match(line) {
                    return Some(j);
                }
                if width == 0 {
                    return None;
                }
                indent = width;
            }
        }
        None
    }

    /// Parameters of the `def` at `idx`, or `None` if the line is not a
    /// block-opening function definition on a single line.
    pub fn def_parameters(&self, idx: usize) -> Option<Vec<String>> {
        let caps = DEF_RE.captures(self.get(idx)?)?;
        let trailing = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if !trailing.is_empty() && !trailing.starts_with('#') {
            return None;
        }
        let params = caps[1]
            .split(',')
            .filter_map(|raw| {
                let name = raw
                    .split([':', '='])
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .trim_start_matches('*')
                    .trim();
                (!name.is_empty() && name != "/").then(|| name.to_string())
            })
            .collect();
        Some(params)
    }

    /// Indentation used by the body of the block opened at `idx`.
    pub fn body_indent(&self, idx: usize) -> String {
        let header = self.indent(idx).to_string();
        let header_width = indent_width(&header);
        self.lines
            .iter()
            .skip(idx + 1)
            .find(|l| !is_blank_or_comment(l))
            .filter(|l| indent_width(l) > header_width)
            .map(|l| leading_whitespace(l).to_string())
            .unwrap_or_else(|| format!("{header}    "))
    }

    /// Whether line `idx` sits inside a function body.
    pub fn in_function(&self, idx: usize) -> bool {
        self.enclosing_def(idx).is_some()
    }

    fn previous_code_line(&self, idx: usize) -> Option<usize> {
        (0..idx).rev().find(|&j| !is_blank_or_comment(&self.lines[j]))
    }
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start();
    &line[..line.len() - trimmed.len()]
}

fn indent_width(line: &str) -> usize {
    leading_whitespace(line)
        .chars()
        .map(|c| if c == '\t' { 8 } else { 1 })
        .sum()
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn ends_inside_brackets(line: &str) -> bool {
    let mut depth = 0i32;
    for c in mask_literals(line).chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

/// Copy of `line` with string literal contents and any trailing comment
/// replaced by spaces. Quote characters stay; byte offsets are unchanged, so
/// match positions on the result index into `line`.
///
/// Works on a single line: a line that continues a triple-quoted string from
/// an earlier line is scanned as code.
pub fn mask_literals(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.char_indices();
    let mut quote: Option<(char, bool)> = None;

    let blank = |out: &mut String, c: char| out.extend(std::iter::repeat_n(' ', c.len_utf8()));

    while let Some((pos, c)) = chars.next() {
        match quote {
            None => match c {
                '#' => {
                    out.extend(std::iter::repeat_n(' ', line.len() - pos));
                    break;
                }
                '\'' | '"' => {
                    let triple = is_triple_quote(&line[pos..], c);
                    out.push(c);
                    if triple {
                        out.push(c);
                        out.push(c);
                        chars.next();
                        chars.next();
                    }
                    quote = Some((c, triple));
                }
                _ => out.push(c),
            },
            Some((q, triple)) => {
                if c == '\\' {
                    blank(&mut out, c);
                    if let Some((_, escaped)) = chars.next() {
                        blank(&mut out, escaped);
                    }
                } else if c == q && (!triple || is_triple_quote(&line[pos..], q)) {
                    out.push(q);
                    if triple {
                        out.push(q);
                        out.push(q);
                        chars.next();
                        chars.next();
                    }
                    quote = None;
                } else {
                    blank(&mut out, c);
                }
            }
        }
    }
    out
}

fn is_triple_quote(rest: &str, q: char) -> bool {
    let mut run = rest.chars().take(3);
    run.clone().count() == 3 && run.all(|c| c == q)
}
