//! Per-error-kind rewrite strategies.
//!
//! Each strategy looks only at the failing line (plus, for recursion, the
//! enclosing `def`) and returns `None` when its pattern does not apply.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::source::{SourceLines, mask_literals};
use crate::core::types::ErrorDescriptor;

pub const UNDEFINED_NAME_CONFIDENCE: f64 = 0.8;
pub const NAMED_DIVISOR_CONFIDENCE: f64 = 0.7;
pub const LITERAL_DIVISOR_CONFIDENCE: f64 = 0.6;
pub const RECURSION_CONFIDENCE: f64 = 0.6;
pub const INDEX_CONFIDENCE: f64 = 0.6;
pub const CONCAT_CONFIDENCE: f64 = 0.7;

/// `NameError` plus both `UnboundLocalError` wordings (3.11+ and earlier).
static UNDEFINED_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:name|local variable) '([A-Za-z_][A-Za-z0-9_]*)' (?:is not defined|referenced before assignment|where it is not associated with a value)",
    )
    .expect("valid regex")
});

static ZERO_DIVISOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(//|/|%)(\s*)0+(?:\.0*)?([^\w.]|$)").expect("valid regex"));

static NAMED_DIVISOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?://|/|%)\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*([(\[]?)")
        .expect("valid regex")
});

static SUBSCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\[([^\[\]:]+)\]").expect("valid regex")
});

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

static NUMBER_AFTER_PLUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+\s*(\d+(?:\.\d+)?)\b").expect("valid regex"));

static NUMBER_BEFORE_PLUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w.])(\d+(?:\.\d+)?)\s*\+").expect("valid regex")
});

/// Successful strategy output.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub source: SourceLines,
    pub rationale: String,
    pub confidence: f64,
}

/// Signature shared by every strategy: program, 0-based failing line, error.
pub type Strategy = fn(&SourceLines, usize, &ErrorDescriptor) -> Option<Rewrite>;

/// Strategy registered for `kind`, if any.
pub fn for_kind(kind: &str) -> Option<Strategy> {
    match kind {
        "NameError" | "UnboundLocalError" => Some(undefined_name),
        "ZeroDivisionError" => Some(division_by_zero),
        "RecursionError" => Some(unbounded_recursion),
        "IndexError" => Some(index_out_of_range),
        "TypeError" => Some(str_number_concat),
        _ => None,
    }
}

/// `name 'x' is not defined` (or an unbound local `x`) → `x = 0` above the
/// failing line.
pub fn undefined_name(src: &SourceLines, idx: usize, err: &ErrorDescriptor) -> Option<Rewrite> {
    let name = UNDEFINED_NAME_RE.captures(&err.message)?.get(1)?.as_str();
    if !src.can_insert_before(idx) {
        return None;
    }
    let mut out = src.clone();
    out.insert_before(idx, &format!("{name} = 0"));
    Some(Rewrite {
        source: out,
        rationale: format!(
            "Initialize undefined name '{name}' to 0 before line {}.",
            idx + 1
        ),
        confidence: UNDEFINED_NAME_CONFIDENCE,
    })
}

/// Literal zero divisors become `1`; a named divisor gets a zero guard.
pub fn division_by_zero(src: &SourceLines, idx: usize, _err: &ErrorDescriptor) -> Option<Rewrite> {
    let line = src.get(idx)?;
    let masked = mask_literals(line);

    let zero_spans: Vec<(usize, usize)> = ZERO_DIVISOR_RE
        .captures_iter(&masked)
        .filter(|caps| caps.get(1).is_some_and(|op| !formats_string(&masked, op.start())))
        .filter_map(|caps| Some((caps.get(2)?.end(), caps.get(3)?.start())))
        .collect();
    if !zero_spans.is_empty() {
        let mut rewritten = String::with_capacity(line.len());
        let mut last = 0;
        for (start, end) in zero_spans {
            rewritten.push_str(&line[last..start]);
            rewritten.push('1');
            last = end;
        }
        rewritten.push_str(&line[last..]);
        let mut out = src.clone();
        out.replace(idx, rewritten);
        return Some(Rewrite {
            source: out,
            rationale: format!("Replace literal zero divisor with 1 on line {}.", idx + 1),
            confidence: LITERAL_DIVISOR_CONFIDENCE,
        });
    }

    let divisor = NAMED_DIVISOR_RE
        .captures_iter(&masked)
        .filter(|caps| caps.get(0).is_some_and(|op| !formats_string(&masked, op.start())))
        .find(|caps| caps.get(2).is_none_or(|m| m.as_str().is_empty()))?
        .get(1)?
        .as_str()
        .to_string();
    if !src.can_insert_before(idx) {
        return None;
    }
    let guard = if src.in_function(idx) {
        format!("if {divisor} == 0: return 0")
    } else if IDENT_RE.is_match(&divisor) {
        format!("if {divisor} == 0: {divisor} = 1")
    } else {
        return None;
    };
    let mut out = src.clone();
    out.insert_before(idx, &guard);
    Some(Rewrite {
        source: out,
        rationale: format!("Guard against '{divisor}' being zero before line {}.", idx + 1),
        confidence: NAMED_DIVISOR_CONFIDENCE,
    })
}

/// `"..." % x` is string formatting, not a modulo that can divide by zero.
fn formats_string(masked: &str, op_start: usize) -> bool {
    masked[..op_start].trim_end().ends_with(['"', '\''])
}

/// Add `if <first param> == 0: return 1` as the first body line of the
/// function that contains the failing line.
pub fn unbounded_recursion(
    src: &SourceLines,
    idx: usize,
    _err: &ErrorDescriptor,
) -> Option<Rewrite> {
    let def_idx = src.enclosing_def(idx)?;
    let params = src.def_parameters(def_idx)?;
    let param = params
        .iter()
        .find(|p| !matches!(p.as_str(), "self" | "cls"))?;
    let indent = src.body_indent(def_idx);
    let mut out = src.clone();
    out.insert_raw(def_idx + 1, format!("{indent}if {param} == 0: return 1"));
    Some(Rewrite {
        source: out,
        rationale: format!(
            "Add a base case on '{param}' to the function defined on line {}.",
            def_idx + 1
        ),
        confidence: RECURSION_CONFIDENCE,
    })
}

/// Bounds-check the first `name[expr]` subscript on the failing line.
pub fn index_out_of_range(
    src: &SourceLines,
    idx: usize,
    _err: &ErrorDescriptor,
) -> Option<Rewrite> {
    let line = src.get(idx)?;
    let caps = SUBSCRIPT_RE.captures(line)?;
    let container = caps.get(1)?.as_str();
    let index = caps.get(2)?.as_str().trim();
    if !src.can_insert_before(idx) {
        return None;
    }
    let guard = if src.in_function(idx) {
        format!("if {index} >= len({container}): return None")
    } else if IDENT_RE.is_match(index) {
        format!("if {index} >= len({container}): {index} = len({container}) - 1")
    } else {
        return None;
    };
    let mut out = src.clone();
    out.insert_before(idx, &guard);
    Some(Rewrite {
        source: out,
        rationale: format!(
            "Guard index '{index}' against the length of '{container}' before line {}.",
            idx + 1
        ),
        confidence: INDEX_CONFIDENCE,
    })
}

/// Wrap a bare number concatenated with a string in `str(...)`.
pub fn str_number_concat(src: &SourceLines, idx: usize, err: &ErrorDescriptor) -> Option<Rewrite> {
    let line = src.get(idx)?;
    let number_follows = err.message.contains("concatenate str");
    let number_leads = err.message.contains("for +:") && err.message.ends_with("and 'str'");

    let pattern = if number_follows {
        &NUMBER_AFTER_PLUS_RE
    } else if number_leads {
        &NUMBER_BEFORE_PLUS_RE
    } else {
        return None;
    };
    let literal = pattern.captures(line)?.get(1)?;
    let rewritten = format!(
        "{}str({}){}",
        &line[..literal.start()],
        literal.as_str(),
        &line[literal.end()..]
    );
    let mut out = src.clone();
    out.replace(idx, rewritten);
    Some(Rewrite {
        source: out,
        rationale: format!(
            "Convert {} to a string before concatenation on line {}.",
            literal.as_str(),
            idx + 1
        ),
        confidence: CONCAT_CONFIDENCE,
    })
}
