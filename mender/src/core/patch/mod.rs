//! Deterministic patch candidate generation.
//!
//! [`generate`] dispatches on the classified error kind to one strategy in
//! [`strategies`]. A missing strategy, a strategy that does not match, an
//! unusable line number, or a rewrite that changes nothing all produce the
//! zero-confidence candidate.

pub mod strategies;

use tracing::debug;

use crate::core::diff::unified_diff;
use crate::core::source::SourceLines;
use crate::core::types::{ErrorDescriptor, PatchCandidate, PatchSource};

pub const DIFF_FROM_LABEL: &str = "original";
pub const DIFF_TO_LABEL: &str = "fixed";

/// Source of patch candidates for the repair loop.
pub trait Patcher {
    /// Propose a rewrite of `code`. `diagnostics` is the condensed tail of the
    /// interpreter output for patchers that want raw context.
    fn propose(&self, code: &str, error: &ErrorDescriptor, diagnostics: &str) -> PatchCandidate;
}

impl<P: Patcher + ?Sized> Patcher for Box<P> {
    fn propose(&self, code: &str, error: &ErrorDescriptor, diagnostics: &str) -> PatchCandidate {
        (**self).propose(code, error, diagnostics)
    }
}

/// Patcher backed by the local rewrite strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPatcher;

impl Patcher for HeuristicPatcher {
    fn propose(&self, code: &str, error: &ErrorDescriptor, _diagnostics: &str) -> PatchCandidate {
        generate(code, error)
    }
}

/// Propose a rewrite of `code` that addresses `error`.
pub fn generate(code: &str, error: &ErrorDescriptor) -> PatchCandidate {
    let Some(strategy) = strategies::for_kind(&error.kind) else {
        debug!(kind = %error.kind, "no strategy for error kind");
        return PatchCandidate::no_fix(code, PatchSource::Heuristic);
    };
    let src = SourceLines::parse(code);
    let Some(idx) = error
        .line_number
        .and_then(|n| (n as usize).checked_sub(1))
        .filter(|&idx| idx < src.len())
    else {
        debug!(line = ?error.line_number, lines = src.len(), "error line outside program");
        return PatchCandidate::no_fix(code, PatchSource::Heuristic);
    };
    let Some(rewrite) = strategy(&src, idx, error) else {
        debug!(kind = %error.kind, line = idx + 1, "strategy found no match");
        return PatchCandidate::no_fix(code, PatchSource::Heuristic);
    };
    finish_candidate(
        code,
        rewrite.source.render(),
        rewrite.rationale,
        rewrite.confidence,
        PatchSource::Heuristic,
    )
}

/// Build a candidate from a full rewrite, forcing zero confidence when the
/// rewrite is identical to the input.
pub fn finish_candidate(
    code: &str,
    rewritten: String,
    rationale: String,
    confidence: f64,
    source: PatchSource,
) -> PatchCandidate {
    if rewritten == code {
        return PatchCandidate::no_fix(code, source);
    }
    PatchCandidate {
        unified_diff: unified_diff(code, &rewritten, DIFF_FROM_LABEL, DIFF_TO_LABEL),
        rewritten_code: rewritten,
        rationale,
        confidence: confidence.clamp(0.0, 1.0),
        source,
    }
}
