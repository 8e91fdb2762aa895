//! Prompt builder for the external reasoning collaborator.

use std::sync::LazyLock;

use anyhow::{Result, bail};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::policy::CapabilityPolicy;
use crate::core::types::ErrorDescriptor;

const ADVISOR_TEMPLATE: &str = include_str!("prompts/advisor.md");

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("valid regex")
});

/// Inputs for one repair prompt.
#[derive(Debug, Clone)]
pub struct RepairPromptInputs<'a> {
    pub code: &'a str,
    pub error: &'a ErrorDescriptor,
    /// Tail of the interpreter diagnostics.
    pub diagnostics: &'a str,
    pub policy: &'a CapabilityPolicy,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Builds repair prompts within a byte budget, dropping droppable sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &RepairPromptInputs<'_>) -> Result<String> {
        let rendered = render(input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        let prompt = render_sections(&sections);
        if prompt.len() > self.budget_bytes {
            bail!(
                "repair prompt needs {} bytes, budget is {}",
                prompt.len(),
                self.budget_bytes
            );
        }
        Ok(prompt)
    }
}

fn render(input: &RepairPromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("advisor", ADVISOR_TEMPLATE)?;
    let template = env.get_template("advisor")?;
    let join = |names: &std::collections::BTreeSet<String>| {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let rendered = template.render(context! {
        code => input.code.trim_end(),
        error => input.error,
        diagnostics => Some(input.diagnostics.trim()).filter(|s| !s.is_empty()),
        forbidden_imports => join(&input.policy.forbidden_imports),
        forbidden_builtins => join(&input.policy.forbidden_builtins),
    })?;
    Ok(rendered)
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };
    while total(sections) > budget {
        let Some(idx) = sections.iter().position(|s| !s.required) else {
            break;
        };
        debug!(
            section = %sections[idx].key,
            bytes_dropped = sections[idx].content.len(),
            "dropped section for budget"
        );
        sections.remove(idx);
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}
