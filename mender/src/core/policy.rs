//! Versioned capability denylist shared by the static validator and the
//! runtime guard installed inside the sandboxed interpreter.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

const STANDARD_FORBIDDEN_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "importlib",
    "builtins",
    "socket",
    "requests",
    "urllib",
    "http",
    "pickle",
];

const STANDARD_FORBIDDEN_BUILTINS: &[&str] = &[
    "exec", "eval", "compile", "open", "input", "help", "exit", "quit",
];

/// Modules and builtins a submitted program may not reach.
///
/// This is a denylist. It blocks the obvious escape routes; it does not make
/// the interpreter safe on its own (see the executor guards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityPolicy {
    pub version: u32,
    /// Root module names (`os` also covers `os.path`).
    pub forbidden_imports: BTreeSet<String>,
    pub forbidden_builtins: BTreeSet<String>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl CapabilityPolicy {
    pub fn standard() -> Self {
        Self {
            version: 1,
            forbidden_imports: STANDARD_FORBIDDEN_IMPORTS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            forbidden_builtins: STANDARD_FORBIDDEN_BUILTINS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Whether `module` (possibly dotted) falls under a forbidden root.
    pub fn forbids_module(&self, module: &str) -> bool {
        self.forbidden_imports.contains(root_module(module))
    }

    pub fn forbids_builtin(&self, name: &str) -> bool {
        self.forbidden_builtins.contains(name)
    }
}

/// First component of a dotted module path.
pub fn root_module(module: &str) -> &str {
    module.trim().split('.').next().unwrap_or_default()
}
