//! Static vetting of submitted programs against a [`CapabilityPolicy`].
//!
//! The program is parsed with tree-sitter's Python grammar and the whole tree is
//! walked once. Violations are collected in source order; nothing short-circuits
//! after the first hit so callers see every offending construct at once.

use std::cell::RefCell;

use tree_sitter::{Node, Parser, Tree};

use crate::core::policy::CapabilityPolicy;
use crate::core::types::PolicyDecision;

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Check `code` against `policy`.
///
/// A program that does not parse yields exactly one `SyntaxError: ...`
/// violation; policy checks only run on programs that parse.
pub fn validate(code: &str, policy: &CapabilityPolicy) -> PolicyDecision {
    let Some(tree) = parse(code) else {
        return PolicyDecision::from_violations(vec![
            "SyntaxError: unable to parse program".to_string(),
        ]);
    };
    let root = tree.root_node();
    if root.has_error() {
        return PolicyDecision::from_violations(vec![describe_syntax_error(root, code)]);
    }

    let mut violations = Vec::new();
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        check_node(node, code, policy, &mut violations);

        if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return PolicyDecision::from_violations(violations);
            }
        }
    }
}

fn parse(code: &str) -> Option<Tree> {
    PYTHON_PARSER.with(|p| p.borrow_mut().parse(code, None))
}

fn check_node(node: Node<'_>, code: &str, policy: &CapabilityPolicy, out: &mut Vec<String>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let module = imported_module(name, code);
                if policy.forbids_module(module) {
                    out.push(format!("Importing '{module}' is forbidden."));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name")
                && module.kind() == "dotted_name"
            {
                let module = text(module, code);
                if policy.forbids_module(module) {
                    out.push(format!("Importing from '{module}' is forbidden."));
                }
            }
        }
        "call" => {
            if let Some(function) = node.child_by_field_name("function")
                && function.kind() == "identifier"
            {
                let name = text(function, code);
                if policy.forbids_builtin(name) {
                    out.push(format!("Calling '{name}' is forbidden."));
                }
            }
        }
        // Legacy `exec "..."` form still parses; treat it as a call.
        "exec_statement" => {
            if policy.forbids_builtin("exec") {
                out.push("Calling 'exec' is forbidden.".to_string());
            }
        }
        _ => {}
    }
}

fn imported_module<'a>(name: Node<'_>, code: &'a str) -> &'a str {
    if name.kind() == "aliased_import"
        && let Some(inner) = name.child_by_field_name("name")
    {
        return text(inner, code);
    }
    text(name, code)
}

fn text<'a>(node: Node<'_>, code: &'a str) -> &'a str {
    node.utf8_text(code.as_bytes()).unwrap_or_default()
}

fn describe_syntax_error(root: Node<'_>, code: &str) -> String {
    let Some(node) = first_error(root) else {
        return "SyntaxError: invalid syntax".to_string();
    };
    let pos = node.start_position();
    let detail = if node.is_missing() {
        format!("missing '{}'", node.kind())
    } else {
        let snippet = text(node, code).lines().next().unwrap_or_default().trim();
        if snippet.is_empty() {
            "invalid syntax".to_string()
        } else {
            format!("invalid syntax near '{snippet}'")
        }
    };
    format!(
        "SyntaxError: {detail} (line {}, column {})",
        pos.row + 1,
        pos.column + 1
    )
}

fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(code: &str) -> PolicyDecision {
        validate(code, &CapabilityPolicy::standard())
    }

    #[test]
    fn plain_program_is_allowed() {
        let decision = check("import math\nprint(math.sqrt(4))\n");
        assert!(decision.allowed);
        assert!(decision.violations.is_empty());
    }

    #[test]
    fn forbidden_import_is_rejected() {
        let decision = check("import os\nprint(1)\n");
        assert!(!decision.allowed);
        assert_eq!(decision.violations, vec!["Importing 'os' is forbidden."]);
    }

    #[test]
    fn aliased_and_dotted_imports_match_root_module() {
        let decision = check("import os.path as p\nimport json, subprocess\n");
        assert_eq!(
            decision.violations,
            vec![
                "Importing 'os.path' is forbidden.",
                "Importing 'subprocess' is forbidden.",
            ]
        );
    }

    #[test]
    fn from_import_is_rejected() {
        let decision = check("from urllib.request import urlopen\n");
        assert_eq!(
            decision.violations,
            vec!["Importing from 'urllib.request' is forbidden."]
        );
    }

    #[test]
    fn relative_from_import_is_ignored() {
        assert!(check("from . import helpers\n").allowed);
    }

    #[test]
    fn forbidden_builtin_call_is_rejected() {
        let decision = check("data = open('x.txt').read()\n");
        assert_eq!(decision.violations, vec!["Calling 'open' is forbidden."]);
    }

    #[test]
    fn method_named_like_builtin_is_allowed() {
        assert!(check("class F:\n    def open(self):\n        return 1\nF().open()\n").allowed);
    }

    #[test]
    fn all_violations_are_reported_in_source_order() {
        let decision = check("import os\nx = eval('1')\nimport sys\nopen('f')\n");
        assert!(!decision.allowed);
        assert_eq!(
            decision.violations,
            vec![
                "Importing 'os' is forbidden.",
                "Calling 'eval' is forbidden.",
                "Importing 'sys' is forbidden.",
                "Calling 'open' is forbidden.",
            ]
        );
    }

    #[test]
    fn nested_calls_inside_functions_are_found() {
        let decision = check("def f():\n    return eval('2')\n");
        assert_eq!(decision.violations, vec!["Calling 'eval' is forbidden."]);
    }

    #[test]
    fn syntax_error_yields_single_violation() {
        let decision = check("syntax error !@#\n");
        assert!(!decision.allowed);
        assert_eq!(decision.violations.len(), 1);
        assert!(decision.violations[0].starts_with("SyntaxError"));
        assert!(decision.violations[0].contains("line 1"));
    }

    #[test]
    fn syntax_error_hides_policy_violations() {
        let decision = check("import os\ndef broken(:\n");
        assert_eq!(decision.violations.len(), 1);
        assert!(decision.violations[0].starts_with("SyntaxError"));
    }

    #[test]
    fn custom_policy_is_honored() {
        let mut policy = CapabilityPolicy::standard();
        policy.forbidden_imports.insert("math".to_string());
        policy.forbidden_builtins.remove("open");
        let decision = validate("import math\nopen('f')\n", &policy);
        assert_eq!(decision.violations, vec!["Importing 'math' is forbidden."]);
    }
}
