//! A reference [`Provider`] for Python, backed by `tree-sitter-python`.

use codeloom_core::provider::{
    AgentQuery, Match, Provider, ProviderStats, QueryResult, TransformOp, TransformResult, ValidationResult,
};
use tree_sitter::Language;

use crate::rust::apply_transform as apply_transform_generic;
use crate::rust::validate_source;
use crate::support::{self, NodeMatch, ParsedSource};

fn language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

/// Maps an [`AgentQuery::query_type`] to the Tree-sitter node kinds that
/// satisfy it, mirroring `rust::node_kinds_for`'s scope for the
/// constructs this reference provider is exercised against.
fn node_kinds_for(query_type: &str) -> Option<&'static [&'static str]> {
    match query_type {
        "function" => Some(&["function_definition"]),
        "class" => Some(&["class_definition"]),
        "import" => Some(&["import_statement", "import_from_statement"]),
        "assignment" => Some(&["assignment"]),
        _ => None,
    }
}

/// Reference Python provider built directly on `tree-sitter` +
/// `tree-sitter-python`, the same grammar `weaver-syntax` depends on.
#[derive(Debug, Default)]
pub struct PythonProvider;

impl Provider for PythonProvider {
    fn language(&self) -> &str {
        "python"
    }

    fn extensions(&self) -> &[&str] {
        &[".py", ".pyi"]
    }

    fn query(&self, source: &str, query: &AgentQuery) -> QueryResult {
        let Some(kinds) = node_kinds_for(&query.query_type) else {
            return QueryResult {
                matches: Vec::new(),
                total: 0,
                error: Some(format!("unsupported query type '{}'", query.query_type)),
            };
        };
        let Some(parsed) = ParsedSource::parse(language(), source) else {
            return QueryResult {
                matches: Vec::new(),
                total: 0,
                error: Some("failed to parse Python source".to_string()),
            };
        };

        let mut matches = Vec::new();
        support::collect_matches(parsed.root(), source, kinds, query, node_kinds_for, &mut matches);
        let total = matches.len();
        QueryResult {
            matches: matches.into_iter().map(to_public_match).collect(),
            total,
            error: None,
        }
    }

    fn transform(&self, source: &str, op: &TransformOp) -> TransformResult {
        apply_transform_generic(language(), node_kinds_for, source, op)
    }

    fn validate(&self, source: &str) -> ValidationResult {
        validate_source(language(), source)
    }

    fn supported_query_types(&self) -> Vec<String> {
        ["function", "class", "import", "assignment"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

fn to_public_match(node_match: NodeMatch) -> Match {
    Match {
        line: node_match.line,
        column: node_match.column,
        text: node_match.text,
        node_kind: node_match.kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_finds_class_by_name() {
        let provider = PythonProvider;
        let source = "class Alpha:\n    pass\n\nclass Beta:\n    pass\n";
        let result = provider.query(source, &AgentQuery::of_type("class").with_name_pattern("Alpha"));

        assert!(result.error.is_none());
        assert_eq!(result.total, 1);
        assert!(result.matches[0].text.starts_with("class Alpha"));
    }

    #[test]
    fn transform_renames_function() {
        let provider = PythonProvider;
        let source = "def old_name():\n    return 1\n";
        let op = TransformOp::replace(
            AgentQuery::of_type("function").with_name_pattern("old_name"),
            "def new_name():\n    return 1",
        );

        let result = provider.transform(source, &op);
        assert!(result.error.is_none());
        assert_eq!(result.match_count, 1);
        assert!(result.modified.contains("new_name"));
    }

    #[test]
    fn transform_unsupported_query_type_reports_error() {
        let provider = PythonProvider;
        let op = TransformOp::replace(AgentQuery::of_type("decorator"), "x");
        let result = provider.transform("def f():\n    pass\n", &op);
        assert!(result.error.is_some());
    }

    #[test]
    fn validate_detects_broken_python() {
        let provider = PythonProvider;
        assert!(provider.validate("def ok():\n    pass\n").valid);
        assert!(!provider.validate("def broken(").valid);
    }
}
