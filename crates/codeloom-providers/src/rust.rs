//! A reference [`Provider`] for Rust, backed by `tree-sitter-rust`.

use codeloom_core::confidence::ConfidenceScore;
use codeloom_core::provider::{
    AgentQuery, Match, Provider, ProviderStats, QueryResult, TransformMethod, TransformOp, TransformResult,
    ValidationResult,
};
use tree_sitter::Language;

use crate::support::{self, NodeMatch, ParsedSource};

fn language() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}

/// Maps an [`AgentQuery::query_type`] to the Tree-sitter node kinds that
/// satisfy it. Covers the constructs a reference provider is exercised
/// against; unrecognised query types are reported as a query/transform
/// error rather than silently matching nothing.
fn node_kinds_for(query_type: &str) -> Option<&'static [&'static str]> {
    match query_type {
        "function" => Some(&["function_item"]),
        "struct" => Some(&["struct_item"]),
        "enum" => Some(&["enum_item"]),
        "impl" => Some(&["impl_item"]),
        "trait" => Some(&["trait_item"]),
        "module" => Some(&["mod_item"]),
        "const" => Some(&["const_item"]),
        "static" => Some(&["static_item"]),
        "use" => Some(&["use_declaration"]),
        _ => None,
    }
}

/// Reference Rust provider built directly on `tree-sitter` +
/// `tree-sitter-rust`, the same grammar `weaver-syntax` depends on.
#[derive(Debug, Default)]
pub struct RustProvider;

impl Provider for RustProvider {
    fn language(&self) -> &str {
        "rust"
    }

    fn extensions(&self) -> &[&str] {
        &[".rs"]
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
                error: Some("failed to parse Rust source".to_string()),
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
        apply_transform(language(), node_kinds_for, source, op)
    }

    fn validate(&self, source: &str) -> ValidationResult {
        validate_source(language(), source)
    }

    fn supported_query_types(&self) -> Vec<String> {
        ["function", "struct", "enum", "impl", "trait", "module", "const", "static", "use"]
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

pub(crate) fn apply_transform(
    lang: Language,
    node_kinds_for: fn(&str) -> Option<&'static [&'static str]>,
    source: &str,
    op: &TransformOp,
) -> TransformResult {
    let Some(kinds) = node_kinds_for(&op.target.query_type) else {
        return TransformResult {
            modified: source.to_string(),
            diff: String::new(),
            confidence: ConfidenceScore::zero(),
            match_count: 0,
            error: Some(format!("unsupported query type '{}'", op.target.query_type)),
        };
    };
    let Some(parsed) = ParsedSource::parse(lang, source) else {
        return TransformResult {
            modified: source.to_string(),
            diff: String::new(),
            confidence: ConfidenceScore::zero(),
            match_count: 0,
            error: Some("failed to parse source".to_string()),
        };
    };
    let original_had_errors = support::has_error_nodes(parsed.root());

    let mut matches = Vec::new();
    support::collect_matches(parsed.root(), source, kinds, &op.target, node_kinds_for, &mut matches);
    if matches.is_empty() {
        return TransformResult {
            modified: source.to_string(),
            diff: String::new(),
            confidence: ConfidenceScore::zero(),
            match_count: 0,
            error: None,
        };
    }

    matches.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    let match_count = matches.len();
    let mut modified = source.to_string();

    for node_match in &matches {
        if node_match.range.end > modified.len()
            || !modified.is_char_boundary(node_match.range.start)
            || !modified.is_char_boundary(node_match.range.end)
        {
            continue;
        }
        match op.method {
            TransformMethod::Replace => {
                modified.replace_range(node_match.range.clone(), op.replacement.as_deref().unwrap_or(""));
            }
            TransformMethod::Delete => {
                modified.replace_range(node_match.range.clone(), "");
            }
            TransformMethod::InsertBefore => {
                modified.insert_str(node_match.range.start, op.content.as_deref().unwrap_or(""));
            }
            TransformMethod::InsertAfter => {
                modified.insert_str(node_match.range.end, op.content.as_deref().unwrap_or(""));
            }
            TransformMethod::Append => {
                let at = node_match.block_end.min(modified.len());
                if modified.is_char_boundary(at) {
                    modified.insert_str(at, op.content.as_deref().unwrap_or(""));
                }
            }
        }
    }

    let diff = format!("--- original\n+++ modified\n-{source}\n+{modified}");
    let confidence = support::confidence_from_reparse(lang, &modified, original_had_errors);

    TransformResult {
        modified,
        diff,
        confidence,
        match_count,
        error: None,
    }
}

pub(crate) fn validate_source(lang: Language, source: &str) -> ValidationResult {
    let Some(parsed) = ParsedSource::parse(lang, source) else {
        return ValidationResult {
            valid: false,
            errors: vec!["failed to parse source".to_string()],
        };
    };
    if support::has_error_nodes(parsed.root()) {
        ValidationResult {
            valid: false,
            errors: vec!["source contains syntax errors".to_string()],
        }
    } else {
        ValidationResult {
            valid: true,
            errors: Vec::new(),
        }
    }
}
