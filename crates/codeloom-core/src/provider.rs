//! The provider contract (spec §6) and the registry that looks providers up
//! by language (C8).
//!
//! A [`Provider`] is an external collaborator: the core never implements one
//! itself (see `codeloom-providers` for reference implementations), it only
//! defines the trait, routes calls to whichever instance is registered for a
//! file's language, and aggregates what comes back.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog;
use crate::confidence::ConfidenceScore;

/// Boolean combinator for composing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    /// All operands must match.
    And,
    /// At least one operand must match.
    Or,
    /// The operand must not match.
    Not,
}

/// A structural query a [`Provider`] evaluates against a source string.
///
/// `name_pattern` uses glob-style wildcards (`*`) against a matched node's
/// name. `contains`/`operator`+`operands` let callers nest queries; a leaf
/// query has neither set.
#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    /// Provider-defined node kind this query matches (e.g. `"function"`).
    pub query_type: String,
    /// Optional glob pattern the matched node's name must satisfy.
    pub name_pattern: Option<String>,
    /// Optional nested query the matched node's descendants must satisfy.
    pub contains: Option<Box<AgentQuery>>,
    /// Boolean combinator, set together with `operands`.
    pub operator: Option<QueryOperator>,
    /// Operand queries combined via `operator`.
    pub operands: Option<Vec<AgentQuery>>,
}

impl AgentQuery {
    /// Builds a leaf query matching nodes of the given kind.
    #[must_use]
    pub fn of_type(query_type: impl Into<String>) -> Self {
        Self {
            query_type: query_type.into(),
            ..Self::default()
        }
    }

    /// Restricts this query to nodes whose name matches `pattern`.
    #[must_use]
    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }
}

/// The kind of edit a [`TransformOp`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMethod {
    /// Replace the matched node with `replacement`.
    Replace,
    /// Remove the matched node entirely.
    Delete,
    /// Insert `content` immediately before the matched node.
    InsertBefore,
    /// Insert `content` immediately after the matched node.
    InsertAfter,
    /// Append `content` after the matched node's enclosing block.
    Append,
}

/// A transformation request: find nodes matching `target`, then apply
/// `method` to each.
#[derive(Debug, Clone)]
pub struct TransformOp {
    /// The edit to perform.
    pub method: TransformMethod,
    /// Query selecting the nodes to edit.
    pub target: AgentQuery,
    /// Replacement text for [`TransformMethod::Replace`].
    pub replacement: Option<String>,
    /// Text to insert for the `insert_*`/`append` methods.
    pub content: Option<String>,
}

impl TransformOp {
    /// Builds a replace operation.
    #[must_use]
    pub fn replace(target: AgentQuery, replacement: impl Into<String>) -> Self {
        Self {
            method: TransformMethod::Replace,
            target,
            replacement: Some(replacement.into()),
            content: None,
        }
    }

    /// Builds a delete operation.
    #[must_use]
    pub fn delete(target: AgentQuery) -> Self {
        Self {
            method: TransformMethod::Delete,
            target,
            replacement: None,
            content: None,
        }
    }
}

/// A single structural match reported by a provider's `query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// One-based line the match starts on.
    pub line: u32,
    /// One-based column the match starts on.
    pub column: u32,
    /// The matched source text.
    pub text: String,
    /// Provider-defined node kind of the match.
    pub node_kind: String,
}

/// Outcome of [`Provider::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Matches found, in source order.
    pub matches: Vec<Match>,
    /// Total match count (equal to `matches.len()` unless the provider caps
    /// how many matches it materializes).
    pub total: usize,
    /// Set when the provider could not evaluate the query at all.
    pub error: Option<String>,
}

/// Outcome of [`Provider::transform`].
#[derive(Debug, Clone)]
pub struct TransformResult {
    /// The full transformed source. Equal to the input when `match_count`
    /// is zero.
    pub modified: String,
    /// A unified-diff-style rendering of the change, for display only.
    pub diff: String,
    /// The provider's confidence that this transform is correct/intended.
    pub confidence: ConfidenceScore,
    /// Number of sites the transform touched.
    pub match_count: usize,
    /// Set when the provider failed to apply the transform.
    pub error: Option<String>,
}

/// Result of an optional structural validity check (`Provider::validate`).
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Whether the source is structurally valid.
    pub valid: bool,
    /// Diagnostics explaining any invalidity.
    pub errors: Vec<String>,
}

/// Optional usage counters a provider may report (`Provider::stats`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderStats {
    /// Number of parser instances borrowed from an internal pool.
    pub borrow_count: u64,
    /// Number of parser instances returned to the pool.
    pub return_count: u64,
    /// Number currently checked out.
    pub active: u64,
}

/// A pluggable, language-specific query/transform backend.
///
/// Implementations are treated as potentially blocking and are never called
/// concurrently on the same instance unless they document thread safety
/// themselves (spec §5); `Send + Sync` only guarantees the registry can hand
/// out shared references across worker threads, not that the provider
/// tolerates overlapping calls.
pub trait Provider: Send + Sync {
    /// The language identifier this provider handles (matches a Catalog id).
    fn language(&self) -> &str;

    /// File extensions this provider should be registered against.
    fn extensions(&self) -> &[&str];

    /// Evaluates a structural query against `source`.
    fn query(&self, source: &str, query: &AgentQuery) -> QueryResult;

    /// Applies a transformation to `source`.
    fn transform(&self, source: &str, op: &TransformOp) -> TransformResult;

    /// Checks whether `source` is structurally valid. Default: no opinion.
    fn validate(&self, _source: &str) -> ValidationResult {
        ValidationResult {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Query kinds this provider understands. Default: none advertised.
    fn supported_query_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// Internal usage counters, if the provider tracks them.
    fn stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

/// Looks up providers by language identifier (C8).
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, also registering its extensions with the
    /// process-wide Language Catalog (C2).
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        catalog::register(provider.language(), provider.extensions());
        self.providers
            .insert(provider.language().to_string(), provider);
    }

    /// Looks up the provider registered for a language, if any.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(language).cloned()
    }

    /// Returns every registered provider.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.values().cloned().collect()
    }

    /// Returns every registered language id, sorted.
    #[must_use]
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.providers.keys().cloned().collect();
        langs.sort();
        langs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider;

    impl Provider for StubProvider {
        fn language(&self) -> &str {
            "stub"
        }

        fn extensions(&self) -> &[&str] {
            &[".stub"]
        }

        fn query(&self, _source: &str, _query: &AgentQuery) -> QueryResult {
            QueryResult::default()
        }

        fn transform(&self, source: &str, _op: &TransformOp) -> TransformResult {
            TransformResult {
                modified: source.to_string(),
                diff: String::new(),
                confidence: ConfidenceScore::zero(),
                match_count: 0,
                error: None,
            }
        }
    }

    #[test]
    fn register_then_get_roundtrips() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.get("stub").is_none());

        registry.register(Arc::new(StubProvider));
        let provider = registry.get("stub").expect("registered provider");
        assert_eq!(provider.language(), "stub");
        assert_eq!(registry.languages(), vec!["stub".to_string()]);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn register_also_populates_catalog() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider));
        let (lang, found) = catalog::lookup_by_extension(".stub");
        assert!(found);
        assert_eq!(lang, "stub");
    }
}
