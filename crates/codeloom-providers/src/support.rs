//! Shared Tree-sitter plumbing for the reference providers.
//!
//! Mirrors `weaver-syntax`'s `Parser`/`ParseResult` wrapper shape (parse
//! once, ask whether the tree contains error nodes) without reimplementing
//! its considerably larger pattern compiler: a reference provider only
//! needs "find nodes of kind X" and "did this edit introduce new errors",
//! not arbitrary structural pattern matching.

use std::ops::Range;

use codeloom_core::confidence::{ConfidenceFactor, ConfidenceScore};
use codeloom_core::provider::AgentQuery;
use tree_sitter::{Language, Node, Parser, Tree};

pub(crate) struct ParsedSource {
    tree: Tree,
}

impl ParsedSource {
    pub(crate) fn parse(language: Language, source: &str) -> Option<Self> {
        let mut parser = Parser::new();
        parser.set_language(&language).ok()?;
        let tree = parser.parse(source, None)?;
        Some(Self { tree })
    }

    pub(crate) fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

/// True if `node` or any descendant is an ERROR or MISSING node.
pub(crate) fn has_error_nodes(node: Node<'_>) -> bool {
    if node.is_error() || node.is_missing() {
        return true;
    }
    let mut cursor = node.walk();
    node.children(&mut cursor).any(has_error_nodes)
}

/// A single node the traversal matched, with everything needed to build
/// either a public [`codeloom_core::provider::Match`] or apply an edit.
pub(crate) struct NodeMatch {
    pub(crate) range: Range<usize>,
    pub(crate) line: u32,
    pub(crate) column: u32,
    pub(crate) text: String,
    pub(crate) kind: String,
    /// Byte offset to insert at for `append`: the end of the nearest
    /// enclosing block, or the node's own end when there is none.
    pub(crate) block_end: usize,
}

fn text_of<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or_default()
}

fn name_of<'a>(node: Node<'_>, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name("name")
        .map(|n| text_of(n, source))
}

fn enclosing_block_end(node: Node<'_>) -> usize {
    let mut current = node;
    while let Some(parent) = current.parent() {
        if parent.kind().ends_with("block") || parent.kind() == "source_file" || parent.kind() == "module" {
            return parent.end_byte();
        }
        current = parent;
    }
    node.end_byte()
}

/// Minimal single-segment glob: `*` matches any run of characters, every
/// other character matches literally. Node names never contain a path
/// separator, so there is no need for the walker's `**`/segment handling
/// here.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let mut dp = vec![vec![false; txt.len() + 1]; pat.len() + 1];
    dp[0][0] = true;
    for (i, &pc) in pat.iter().enumerate() {
        if pc == '*' {
            dp[i + 1][0] = dp[i][0];
        }
    }
    for (i, &pc) in pat.iter().enumerate() {
        for j in 0..txt.len() {
            dp[i + 1][j + 1] = if pc == '*' {
                dp[i][j + 1] || dp[i + 1][j]
            } else {
                dp[i][j] && pc == txt[j]
            };
        }
    }
    dp[pat.len()][txt.len()]
}

fn name_matches(pattern: Option<&str>, name: Option<&str>) -> bool {
    match (pattern, name) {
        (None, _) => true,
        (Some(pattern), Some(name)) => glob_match(pattern, name),
        (Some(_), None) => false,
    }
}

/// Finds whether any descendant of `node` (excluding `node` itself)
/// satisfies `query`, used for [`AgentQuery::contains`].
fn has_matching_descendant(node: Node<'_>, source: &str, kinds: &[&str], query: &AgentQuery) -> bool {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) && name_matches(query.name_pattern.as_deref(), name_of(child, source)) {
            return true;
        }
        if has_matching_descendant(child, source, kinds, query) {
            return true;
        }
    }
    false
}

/// Walks `node` and every descendant, collecting matches whose kind is in
/// `kinds`, whose name (when the grammar exposes one) satisfies
/// `target.name_pattern`, and whose descendants satisfy `target.contains`
/// when set.
///
/// `target.operator`/`target.operands` (boolean composition across
/// differently-kinded sub-queries) is intentionally unsupported here: the
/// reference providers exist to exercise the pipeline end to end, not to
/// be a general structural query engine.
pub(crate) fn collect_matches(
    node: Node<'_>,
    source: &str,
    kinds: &[&str],
    target: &AgentQuery,
    resolve_contains_kinds: impl Fn(&str) -> Option<&'static [&'static str]> + Copy,
    out: &mut Vec<NodeMatch>,
) {
    if kinds.contains(&node.kind()) && name_matches(target.name_pattern.as_deref(), name_of(node, source)) {
        let contains_ok = match &target.contains {
            None => true,
            Some(inner) => resolve_contains_kinds(&inner.query_type)
                .is_some_and(|inner_kinds| has_matching_descendant(node, source, inner_kinds, inner)),
        };
        if contains_ok {
            let position = node.start_position();
            out.push(NodeMatch {
                range: node.byte_range(),
                line: u32::try_from(position.row.saturating_add(1)).unwrap_or(u32::MAX),
                column: u32::try_from(position.column.saturating_add(1)).unwrap_or(u32::MAX),
                text: text_of(node, source).to_string(),
                kind: node.kind().to_string(),
                block_end: enclosing_block_end(node),
            });
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_matches(child, source, kinds, target, resolve_contains_kinds, out);
    }
}

/// Reports high confidence when re-parsing `modified` introduces no new
/// error nodes beyond what `original_had_errors` already had, and low
/// confidence otherwise. The same round-trip signal
/// `TreeSitterSyntacticLock`/`ParseResult::has_errors` already expose.
pub(crate) fn confidence_from_reparse(language: Language, modified: &str, original_had_errors: bool) -> ConfidenceScore {
    let Some(parsed) = ParsedSource::parse(language, modified) else {
        return ConfidenceScore::new(
            0.0,
            vec![ConfidenceFactor::new(
                "reparse_failed",
                -1.0,
                "modified source could not be re-parsed",
            )],
        );
    };
    let now_has_errors = has_error_nodes(parsed.root());
    if now_has_errors && !original_had_errors {
        ConfidenceScore::new(
            0.3,
            vec![ConfidenceFactor::new(
                "introduced_syntax_errors",
                -0.7,
                "the edit introduced parse errors not present in the original",
            )],
        )
    } else if now_has_errors {
        ConfidenceScore::new(
            0.5,
            vec![ConfidenceFactor::new(
                "preexisting_syntax_errors",
                -0.5,
                "the source already contained parse errors before the edit",
            )],
        )
    } else {
        ConfidenceScore::new(0.95, Vec::new())
    }
}
