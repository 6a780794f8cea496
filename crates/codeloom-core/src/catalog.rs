//! Process-wide language catalog.
//!
//! Maps file extensions to language identifiers. Providers register their
//! extensions here (directly, or indirectly via
//! [`crate::provider::ProviderRegistry::register`]) so that the File Walker
//! (§4.3) and File Processor (§4.6) can detect a file's language without
//! depending on any particular provider crate.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

/// Extension-to-language fallback table used when no provider has
/// registered the extension. Mirrors the language list in spec §4.3.
const BUILTIN_EXTENSIONS: &[(&str, &str)] = &[
    (".go", "go"),
    (".py", "python"),
    (".pyi", "python"),
    (".js", "javascript"),
    (".jsx", "javascript"),
    (".mjs", "javascript"),
    (".ts", "typescript"),
    (".tsx", "typescript"),
    (".java", "java"),
    (".c", "c"),
    (".h", "c"),
    (".cc", "cpp"),
    (".cpp", "cpp"),
    (".cxx", "cpp"),
    (".hpp", "cpp"),
    (".cs", "csharp"),
    (".rb", "ruby"),
    (".php", "php"),
    (".rs", "rust"),
    (".kt", "kotlin"),
    (".kts", "kotlin"),
    (".swift", "swift"),
    (".dart", "dart"),
    (".scala", "scala"),
    (".clj", "clojure"),
    (".cljs", "clojure"),
    (".ml", "ocaml"),
    (".mli", "ocaml"),
    (".hs", "haskell"),
    (".elm", "elm"),
    (".ex", "elixir"),
    (".exs", "elixir"),
    (".erl", "erlang"),
];

/// Identifier returned for extensions the catalog does not recognise.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

struct CatalogEntry {
    language: String,
    extensions: Vec<String>,
}

static CATALOG: Lazy<RwLock<HashMap<String, CatalogEntry>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (ext, lang) in BUILTIN_EXTENSIONS {
        map.entry(lang.to_string())
            .or_insert_with(|| CatalogEntry {
                language: (*lang).to_string(),
                extensions: Vec::new(),
            })
            .extensions
            .push((*ext).to_string());
    }
    RwLock::new(map)
});

fn normalize_extension(ext: &str) -> String {
    let lower = ext.to_ascii_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

/// Registers a language with the catalog under the given extensions.
///
/// Extensions are normalized to lowercase with a leading dot; duplicates
/// within the list are dropped. A later registration for the same
/// `language_id` replaces the extensions recorded by an earlier one.
pub fn register(language_id: &str, extensions: &[&str]) {
    let mut normalized: Vec<String> = Vec::with_capacity(extensions.len());
    for ext in extensions {
        let n = normalize_extension(ext);
        if !normalized.contains(&n) {
            normalized.push(n);
        }
    }

    let mut guard = CATALOG.write().unwrap_or_else(|e| e.into_inner());
    guard.insert(
        language_id.to_string(),
        CatalogEntry {
            language: language_id.to_string(),
            extensions: normalized,
        },
    );
}

/// Looks up the language identifier registered for a file extension.
///
/// `ext` may be given with or without a leading dot. Returns `(id, true)`
/// when a match is found, otherwise `("unknown", false)`.
#[must_use]
pub fn lookup_by_extension(ext: &str) -> (String, bool) {
    let needle = normalize_extension(ext);
    let guard = CATALOG.read().unwrap_or_else(|e| e.into_inner());
    for entry in guard.values() {
        if entry.extensions.iter().any(|e| e == &needle) {
            return (entry.language.clone(), true);
        }
    }
    (UNKNOWN_LANGUAGE.to_string(), false)
}

/// Returns every registered language and its extensions, sorted by
/// language id.
#[must_use]
pub fn languages() -> Vec<(String, Vec<String>)> {
    let guard = CATALOG.read().unwrap_or_else(|e| e.into_inner());
    let mut out: Vec<(String, Vec<String>)> = guard
        .values()
        .map(|entry| (entry.language.clone(), entry.extensions.clone()))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // The catalog is process-wide state; serialize tests that mutate it.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn builtin_table_resolves_known_extensions() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let (lang, found) = lookup_by_extension("rs");
        assert!(found);
        assert_eq!(lang, "rust");

        let (lang, found) = lookup_by_extension(".PY");
        assert!(found);
        assert_eq!(lang, "python");
    }

    #[test]
    fn unknown_extension_reports_unknown() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let (lang, found) = lookup_by_extension(".nonexistent-ext");
        assert!(!found);
        assert_eq!(lang, UNKNOWN_LANGUAGE);
    }

    #[test]
    fn register_replaces_prior_extensions_for_same_language() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        register("test-lang-catalog", &[".tlc1", ".tlc2"]);
        let (lang, found) = lookup_by_extension(".tlc1");
        assert!(found);
        assert_eq!(lang, "test-lang-catalog");

        register("test-lang-catalog", &[".tlc3"]);
        let (_, found) = lookup_by_extension(".tlc1");
        assert!(!found, "stale extension should no longer resolve");
        let (lang, found) = lookup_by_extension(".tlc3");
        assert!(found);
        assert_eq!(lang, "test-lang-catalog");
    }

    #[test]
    fn register_dedupes_extensions() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        register("test-lang-dedupe", &[".dd", ".DD", ".dd"]);
        let entry = languages()
            .into_iter()
            .find(|(id, _)| id == "test-lang-dedupe")
            .expect("registered language present");
        assert_eq!(entry.1, vec![".dd".to_string()]);
    }
}
