//! Doublestar-style glob matching against path strings.
//!
//! `*` matches any run of characters within one path segment; `**` matches
//! zero or more whole segments. There is no crate in the corpus that
//! evaluates exactly this grammar against an arbitrary path string (as
//! opposed to driving filesystem iteration itself), so this is a small,
//! self-contained matcher rather than a dependency.

/// Matches a single path segment against a pattern segment containing only
/// literal characters and `*` wildcards.
fn segment_matches(pattern: &str, text: &str) -> bool {
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

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_segments(pattern: &[&str], text: &[&str]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(&"**") => {
            match_segments(&pattern[1..], text)
                || (!text.is_empty() && match_segments(pattern, &text[1..]))
        }
        Some(&seg) => {
            !text.is_empty() && segment_matches(seg, text[0]) && match_segments(&pattern[1..], &text[1..])
        }
    }
}

/// Matches `pattern` against a full path (segment-by-segment, honoring
/// `**`).
#[must_use]
pub fn path_matches(pattern: &str, path: &str) -> bool {
    match_segments(&segments(pattern), &segments(path))
}

/// Matches `pattern` against a full path, falling back to a basename-only
/// match when the pattern contains no path separator.
#[must_use]
pub fn matches(pattern: &str, full_path: &str, basename: &str) -> bool {
    if path_matches(pattern, full_path) {
        return true;
    }
    !pattern.contains('/') && segment_matches(pattern, basename)
}

/// True when `path` (with basename `basename`) matches any pattern in
/// `patterns`. An empty pattern list matches everything.
#[must_use]
pub fn matches_any(patterns: &[String], full_path: &str, basename: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| matches(p, full_path, basename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_segment_only() {
        assert!(segment_matches("*.rs", "main.rs"));
        assert!(!segment_matches("*.rs", "main.rs.bak"));
        assert!(segment_matches("*", "anything"));
    }

    #[test]
    fn doublestar_matches_zero_or_more_segments() {
        assert!(path_matches("**/*.rs", "main.rs"));
        assert!(path_matches("**/*.rs", "src/lib/main.rs"));
        assert!(path_matches("src/**/main.rs", "src/main.rs"));
        assert!(path_matches("src/**/main.rs", "src/a/b/main.rs"));
        assert!(!path_matches("src/**/main.rs", "other/main.rs"));
    }

    #[test]
    fn separator_free_pattern_also_matches_basename() {
        assert!(matches("*.go", "deep/nested/file.go", "file.go"));
        assert!(!path_matches("*.go", "deep/nested/file.go"));
    }

    #[test]
    fn empty_pattern_list_matches_everything() {
        assert!(matches_any(&[], "any/path.rs", "path.rs"));
    }
}
