//! Glob matching over `/`-separated paths: `*` matches within one segment,
//! `?` matches a single character. No segment-spanning wildcard (`**`) is
//! supported; scan only needs single-segment globs.

/// Split the pattern at the first wildcard and return the longest literal
/// prefix, used by [`crate::engine::Engine::scan`] as a storage seek hint.
pub fn literal_prefix(pattern: &str) -> String {
    let end = pattern
        .find(['*', '?'])
        .unwrap_or(pattern.len());
    pattern[..end].to_string()
}

/// Whether `path` matches `pattern` under glob semantics.
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    if pattern_segments.len() != path_segments.len() {
        return false;
    }

    pattern_segments
        .iter()
        .zip(path_segments.iter())
        .all(|(p, s)| segment_matches(p, s))
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();
    segment_matches_rec(&p, &s)
}

fn segment_matches_rec(p: &[char], s: &[char]) -> bool {
    match p.first() {
        None => s.is_empty(),
        Some('*') => {
            // Try consuming zero or more characters of `s` for this `*`.
            (0..=s.len()).any(|n| segment_matches_rec(&p[1..], &s[n..]))
        }
        Some('?') => !s.is_empty() && segment_matches_rec(&p[1..], &s[1..]),
        Some(c) => !s.is_empty() && s[0] == *c && segment_matches_rec(&p[1..], &s[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_prefix_stops_at_wildcard() {
        assert_eq!(literal_prefix("proj/a*b"), "proj/a");
        assert_eq!(literal_prefix("proj/exact"), "proj/exact");
        assert_eq!(literal_prefix("*"), "");
    }

    #[test]
    fn single_segment_wildcard_does_not_cross_slash() {
        assert!(matches("proj/*", "proj/a"));
        assert!(!matches("proj/*", "proj/sub/c"));
    }

    #[test]
    fn segment_wildcard_matches_within_middle_segment() {
        assert!(matches("proj/*/c", "proj/sub/c"));
        assert!(!matches("proj/*/c", "proj/sub/other/c"));
    }

    #[test]
    fn question_mark_matches_exactly_one_char() {
        assert!(matches("a?c", "abc"));
        assert!(!matches("a?c", "ac"));
        assert!(!matches("a?c", "abbc"));
    }

    #[test]
    fn no_wildcard_requires_exact_match() {
        assert!(matches("proj/a", "proj/a"));
        assert!(!matches("proj/a", "proj/b"));
    }
}
