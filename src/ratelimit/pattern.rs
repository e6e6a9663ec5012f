//! Route pattern matching with single-segment wildcards.

/// Segment that matches any one non-empty path segment.
pub const WILDCARD: &str = "*";

/// Check whether `path` matches `pattern`.
///
/// Both are split on `/` and must have the same number of segments. Each
/// pattern segment must equal the path segment, or be exactly `*`, which
/// matches one non-empty segment. A `*` inside a segment (`ab*`) has no
/// special meaning.
pub fn matches(path: &str, pattern: &str) -> bool {
    let mut path_segments = path.split('/');
    let mut pattern_segments = pattern.split('/');

    loop {
        match (path_segments.next(), pattern_segments.next()) {
            (None, None) => return true,
            (Some(segment), Some(expected)) => {
                let ok = if expected == WILDCARD {
                    !segment.is_empty()
                } else {
                    segment == expected
                };
                if !ok {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Prefix `path` with `/` if it does not already start with one.
pub fn normalize(path: &str) -> std::borrow::Cow<'_, str> {
    if path.starts_with('/') {
        std::borrow::Cow::Borrowed(path)
    } else {
        std::borrow::Cow::Owned(format!("/{}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("/auth", "/auth"));
        assert!(!matches("/auth", "/login"));
        assert!(!matches("/auth", "/Auth"));
    }

    #[test]
    fn test_wildcard_matches_single_segment() {
        assert!(matches("/api/v1/items", "/api/v1/*"));
        assert!(matches("/api/v2/items", "/api/*/items"));
        assert!(!matches("/api/items", "/api/v1/*"));
        assert!(!matches("/api/v1/items/extra", "/api/v1/*"));
    }

    #[test]
    fn test_root_path() {
        assert!(matches("/", "/"));
        assert!(!matches("/", "/*"));
        assert!(matches("/x", "/*"));
        assert!(!matches("/x/y", "/*"));
    }

    #[test]
    fn test_partial_wildcard_is_literal() {
        assert!(!matches("/abc", "/ab*"));
        assert!(matches("/ab*", "/ab*"));
    }

    #[test]
    fn test_trailing_slash_changes_segment_count() {
        assert!(!matches("/auth/", "/auth"));
        assert!(!matches("/api/", "/api/*"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("auth"), "/auth");
        assert_eq!(normalize("/auth"), "/auth");
        assert_eq!(normalize(""), "/");
    }
}
