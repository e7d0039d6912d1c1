//! URL patterns used to classify intercepted requests.

use crate::Url;

/// What part of the URL a pattern is compared against, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Full URL equality.
    Exact,
    /// Path starts with the pattern.
    Prefix,
    /// Path contains the pattern.
    Contains,
    /// Last path segment ends with `.<pattern>` (case-insensitive).
    Extension,
}

/// A single URL pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    pub pattern_type: PatternType,
    pub pattern: String,
}

impl UrlPattern {
    pub fn exact(url: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: url.to_string(),
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Match a file extension, with or without the leading dot.
    pub fn extension(ext: &str) -> Self {
        Self {
            pattern_type: PatternType::Extension,
            pattern: ext.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        match self.pattern_type {
            PatternType::Exact => url.as_str() == self.pattern,
            PatternType::Prefix => url.path().starts_with(&self.pattern),
            PatternType::Contains => url.path().contains(&self.pattern),
            PatternType::Extension => extension_of(url)
                .map(|ext| ext == self.pattern)
                .unwrap_or(false),
        }
    }
}

/// Lower-cased extension of the last path segment, if any.
pub fn extension_of(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Whether the URL path names an image by its guessed MIME type.
pub fn is_image(url: &Url) -> bool {
    mime_guess::from_path(url.path())
        .first()
        .map(|m| m.type_() == mime::IMAGE)
        .unwrap_or(false)
}

/// Whether any pattern in the set matches.
pub fn any_match(patterns: &[UrlPattern], url: &Url) -> bool {
    patterns.iter().any(|p| p.matches(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extension_match_ignores_query_and_case() {
        let pattern = UrlPattern::extension(".CSS");
        assert!(pattern.matches(&url("https://app.test/static/app.css?v=3")));
        assert!(pattern.matches(&url("https://app.test/APP.Css")));
        assert!(!pattern.matches(&url("https://app.test/app.css.map")));
        assert!(!pattern.matches(&url("https://app.test/")));
    }

    #[test]
    fn test_contains_checks_path_only() {
        let pattern = UrlPattern::contains("/api/");
        assert!(pattern.matches(&url("https://app.test/api/list")));
        assert!(!pattern.matches(&url("https://api.test/list?next=/api/")));
    }

    #[test]
    fn test_exact_and_prefix() {
        assert!(UrlPattern::exact("https://app.test/").matches(&url("https://app.test/")));
        assert!(UrlPattern::prefix("/_next/").matches(&url("https://app.test/_next/chunk.js")));
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(&url("https://app.test/logo.png")));
        assert!(is_image(&url("https://app.test/icons/a.svg")));
        assert!(!is_image(&url("https://app.test/app.js")));
        assert!(!is_image(&url("https://app.test/fonts/inter.woff2")));
    }
}
