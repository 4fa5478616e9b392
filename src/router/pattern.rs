//! Route pattern syntax.
//!
//! Patterns are `/`-separated. A segment wrapped in braces (`{user}`) is a
//! named parameter that matches exactly one request-path segment; every other
//! segment is a literal. Empty segments are ignored, so `/a//b/` and `/a/b`
//! are the same pattern.

use std::fmt;

/// A single pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Parameter(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => Segment::Parameter(name.to_owned()),
            None => Segment::Literal(raw.to_owned()),
        }
    }
}

/// A parsed route pattern, keeping the source text it was registered with.
///
/// # Examples
///
/// ```
/// use httprib::router::pattern::{RoutePattern, Segment};
///
/// let pattern = RoutePattern::parse("api/{version}/users/{id}");
/// assert_eq!(pattern.as_str(), "/api/{version}/users/{id}");
/// assert_eq!(pattern.param_names().collect::<Vec<_>>(), vec!["version", "id"]);
/// assert_eq!(pattern.segments()[0], Segment::Literal("api".into()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parses `pattern`, prefixing a `/` if it is missing.
    pub fn parse(pattern: &str) -> Self {
        let source = if pattern.starts_with('/') {
            pattern.to_owned()
        } else {
            format!("/{pattern}")
        };
        let segments = split_segments(&source).map(Segment::parse).collect();
        Self { source, segments }
    }

    /// The pattern as registered (with the leading `/` ensured).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The first parameter name declared more than once, if any.
    pub fn duplicate_param(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.param_names().find(|name| !seen.insert(*name))
    }

    /// Declared parameter names, left to right.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Parameter(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Splits a path into its non-empty `/`-separated segments.
pub fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
