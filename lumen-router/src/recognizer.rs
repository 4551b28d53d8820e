//! Route recognition
//!
//! Registered path patterns are matched against concrete paths, producing the
//! best match plus extracted parameters. Patterns are made of `/`-separated
//! segments:
//!
//! - static segments (`users`) match their literal text,
//! - dynamic segments (`:id`) match exactly one path segment and capture it,
//! - splat segments (`*rest`) match the remainder of the path and capture it.
//!
//! When several patterns match, the more specific one wins: segments are
//! compared left to right with static beating dynamic beating splat, and on a
//! tie the pattern consuming more segments wins. Route scopes register every
//! configured path twice — once plain and once with a `/*rest` suffix — which
//! is how partial matches with deferred residue are produced.

use crate::instruction::Params;
use tracing::trace;

/// Capture name used by route scopes for the deferred-residue registration.
pub const RESIDUE_PARAM: &str = "rest";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Static(String),
    Dynamic(String),
    Splat(String),
}

impl PatternSegment {
    // Specificity rank for best-match comparison.
    fn rank(&self) -> u8 {
        match self {
            Self::Static(_) => 2,
            Self::Dynamic(_) => 1,
            Self::Splat(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
struct RegisteredPattern<T> {
    raw: String,
    segments: Vec<PatternSegment>,
    case_sensitive: bool,
    handler: T,
}

/// A successful recognition.
#[derive(Debug, Clone)]
pub struct RecognizedRoute<T> {
    /// The handler registered with the winning pattern.
    pub handler: T,
    /// Captured dynamic parameters.
    pub params: Params,
    /// Unconsumed path remainder captured by a `*rest` registration.
    pub residue: Option<String>,
    /// The winning pattern, as registered.
    pub pattern: String,
}

/// Path-pattern matcher with best-match selection.
#[derive(Debug, Clone)]
pub struct RouteRecognizer<T: Clone> {
    routes: Vec<RegisteredPattern<T>>,
}

impl<T: Clone> Default for RouteRecognizer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RouteRecognizer<T> {
    /// Create an empty recognizer.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a pattern. Later registrations of an identical pattern are
    /// ignored, keeping registration idempotent.
    pub fn add(&mut self, pattern: &str, handler: T, case_sensitive: bool) {
        let normalized = pattern.trim_matches('/');
        if self.routes.iter().any(|r| r.raw == normalized) {
            trace!(pattern = normalized, "pattern already registered, skipping");
            return;
        }
        let segments = if normalized.is_empty() {
            Vec::new()
        } else {
            normalized
                .split('/')
                .map(|segment| {
                    if let Some(name) = segment.strip_prefix(':') {
                        PatternSegment::Dynamic(name.to_string())
                    } else if let Some(name) = segment.strip_prefix('*') {
                        PatternSegment::Splat(name.to_string())
                    } else {
                        PatternSegment::Static(segment.to_string())
                    }
                })
                .collect()
        };
        trace!(pattern = normalized, "registered route pattern");
        self.routes.push(RegisteredPattern {
            raw: normalized.to_string(),
            segments,
            case_sensitive,
            handler,
        });
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no patterns are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The registered patterns, for diagnostics.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.routes.iter().map(|r| r.raw.clone()).collect();
        patterns.sort();
        patterns
    }

    /// Match `path` against the registered patterns and return the best match.
    pub fn recognize(&self, path: &str) -> Option<RecognizedRoute<T>> {
        let normalized = path.trim_matches('/');
        let segments: Vec<&str> = if normalized.is_empty() {
            Vec::new()
        } else {
            normalized.split('/').collect()
        };

        let mut best: Option<(Vec<u8>, usize, RecognizedRoute<T>)> = None;
        for route in &self.routes {
            if let Some((ranks, matched)) = match_pattern(route, &segments) {
                let better = match &best {
                    None => true,
                    Some((best_ranks, best_len, _)) => {
                        ranks > *best_ranks || (ranks == *best_ranks && matched.consumed > *best_len)
                    }
                };
                if better {
                    let consumed = matched.consumed;
                    best = Some((ranks, consumed, matched.into_recognized(route)));
                }
            }
        }
        best.map(|(_, _, recognized)| {
            trace!(path, pattern = %recognized.pattern, "recognized route");
            recognized
        })
    }
}

struct PatternMatch {
    params: Params,
    residue: Option<String>,
    consumed: usize,
}

impl PatternMatch {
    fn into_recognized<T: Clone>(self, route: &RegisteredPattern<T>) -> RecognizedRoute<T> {
        let mut params = self.params;
        let residue = self.residue.or_else(|| params.remove(RESIDUE_PARAM));
        RecognizedRoute {
            handler: route.handler.clone(),
            params,
            residue,
            pattern: route.raw.clone(),
        }
    }
}

fn match_pattern<T: Clone>(
    route: &RegisteredPattern<T>,
    segments: &[&str],
) -> Option<(Vec<u8>, PatternMatch)> {
    let mut params = Params::new();
    let mut ranks = Vec::with_capacity(route.segments.len());
    let mut i = 0;

    for (pos, pattern_segment) in route.segments.iter().enumerate() {
        match pattern_segment {
            PatternSegment::Static(text) => {
                let segment = segments.get(i)?;
                let matches = if route.case_sensitive {
                    *segment == text.as_str()
                } else {
                    segment.eq_ignore_ascii_case(text)
                };
                if !matches {
                    return None;
                }
                ranks.push(pattern_segment.rank());
                i += 1;
            }
            PatternSegment::Dynamic(name) => {
                let segment = segments.get(i)?;
                params.insert(name.clone(), (*segment).to_string());
                ranks.push(pattern_segment.rank());
                i += 1;
            }
            PatternSegment::Splat(name) => {
                // A splat must be the final pattern segment and must consume
                // at least one path segment.
                if pos != route.segments.len() - 1 || i >= segments.len() {
                    return None;
                }
                params.insert(name.clone(), segments[i..].join("/"));
                ranks.push(pattern_segment.rank());
                i = segments.len();
            }
        }
    }

    if i != segments.len() {
        return None;
    }

    Some((
        ranks,
        PatternMatch {
            params,
            residue: None,
            consumed: i,
        },
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer(patterns: &[&str]) -> RouteRecognizer<&'static str> {
        let mut rec = RouteRecognizer::new();
        for (i, pattern) in patterns.iter().enumerate() {
            // Leak a small label so the handler is 'static in tests.
            let label: &'static str = Box::leak(format!("h{i}").into_boxed_str());
            rec.add(pattern, label, true);
        }
        rec
    }

    #[test]
    fn test_static_match() {
        let rec = recognizer(&["users", "users/settings"]);
        let m = rec.recognize("users/settings").unwrap();
        assert_eq!(m.pattern, "users/settings");
        assert!(m.params.is_empty());
        assert!(m.residue.is_none());
    }

    #[test]
    fn test_dynamic_capture() {
        let rec = recognizer(&["users/:id"]);
        let m = rec.recognize("users/42").unwrap();
        assert_eq!(m.params.get("id"), Some("42"));
    }

    #[test]
    fn test_static_beats_dynamic_beats_splat() {
        let mut rec = RouteRecognizer::new();
        rec.add("users/new", "static", true);
        rec.add("users/:id", "dynamic", true);
        rec.add("users/*rest", "splat", true);

        assert_eq!(rec.recognize("users/new").unwrap().handler, "static");
        assert_eq!(rec.recognize("users/42").unwrap().handler, "dynamic");
        assert_eq!(rec.recognize("users/42/edit").unwrap().handler, "splat");
    }

    #[test]
    fn test_residue_extraction() {
        let mut rec = RouteRecognizer::new();
        rec.add("products", "p", true);
        rec.add("products/*rest", "p", true);

        let full = rec.recognize("products").unwrap();
        assert!(full.residue.is_none());

        let partial = rec.recognize("products/detail/42").unwrap();
        assert_eq!(partial.residue.as_deref(), Some("detail/42"));
        assert!(partial.params.get(RESIDUE_PARAM).is_none());
    }

    #[test]
    fn test_splat_requires_at_least_one_segment() {
        let mut rec = RouteRecognizer::new();
        rec.add("a/*rest", "h", true);
        assert!(rec.recognize("a").is_none());
        assert!(rec.recognize("a/b").is_some());
    }

    #[test]
    fn test_empty_pattern_matches_empty_path() {
        let mut rec = RouteRecognizer::new();
        rec.add("", "root", true);
        assert_eq!(rec.recognize("").unwrap().handler, "root");
        assert_eq!(rec.recognize("/").unwrap().handler, "root");
        assert!(rec.recognize("x").is_none());
    }

    #[test]
    fn test_case_sensitivity() {
        let mut rec = RouteRecognizer::new();
        rec.add("About", "cs", true);
        assert!(rec.recognize("about").is_none());

        let mut rec = RouteRecognizer::new();
        rec.add("About", "ci", false);
        assert!(rec.recognize("about").is_some());
    }

    #[test]
    fn test_duplicate_registration_is_idempotent() {
        let mut rec = RouteRecognizer::new();
        rec.add("a/:id", "first", true);
        rec.add("a/:id", "second", true);
        assert_eq!(rec.len(), 1);
        assert_eq!(rec.recognize("a/1").unwrap().handler, "first");
    }

    #[test]
    fn test_longer_match_wins_on_equal_prefix() {
        let mut rec = RouteRecognizer::new();
        rec.add("a/:x", "short", true);
        rec.add("a/:x/:y", "long", true);
        assert_eq!(rec.recognize("a/1/2").unwrap().handler, "long");
        assert_eq!(rec.recognize("a/1").unwrap().handler, "short");
    }

    #[test]
    fn test_patterns_listing_sorted() {
        let rec = recognizer(&["b", "a/:id"]);
        assert_eq!(rec.patterns(), vec!["a/:id".to_string(), "b".to_string()]);
    }
}
