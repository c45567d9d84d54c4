//! Breadcrumb queries
//!
//! A query names the tag to stop at and, optionally, the chain of ancestors
//! leading to it. `root/item/*` matches any child of an `item` directly
//! inside `root`, wherever that chain sits in the document.

use crate::core::scanner::is_name;
use crate::error::QueryError;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Matches any single element name.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagQuery {
    /// Element names from an ancestor down to the tag itself. `None`
    /// matches every tag.
    pub breadcrumbs: Option<Vec<String>>,
    /// Stop at the n-th match, counting from 1.
    pub match_offset: usize,
    /// Also stop on tag closers.
    pub visit_closers: bool,
}

impl Default for TagQuery {
    fn default() -> Self {
        TagQuery {
            breadcrumbs: None,
            match_offset: 1,
            visit_closers: false,
        }
    }
}

impl TagQuery {
    /// Every tag opener
    pub fn any() -> Self {
        Self::default()
    }

    /// Tags with the given name, at any depth
    pub fn tag(name: &str) -> Self {
        Self::path([name])
    }

    pub fn path<I, S>(breadcrumbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagQuery {
            breadcrumbs: Some(breadcrumbs.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Parse `a/b/c`, where each segment is an element name or `*`.
    pub fn parse(query: &str) -> Result<Self, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::Empty);
        }

        let breadcrumbs = query
            .split('/')
            .map(str::trim)
            .map(|segment| {
                if segment == WILDCARD || is_name(segment) {
                    Ok(segment.to_owned())
                } else {
                    Err(QueryError::InvalidSegment(segment.to_owned()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::path(breadcrumbs))
    }

    pub fn nth(mut self, match_offset: usize) -> Result<Self, QueryError> {
        if match_offset == 0 {
            return Err(QueryError::ZeroOffset);
        }
        self.match_offset = match_offset;
        Ok(self)
    }

    pub fn with_closers(mut self) -> Self {
        self.visit_closers = true;
        self
    }

    /// Check the query against a stack of open elements, innermost last.
    pub fn matches<S: AsRef<str>>(&self, stack: &[S]) -> bool {
        match &self.breadcrumbs {
            None => true,
            Some(breadcrumbs) => breadcrumbs_match(breadcrumbs, stack),
        }
    }
}

/// True if `breadcrumbs` matches the innermost end of `stack`.
pub fn breadcrumbs_match<B: AsRef<str>, S: AsRef<str>>(breadcrumbs: &[B], stack: &[S]) -> bool {
    if breadcrumbs.is_empty() || breadcrumbs.len() > stack.len() {
        return false;
    }

    let tail = &stack[stack.len() - breadcrumbs.len()..];
    breadcrumbs
        .iter()
        .zip(tail)
        .all(|(crumb, name)| crumb.as_ref() == WILDCARD || crumb.as_ref() == name.as_ref())
}

/// Parsed queries keyed by their source text.
///
/// Shared by every caller that hands queries over as strings; the lock is
/// only held for the lookup.
pub struct QueryCache {
    cache: Mutex<LruCache<String, Arc<TagQuery>>>,
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        QueryCache {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_parse(&self, query: &str) -> Result<Arc<TagQuery>, QueryError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(parsed) = cache.get(query) {
                return Ok(Arc::clone(parsed));
            }
        }

        let parsed = Arc::new(TagQuery::parse(query)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(query.to_owned(), Arc::clone(&parsed));
        }
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a", &["root", "a"], true)]
    #[case("root/a", &["root", "a"], true)]
    #[case("root/*", &["root", "a"], true)]
    #[case("*/a", &["x", "root", "a"], true)]
    #[case("root/a", &["x", "root", "a"], true)]
    #[case("x/a", &["root", "a"], false)]
    #[case("root/a/b", &["root", "a"], false)]
    #[case("a", &["root", "a", "b"], false)]
    fn test_matches(#[case] query: &str, #[case] stack: &[&str], #[case] expected: bool) {
        assert_eq!(TagQuery::parse(query).unwrap().matches(stack), expected);
    }

    #[test]
    fn test_any_matches_everything() {
        assert!(TagQuery::any().matches(&["r"]));
        assert!(!breadcrumbs_match::<&str, &str>(&[], &["r"]));
    }

    #[rstest]
    #[case("", QueryError::Empty)]
    #[case("a//b", QueryError::InvalidSegment(String::new()))]
    #[case("a/1b", QueryError::InvalidSegment("1b".into()))]
    fn test_parse_errors(#[case] query: &str, #[case] expected: QueryError) {
        assert_eq!(TagQuery::parse(query), Err(expected));
    }

    #[test]
    fn test_builders() {
        let query = TagQuery::parse(" root / item ").unwrap().nth(2).unwrap().with_closers();
        assert_eq!(query.breadcrumbs, Some(vec!["root".to_owned(), "item".to_owned()]));
        assert_eq!(query.match_offset, 2);
        assert!(query.visit_closers);
        assert_eq!(TagQuery::tag("a").nth(0), Err(QueryError::ZeroOffset));
    }

    #[test]
    fn test_cache_reuses_parsed_queries() {
        let cache = QueryCache::new(NonZeroUsize::new(2).unwrap());
        let first = cache.get_or_parse("root/a").unwrap();
        let again = cache.get_or_parse("root/a").unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        cache.get_or_parse("b").unwrap();
        cache.get_or_parse("c").unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get_or_parse("bad query").is_err());
    }
}
