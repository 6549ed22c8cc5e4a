//! Path prefix matching.
//!
//! # Design Decisions
//! - Matching is case-sensitive and segment-bounded: `/api/ai` matches
//!   `/api/ai` and `/api/ai/reply`, never `/api/aitools`
//! - A trailing slash in the configured prefix is ignored
//! - No regex to guarantee O(n) matching

/// Matches a request path against a prefix and strips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.strip(path).is_some()
    }

    /// The part of `path` after the prefix, starting with `/` or empty.
    pub fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}
