//! Crawl scope: typed path-prefix sets and the allow/deny membership test

use crate::url::domain::host_key;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A validated set of URL path prefixes
///
/// Prefixes always start with `/`, contain no whitespace, query or fragment
/// characters, and are stored without a trailing slash (except the root `/`).
/// Construction rejects malformed input instead of dropping it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct PathPrefixSet {
    prefixes: Vec<String>,
}

impl PathPrefixSet {
    /// Creates an empty set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a set from individual prefixes, validating each one
    pub fn new<I, S>(prefixes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for raw in prefixes {
            let prefix = validate_prefix(raw.as_ref())?;
            if !set.prefixes.contains(&prefix) {
                set.prefixes.push(prefix);
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }

    /// Returns true if `path` starts with any prefix in the set
    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Parses a comma-separated list, e.g. `"/docs, /api"`; blank entries are ignored
impl FromStr for PathPrefixSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split(',').map(str::trim).filter(|p| !p.is_empty()))
    }
}

impl TryFrom<Vec<String>> for PathPrefixSet {
    type Error = ConfigError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PathPrefixSet> for Vec<String> {
    fn from(value: PathPrefixSet) -> Self {
        value.prefixes
    }
}

impl fmt::Display for PathPrefixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefixes.join(", "))
    }
}

fn validate_prefix(raw: &str) -> Result<String, ConfigError> {
    let prefix = raw.trim();

    if prefix.is_empty() {
        return Err(ConfigError::InvalidPathPrefix(
            "path prefix cannot be empty".to_string(),
        ));
    }

    if !prefix.starts_with('/') {
        return Err(ConfigError::InvalidPathPrefix(format!(
            "'{}' must start with '/'",
            prefix
        )));
    }

    if prefix
        .chars()
        .any(|c| c.is_whitespace() || c == '?' || c == '#')
    {
        return Err(ConfigError::InvalidPathPrefix(format!(
            "'{}' contains whitespace, '?' or '#'",
            prefix
        )));
    }

    let trimmed = prefix.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Derives the allow-list stored for a new source
///
/// An explicit allow-list wins. Otherwise a root URL with a non-root path
/// scopes the source to that path.
pub fn default_allowed_paths(root: &Url, explicit: PathPrefixSet) -> PathPrefixSet {
    if !explicit.is_empty() || root.path() == "/" {
        return explicit;
    }

    PathPrefixSet::new([root.path()]).unwrap_or(explicit)
}

/// Scope filter for one source
#[derive(Debug, Clone)]
pub struct CrawlScope {
    host: String,
    allowed: PathPrefixSet,
    denied: PathPrefixSet,
}

impl CrawlScope {
    /// Builds the scope from a normalized root URL and the source's prefix sets
    ///
    /// With an empty allow-list and a root path other than `/`, the root's
    /// own path acts as the allowed prefix.
    pub fn new(
        root: &Url,
        allowed: &PathPrefixSet,
        denied: &PathPrefixSet,
    ) -> Result<Self, crate::UrlError> {
        let host = host_key(root).ok_or(crate::UrlError::MissingHost)?;
        let allowed = default_allowed_paths(root, allowed.clone());

        Ok(Self {
            host,
            allowed,
            denied: denied.clone(),
        })
    }

    /// Returns true if a normalized URL belongs to this source's crawl
    pub fn contains(&self, url: &Url) -> bool {
        if host_key(url).as_deref() != Some(self.host.as_str()) {
            return false;
        }

        let path = url.path();
        if !self.allowed.is_empty() && !self.allowed.matches(path) {
            return false;
        }

        !self.denied.matches(path)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn allowed(&self) -> &PathPrefixSet {
        &self.allowed
    }
}
