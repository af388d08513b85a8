//! Addresses into the remote tree.

use std::fmt;

/// Slash-separated path into the remote tree.
///
/// Always held in canonical form: no leading or trailing slash and no empty
/// segments. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StorePath(String);

impl StorePath {
    /// Parse a path, dropping empty segments.
    pub fn new(path: &str) -> Self {
        let canonical: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self(canonical.join("/"))
    }

    /// The root of the tree.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Path of a descendant. `child` may itself contain slashes.
    #[must_use]
    pub fn child(&self, child: &str) -> Self {
        let child = Self::new(child);
        if self.0.is_empty() {
            child
        } else if child.0.is_empty() {
            self.clone()
        } else {
            Self(format!("{}/{}", self.0, child.0))
        }
    }

    /// Parent path. `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Last segment. `None` for the root.
    pub fn key(&self) -> Option<&str> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.rsplit('/').next().unwrap_or(&self.0))
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` equals `prefix` or lies below it (segment-wise).
    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for StorePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
