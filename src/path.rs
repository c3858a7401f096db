//! Scoped variable paths.
//!
//! A `VarPath` is a list of name segments, e.g. `["sub", "comp1", "y"]`. Scopes grow by
//! pushing segments and names are only joined with `.` when they are looked up, so the
//! number of segments tells whether a reference inside a scope points at a boundary
//! variable (one segment) or at a variable of a child node (two segments).

use std::fmt;

use itertools::Itertools;

/// A fully or partially qualified variable or scope name, stored as segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarPath {
    segments: Vec<String>,
}

impl VarPath {
    /// The empty path, i.e. the root scope.
    pub fn root() -> Self {
        Self::default()
    }

    /// Splits a dotted name into segments. Empty segments are dropped.
    pub fn parse(name: &str) -> Self {
        Self {
            segments: name
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Returns a new path with all segments of `other` appended.
    pub fn join(&self, other: &VarPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Qualifies a dotted local name with this path.
    pub fn qualify(&self, local: &str) -> Self {
        self.join(&VarPath::parse(local))
    }

    /// The path without its last segment, `None` for the root.
    pub fn parent(&self) -> Option<VarPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// The last segment, `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The first segment, `None` for the root.
    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// The path without its first segment.
    pub fn tail(&self) -> VarPath {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Joins the segments with `.`.
    pub fn dotted(&self) -> String {
        self.segments.iter().join(".")
    }
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

impl From<&str> for VarPath {
    fn from(name: &str) -> Self {
        VarPath::parse(name)
    }
}
