// Validated, normalized store paths

use crate::store::StoreError;
use std::fmt;

const MAX_PATH_BYTES: usize = 768;
const MAX_DEPTH: usize = 32;
const FORBIDDEN: [char; 5] = ['.', '#', '$', '[', ']'];

/// A `/`-separated location in the document tree
///
/// Leading and trailing slashes are ignored, so `"todolist/"` and `"todolist"`
/// name the same collection. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// Parse and validate a path string
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            Self::validate_segment(raw, segment)?;
            segments.push(segment.to_string());
        }

        let path = Self { segments };
        path.validate_size(raw)?;
        Ok(path)
    }

    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<StorePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append one segment (a record key, a date, ...)
    pub fn child(&self, key: &str) -> Result<StorePath, StoreError> {
        Self::validate_segment(key, key)?;
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        let path = Self { segments };
        path.validate_size(key)?;
        Ok(path)
    }

    /// True when `self` is `other` or lies above it
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len() && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True when one path is an ancestor of, equal to, or a descendant of the other
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Segments of `other` below `self`, if `self` contains it
    pub fn relative<'a>(&self, other: &'a StorePath) -> Option<&'a [String]> {
        if self.contains(other) {
            Some(&other.segments[self.segments.len()..])
        } else {
            None
        }
    }

    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }

    fn validate_segment(raw: &str, segment: &str) -> Result<(), StoreError> {
        if segment.is_empty() {
            return Err(StoreError::InvalidPath(format!("{}: empty segment", raw)));
        }
        if let Some(c) = segment.chars().find(|c| FORBIDDEN.contains(c) || c.is_control() || *c == '/') {
            return Err(StoreError::InvalidPath(format!("{}: forbidden character {:?}", raw, c)));
        }
        Ok(())
    }

    fn validate_size(&self, raw: &str) -> Result<(), StoreError> {
        if self.segments.len() > MAX_DEPTH {
            return Err(StoreError::InvalidPath(format!(
                "{}: too deep ({} segments, max {})",
                raw,
                self.segments.len(),
                MAX_DEPTH
            )));
        }
        let len = self.as_string().len();
        if len > MAX_PATH_BYTES {
            return Err(StoreError::InvalidPath(format!(
                "path too long: {} bytes (max {})",
                len, MAX_PATH_BYTES
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.as_string())
    }
}

impl std::str::FromStr for StorePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
