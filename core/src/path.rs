use classtree_record_store::ROOT_PATH;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Separator between path segments, C++ namespace style.
pub const PATH_SEPARATOR: &str = "::";

/// Ordered sequence of name segments identifying a symbol's position in its
/// namespace hierarchy. Equality and ordering are segment-wise; the empty
/// sequence is the root and renders as `"/"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolPath {
    segments: Vec<String>,
}

impl SymbolPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parse a `::`-delimited path string. `"/"` and `""` parse to the root;
    /// empty segments are discarded.
    pub fn parse(path: &str) -> Self {
        if path == ROOT_PATH {
            return Self::root();
        }
        Self {
            segments: path
                .split(PATH_SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Final segment, or `None` at the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The sequence minus its last segment, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(ROOT_PATH);
        }
        f.write_str(&self.segments.join(PATH_SEPARATOR))
    }
}

impl FromStr for SymbolPath {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}
