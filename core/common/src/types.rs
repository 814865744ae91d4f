//! Common types used throughout ValueStocks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A slash-delimited path addressing a file or folder in remote storage.
///
/// The remote side compares paths case-insensitively; this type keeps the
/// caller's casing and only lowercases on request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a RemotePath.
    ///
    /// Uses '/' as separator. Leading and trailing slashes are ignored.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/folder name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a single child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Join this path with a relative, slash-separated path.
    pub fn join_relative(&self, relative: &str) -> crate::Result<Self> {
        let mut joined = self.clone();
        for part in relative.split('/').filter(|p| !p.is_empty()) {
            joined = joined.join(part)?;
        }
        Ok(joined)
    }

    /// Replace the last component, keeping the same parent.
    pub fn with_name(&self, name: &str) -> crate::Result<Self> {
        let parent = self.parent().ok_or_else(|| {
            crate::Error::InvalidInput("Cannot rename the root path".to_string())
        })?;
        parent.join(name)
    }

    /// Components of `self` below `base`, compared case-insensitively.
    ///
    /// Returns `None` when `self` is not inside `base`.
    pub fn relative_to(&self, base: &RemotePath) -> Option<&[String]> {
        if base.components.len() > self.components.len() {
            return None;
        }
        let within = base
            .components
            .iter()
            .zip(&self.components)
            .all(|(a, b)| a.to_lowercase() == b.to_lowercase());
        within.then(|| &self.components[base.components.len()..])
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Lowercased copy of this path.
    pub fn to_lowercase(&self) -> Self {
        Self {
            components: self.components.iter().map(|c| c.to_lowercase()).collect(),
        }
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }

    /// Path in the form the storage API expects (root is the empty string).
    pub fn to_api_path(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            self.to_string_path()
        }
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp.contains('/') || comp.contains('\\') {
        return Err(crate::Error::InvalidInput(
            "Path component cannot contain separators".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

impl std::str::FromStr for RemotePath {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}
