//! Vendor manifest: the symbol table that maps package names and vendor module paths
//! to ids inside the vendor bundle.
//!
//! The on-disk format is
//!
//! ```json
//! { "name": "lib", "content": { "react": { "id": "lib.0" } } }
//! ```

use std::{io, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BuildError, BuildResult},
    output::write_atomic,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Global variable the vendor bundle assigns its registry to
    pub name: String,
    /// Symbol to module entry, in id order
    pub content: IndexMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: IndexMap::new(),
        }
    }

    /// Read a manifest from disk. A missing or malformed file is a configuration error
    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                BuildError::config(format!("manifest not found: {}", path.display()))
            }
            _ => BuildError::config(format!("cannot read manifest {}: {e}", path.display())),
        })?;
        serde_json::from_str(&text)
            .map_err(|e| BuildError::config(format!("invalid manifest {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> BuildResult<()> {
        write_atomic(path, &self.to_json())
    }

    /// Pretty-printed JSON with a trailing newline
    pub fn to_json(&self) -> String {
        let mut json = serde_json::to_string_pretty(self).unwrap_or_default();
        json.push('\n');
        json
    }

    /// Id recorded for `symbol`
    pub fn lookup(&self, symbol: &str) -> Option<&str> {
        self.content.get(symbol).map(|entry| entry.id.as_str())
    }

    pub fn insert(&mut self, symbol: impl Into<String>, id: impl Into<String>) {
        self.content
            .insert(symbol.into(), ManifestEntry { id: id.into() });
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_json_format_keeps_insertion_order() {
        let mut manifest = Manifest::new("lib");
        manifest.insert("react", "lib.0");
        manifest.insert("./node_modules/react/index.js", "lib.0");
        manifest.insert("./node_modules/react/lib/React.js", "lib.1");

        insta::assert_snapshot!(manifest.to_json(), @r#"
        {
          "name": "lib",
          "content": {
            "react": {
              "id": "lib.0"
            },
            "./node_modules/react/index.js": {
              "id": "lib.0"
            },
            "./node_modules/react/lib/React.js": {
              "id": "lib.1"
            }
          }
        }
        "#);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("manifest.json");
        let mut manifest = Manifest::new("lib");
        manifest.insert("jquery", "lib.0");

        manifest.save(&path).expect("save");
        let loaded = Manifest::load(&path).expect("load");

        assert_eq!(loaded, manifest);
        assert_eq!(loaded.lookup("jquery"), Some("lib.0"));
        assert_eq!(loaded.lookup("react"), None);
    }

    #[test]
    fn test_missing_manifest_is_config_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let err = Manifest::load(&temp_dir.path().join("nope.json")).expect_err("missing");
        assert!(err.is_config());
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_corrupt_manifest_is_config_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("manifest.json");
        fs::write(&path, "{ \"name\": \"lib\", ").expect("write");
        let err = Manifest::load(&path).expect_err("corrupt");
        assert!(err.is_config());
        assert!(err.to_string().contains("invalid manifest"));
    }
}
