//! Per-directory configuration for the workspace
//!
//! Supports scattered, possibly nested `protoforge.toml` files. A directory's
//! effective configuration is that of its closest enclosing directory with a
//! configuration file; directories without one inherit the built-in default.
//!
//! ## Example config file (protoforge.toml):
//! ```toml
//! [protoc]
//! version = "3.17.3"
//! includes = ["../vendor/proto"]
//!
//! [[generate.plugins]]
//! name = "go"
//! output = "gen/go"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::breaking::BreakingConfig;
use crate::error::{Error, Result};

/// Name of the per-directory configuration file
pub const CONFIG_FILENAME: &str = "protoforge.toml";

/// Protoc version used when no configuration file sets one
pub const DEFAULT_PROTOC_VERSION: &str = "3.17.3";

/// Effective configuration for one directory scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DirConfig {
    /// Compiler settings
    #[serde(default)]
    pub protoc: ProtocConfig,

    /// Generation settings
    #[serde(default)]
    pub generate: GenerateConfig,

    /// Breaking-change analysis settings
    #[serde(default)]
    pub breaking: BreakingConfig,
}

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocConfig {
    /// Protoc version to fetch and invoke
    #[serde(default = "default_protoc_version")]
    pub version: String,

    /// Extra include paths, relative to the config file's directory
    #[serde(default)]
    pub includes: Vec<PathBuf>,
}

/// Generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerateConfig {
    /// Generation plugins to invoke
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// One generation plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin name, as in `--{name}_out`
    pub name: String,

    /// Output directory, relative to the config file's directory
    #[serde(default)]
    pub output: PathBuf,

    /// Comma-joined plugin flags passed before the output directory
    #[serde(default)]
    pub flags: String,
}

fn default_protoc_version() -> String {
    DEFAULT_PROTOC_VERSION.to_string()
}

impl Default for ProtocConfig {
    fn default() -> Self {
        Self {
            version: default_protoc_version(),
            includes: Vec::new(),
        }
    }
}

impl DirConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Nearest-ancestor configuration lookup, bounded by a workspace root
///
/// An ancestor-chain cache avoids re-walking parents for every directory the
/// resolver visits.
pub struct ConfigResolver {
    root: PathBuf,
    scope_cache: HashMap<PathBuf, PathBuf>,
    config_cache: HashMap<PathBuf, DirConfig>,
}

impl ConfigResolver {
    /// Create a resolver bounded by the given workspace root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scope_cache: HashMap::new(),
            config_cache: HashMap::new(),
        }
    }

    /// The scope directory governing `dir`: the closest enclosing directory
    /// (bounded by the root, inclusive) carrying a config file, or the root
    /// itself when no ancestor has one.
    pub fn scope(&mut self, dir: &Path) -> PathBuf {
        if let Some(scope) = self.scope_cache.get(dir) {
            return scope.clone();
        }

        let mut visited = Vec::new();
        let mut scope = self.root.clone();
        for ancestor in dir.ancestors() {
            if !ancestor.starts_with(&self.root) {
                break;
            }
            if let Some(cached) = self.scope_cache.get(ancestor) {
                scope = cached.clone();
                break;
            }
            visited.push(ancestor.to_path_buf());
            if ancestor.join(CONFIG_FILENAME).is_file() {
                scope = ancestor.to_path_buf();
                break;
            }
        }

        for dir in visited {
            self.scope_cache.insert(dir, scope.clone());
        }
        scope
    }

    /// The effective configuration for `dir`, with the scope directory it
    /// came from
    pub fn effective(&mut self, dir: &Path) -> Result<(PathBuf, DirConfig)> {
        let scope = self.scope(dir);
        if let Some(config) = self.config_cache.get(&scope) {
            return Ok((scope, config.clone()));
        }

        let config_path = scope.join(CONFIG_FILENAME);
        let config = if config_path.is_file() {
            DirConfig::load(&config_path)?
        } else {
            DirConfig::default()
        };
        self.config_cache.insert(scope.clone(), config.clone());
        Ok((scope, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DirConfig::default();
        assert_eq!(config.protoc.version, DEFAULT_PROTOC_VERSION);
        assert!(config.protoc.includes.is_empty());
        assert!(config.generate.plugins.is_empty());
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "[protoc]\nversion = \"3.11.0\"\n").unwrap();

        let config = DirConfig::load(&path).unwrap();
        assert_eq!(config.protoc.version, "3.11.0");
        assert!(config.generate.plugins.is_empty());
    }

    #[test]
    fn test_load_breaking_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "[breaking]\nignore_packages = [\"foo.internal\"]\n").unwrap();

        let config = DirConfig::load(&path).unwrap();
        assert_eq!(config.breaking.ignore_packages, vec!["foo.internal"]);
    }

    #[test]
    fn test_load_invalid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "[protoc\n").unwrap();

        match DirConfig::load(&path) {
            Err(Error::InvalidConfig { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected InvalidConfig, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_nearest_ancestor_scope() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            root.join("a").join(CONFIG_FILENAME),
            "[protoc]\nversion = \"3.12.0\"\n",
        )
        .unwrap();

        let mut resolver = ConfigResolver::new(&root);
        let (scope, config) = resolver.effective(&nested).unwrap();
        assert_eq!(scope, root.join("a"));
        assert_eq!(config.protoc.version, "3.12.0");

        // unconfigured sibling falls back to the root with defaults
        let other = root.join("c");
        fs::create_dir_all(&other).unwrap();
        let (scope, config) = resolver.effective(&other).unwrap();
        assert_eq!(scope, root);
        assert_eq!(config.protoc.version, DEFAULT_PROTOC_VERSION);
    }

    #[test]
    fn test_config_boundary_starts_new_scope() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let inner = root.join("vendor");
        fs::create_dir_all(&inner).unwrap();
        fs::write(root.join(CONFIG_FILENAME), "[protoc]\nversion = \"3.15.0\"\n").unwrap();
        fs::write(inner.join(CONFIG_FILENAME), "[protoc]\nversion = \"3.9.1\"\n").unwrap();

        let mut resolver = ConfigResolver::new(&root);
        let (outer_scope, outer) = resolver.effective(&root).unwrap();
        let (inner_scope, inner_cfg) = resolver.effective(&inner).unwrap();
        assert_eq!(outer_scope, root);
        assert_eq!(inner_scope, inner);
        assert_eq!(outer.protoc.version, "3.15.0");
        assert_eq!(inner_cfg.protoc.version, "3.9.1");
    }
}
