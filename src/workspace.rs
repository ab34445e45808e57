//! Workspace resolution
//!
//! Walks a directory tree (bounded by a timeout), partitions the `.proto`
//! files found into directory-scoped groups, and attaches each group's
//! effective nearest-ancestor configuration. The result is a
//! `CompilationUnit`, built fresh per invocation and immutable once returned.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::config::{ConfigResolver, DirConfig};
use crate::error::{Error, Result};

/// Default bound on the directory walk
pub const DEFAULT_WALK_TIMEOUT: Duration = Duration::from_secs(3);

/// One directory's worth of source files, with its effective configuration
#[derive(Debug, Clone)]
pub struct DirGroup {
    /// Absolute directory holding the files
    pub dir: PathBuf,
    /// Sorted absolute file paths; every file belongs to exactly one group
    pub files: Vec<PathBuf>,
    /// Directory of the nearest ancestor config file (or the workspace root)
    pub scope: PathBuf,
    /// Effective configuration for this group
    pub config: DirConfig,
}

/// The directory-partitioned set of files, include scopes, and configuration
/// needed for one full compiler invocation sequence
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    root: PathBuf,
    /// Set when the target was a single regular file; diagnostics are later
    /// filtered to this file
    single_file: Option<PathBuf>,
    groups: BTreeMap<PathBuf, DirGroup>,
}

impl CompilationUnit {
    /// The workspace root this unit was resolved under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The single file to filter diagnostics to, if the target was a file
    pub fn single_file(&self) -> Option<&Path> {
        self.single_file.as_deref()
    }

    /// Directory groups in deterministic (path) order
    pub fn groups(&self) -> impl Iterator<Item = &DirGroup> {
        self.groups.values()
    }

    /// Number of directory groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total number of files across all groups
    pub fn file_count(&self) -> usize {
        self.groups.values().map(|g| g.files.len()).sum()
    }

    /// Sorted display paths of every file, relative to the workspace root
    /// where possible
    pub fn display_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .groups
            .values()
            .flat_map(|g| g.files.iter())
            .map(|f| {
                f.strip_prefix(&self.root)
                    .unwrap_or(f)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        files.sort();
        files
    }
}

/// Resolves a target path into a `CompilationUnit`
pub struct WorkspaceResolver {
    walk_timeout: Duration,
}

impl WorkspaceResolver {
    /// Create a resolver with the default walk timeout
    pub fn new() -> Self {
        Self {
            walk_timeout: DEFAULT_WALK_TIMEOUT,
        }
    }

    /// Override the walk timeout
    pub fn with_walk_timeout(mut self, timeout: Duration) -> Self {
        self.walk_timeout = timeout;
        self
    }

    /// Resolve `target` (file or directory) under `root_dir` into a unit.
    ///
    /// A file target still resolves over its containing directory so sibling
    /// imports are visible; the file is recorded for later diagnostic
    /// filtering. Symlinked directories are not followed. On timeout the
    /// whole resolution fails rather than returning a partial unit.
    pub fn resolve(&self, root_dir: &Path, target: &Path) -> Result<CompilationUnit> {
        let root = absolute(root_dir)?;
        let target = if target.is_absolute() {
            target.to_path_buf()
        } else {
            root.join(target)
        };

        let metadata = fs::metadata(&target).map_err(|_| Error::NotFound(target.clone()))?;
        let (walk_dir, single_file) = if metadata.is_dir() {
            (target.clone(), None)
        } else if metadata.is_file() {
            let parent = target
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.clone());
            (parent, Some(target.clone()))
        } else {
            return Err(Error::InvalidTarget(target));
        };

        tracing::debug!(root = %root.display(), walk_dir = %walk_dir.display(), "resolving workspace");

        let mut dir_files: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        let started = Instant::now();
        for entry in WalkDir::new(&walk_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        {
            if started.elapsed() >= self.walk_timeout {
                return Err(Error::WalkTimeout {
                    dir: walk_dir,
                    timeout: self.walk_timeout,
                });
            }
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if path.extension().map(|e| e != "proto").unwrap_or(true) {
                continue;
            }
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| walk_dir.clone());
            dir_files.entry(dir).or_default().push(path.to_path_buf());
        }

        let mut config_resolver = ConfigResolver::new(&root);
        let mut groups = BTreeMap::new();
        for (dir, mut files) in dir_files {
            files.sort();
            let (scope, config) = config_resolver.effective(&dir)?;
            tracing::debug!(
                dir = %dir.display(),
                scope = %scope.display(),
                files = files.len(),
                "resolved directory group"
            );
            groups.insert(
                dir.clone(),
                DirGroup {
                    dir,
                    files,
                    scope,
                    config,
                },
            );
        }

        Ok(CompilationUnit {
            root,
            single_file,
            groups,
        })
    }
}

impl Default for WorkspaceResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONFIG_FILENAME, DEFAULT_PROTOC_VERSION};
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "syntax = \"proto3\";\n").unwrap();
    }

    #[test]
    fn test_resolve_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("foo/success.proto"));
        touch(&root.join("foo/bar/dep.proto"));

        let unit = WorkspaceResolver::new().resolve(root, root).unwrap();
        assert_eq!(unit.group_count(), 2);
        assert_eq!(unit.file_count(), 2);
        assert_eq!(
            unit.display_files(),
            vec!["foo/bar/dep.proto", "foo/success.proto"]
        );
        assert!(unit.single_file().is_none());
    }

    #[test]
    fn test_resolve_single_file_covers_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("foo/a.proto"));
        touch(&root.join("foo/b.proto"));

        let unit = WorkspaceResolver::new()
            .resolve(root, &root.join("foo/a.proto"))
            .unwrap();
        // sibling is still part of the unit
        assert_eq!(unit.file_count(), 2);
        assert_eq!(unit.single_file(), Some(root.join("foo/a.proto").as_path()));
    }

    #[test]
    fn test_resolve_missing_target() {
        let dir = tempdir().unwrap();
        let result = WorkspaceResolver::new().resolve(dir.path(), Path::new("nope"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_walk_timeout() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.proto"));
        let result = WorkspaceResolver::new()
            .with_walk_timeout(Duration::ZERO)
            .resolve(dir.path(), dir.path());
        assert!(matches!(result, Err(Error::WalkTimeout { .. })));
    }

    #[test]
    fn test_group_configuration_boundaries() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join(CONFIG_FILENAME), "[protoc]\nversion = \"3.15.0\"\n").unwrap();
        touch(&root.join("api/v1/a.proto"));
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(
            root.join("vendor").join(CONFIG_FILENAME),
            "[protoc]\nversion = \"3.9.1\"\n",
        )
        .unwrap();
        touch(&root.join("vendor/ext.proto"));

        let unit = WorkspaceResolver::new().resolve(root, root).unwrap();
        let groups: Vec<&DirGroup> = unit.groups().collect();
        assert_eq!(groups.len(), 2);

        let api = groups.iter().find(|g| g.dir.ends_with("v1")).unwrap();
        assert_eq!(api.scope, root);
        assert_eq!(api.config.protoc.version, "3.15.0");

        let vendor = groups.iter().find(|g| g.dir.ends_with("vendor")).unwrap();
        assert_eq!(vendor.scope, root.join("vendor"));
        assert_eq!(vendor.config.protoc.version, "3.9.1");
    }

    #[test]
    fn test_sub_path_resolution_isolated_to_own_scope() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(
            root.join("vendor").join(CONFIG_FILENAME),
            "[protoc]\nversion = \"3.9.1\"\n",
        )
        .unwrap();
        touch(&root.join("api/a.proto"));
        touch(&root.join("vendor/ext.proto"));

        let unit = WorkspaceResolver::new()
            .resolve(root, &root.join("api"))
            .unwrap();
        assert_eq!(unit.file_count(), 1);
        let group = unit.groups().next().unwrap();
        assert_eq!(group.config.protoc.version, DEFAULT_PROTOC_VERSION);
        assert_eq!(group.scope, root);
    }

    #[test]
    fn test_dot_named_root_is_resolved() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(".workspace");
        touch(&root.join("api/a.proto"));
        // hidden children are still skipped, only the root is exempt
        touch(&root.join(".git/junk.proto"));

        let unit = WorkspaceResolver::new().resolve(&root, &root).unwrap();
        assert_eq!(unit.file_count(), 1);
        assert_eq!(unit.display_files(), vec!["api/a.proto"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_not_followed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("real/a.proto"));
        fs::create_dir_all(root.join("tree")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("tree/link")).unwrap();

        let unit = WorkspaceResolver::new()
            .resolve(root, &root.join("tree"))
            .unwrap();
        assert_eq!(unit.file_count(), 0);
    }
}
