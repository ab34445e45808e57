//! Toolchain cache
//!
//! Version-keyed local cache of the external protoc binary and its bundled
//! well-known-type schemas. Entries live at `<cache-root>/protoc/<version>/`
//! with `<cache-root>/protoc/<version>.lock` as the cross-process lock file;
//! both paths are an external contract for operator tooling that pre-seeds
//! the cache. A ready marker is written only after download and extraction
//! fully succeed, so a failed attempt is always retryable and a retry never
//! sees a half-written entry.

use std::env;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sha2::{Digest, Sha256};

use crate::config::ProtocConfig;
use crate::error::{Error, Result};

/// Subdirectory of the cache root holding toolchain entries
pub const TOOLCHAIN_DIR: &str = "protoc";

/// Marker file written last inside a version directory
pub const READY_MARKER: &str = ".ready";

/// Environment override for the cache root
pub const ENV_CACHE_PATH: &str = "PROTOFORGE_CACHE_PATH";

/// Environment override for a pre-installed protoc binary
pub const ENV_PROTOC_BIN_PATH: &str = "PROTOFORGE_PROTOC_BIN_PATH";

/// Environment override for pre-installed well-known-type schemas
pub const ENV_PROTOC_INCLUDE_PATH: &str = "PROTOFORGE_PROTOC_INCLUDE_PATH";

/// A resolved, ready-to-invoke toolchain
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Path to the protoc binary
    pub protoc_path: PathBuf,
    /// Path to the bundled standard schema files
    pub include_path: PathBuf,
}

/// Manages the local toolchain cache
///
/// Explicit setters take precedence over the corresponding environment
/// overrides, which take precedence over platform defaults.
pub struct ToolchainCache {
    cache_path: Option<PathBuf>,
    protoc_bin_path: Option<PathBuf>,
    protoc_include_path: Option<PathBuf>,
    protoc_url: Option<String>,
}

impl ToolchainCache {
    /// Create a cache using default path resolution
    pub fn new() -> Self {
        Self {
            cache_path: None,
            protoc_bin_path: None,
            protoc_include_path: None,
            protoc_url: None,
        }
    }

    /// Use an explicit, caller-managed cache root
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Use a pre-installed protoc binary instead of downloading
    pub fn with_protoc_bin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.protoc_bin_path = Some(path.into());
        self
    }

    /// Use pre-installed well-known-type schemas instead of downloading
    pub fn with_protoc_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.protoc_include_path = Some(path.into());
        self
    }

    /// Override the archive URL, ignoring the configured version
    pub fn with_protoc_url(mut self, url: impl Into<String>) -> Self {
        self.protoc_url = Some(url.into());
        self
    }

    /// Ensure the toolchain for the configured version is present, fetching
    /// it on first use. Safe for concurrent callers in the same or different
    /// processes: the mutating path is serialized by an exclusive advisory
    /// file lock keyed by version, double-checked after acquisition.
    pub fn download(&self, config: &ProtocConfig) -> Result<Toolchain> {
        if let Some(toolchain) = self.overridden_toolchain()? {
            return Ok(toolchain);
        }

        // validate before touching the network or the cache layout
        semver::Version::parse(&config.version)?;

        let root = self.cache_root()?;
        let toolchain_dir = root.join(TOOLCHAIN_DIR);
        let version_dir = toolchain_dir.join(&config.version);
        let ready = version_dir.join(READY_MARKER);
        let toolchain = Toolchain {
            protoc_path: version_dir.join("bin").join(protoc_binary_name()),
            include_path: version_dir.join("include"),
        };

        // fast path, no lock needed for the check
        if ready.is_file() {
            return Ok(toolchain);
        }

        fs::create_dir_all(&toolchain_dir)?;
        let lock_path = toolchain_dir.join(format!("{}.lock", config.version));
        let _lock = CacheLock::acquire(&lock_path)?;

        // another process may have finished while we waited on the lock
        if ready.is_file() {
            return Ok(toolchain);
        }

        tracing::info!(version = %config.version, dir = %version_dir.display(), "downloading toolchain");
        if let Err(e) = self.populate(&config.version, &version_dir) {
            let _ = fs::remove_dir_all(&version_dir);
            return Err(e);
        }
        fs::write(&ready, "")?;

        Ok(toolchain)
    }

    /// Remove the entire default cache root.
    ///
    /// A no-op on a custom cache path (explicit or from the environment):
    /// custom caches are caller-managed.
    pub fn delete(&self) -> Result<()> {
        if self.cache_path.is_some() || env::var_os(ENV_CACHE_PATH).is_some() {
            return Ok(());
        }
        let root = self.cache_root()?;
        if root.exists() {
            tracing::info!(root = %root.display(), "deleting toolchain cache");
            fs::remove_dir_all(&root)?;
        }
        Ok(())
    }

    fn overridden_toolchain(&self) -> Result<Option<Toolchain>> {
        let bin = self
            .protoc_bin_path
            .clone()
            .or_else(|| env::var_os(ENV_PROTOC_BIN_PATH).map(PathBuf::from));
        let include = self
            .protoc_include_path
            .clone()
            .or_else(|| env::var_os(ENV_PROTOC_INCLUDE_PATH).map(PathBuf::from));
        match (bin, include) {
            (Some(protoc_path), Some(include_path)) => Ok(Some(Toolchain {
                protoc_path,
                include_path,
            })),
            (None, None) => Ok(None),
            _ => Err(Error::ConflictingOptions(
                "protoc binary path and include path must be set together".to_string(),
            )),
        }
    }

    fn cache_root(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache_path {
            return Ok(path.clone());
        }
        if let Some(path) = env::var_os(ENV_CACHE_PATH) {
            return Ok(PathBuf::from(path));
        }
        if let Some(dirs) = directories::ProjectDirs::from("dev", "protoforge", "protoforge") {
            return Ok(dirs.cache_dir().to_path_buf());
        }
        if let Some(base) = directories::BaseDirs::new() {
            return Ok(base.home_dir().join(".cache").join("protoforge"));
        }
        Err(Error::InvalidConfig {
            path: PathBuf::from("."),
            reason: "no cache directory could be determined".to_string(),
        })
    }

    fn populate(&self, version: &str, version_dir: &Path) -> Result<()> {
        let url = self
            .protoc_url
            .clone()
            .unwrap_or_else(|| default_protoc_url(version));

        let response = ureq::get(&url).call().map_err(|e| Error::Download {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let mut archive = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut archive)
            .map_err(|e| Error::Download {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let digest = format!("{:x}", Sha256::digest(&archive));
        tracing::debug!(url = %url, sha256 = %digest, bytes = archive.len(), "fetched archive");

        fs::create_dir_all(version_dir)?;
        let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
        zip.extract(version_dir)?;
        fs::write(version_dir.join("protoc.sha256"), &digest)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let bin = version_dir.join("bin").join(protoc_binary_name());
            if bin.is_file() {
                fs::set_permissions(&bin, fs::Permissions::from_mode(0o755))?;
            }
        }

        Ok(())
    }
}

impl Default for ToolchainCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive advisory file lock, released on drop on every exit path
struct CacheLock {
    file: File,
}

impl CacheLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn protoc_binary_name() -> &'static str {
    if cfg!(windows) {
        "protoc.exe"
    } else {
        "protoc"
    }
}

fn default_protoc_url(version: &str) -> String {
    let platform = if cfg!(target_os = "macos") {
        "osx-x86_64".to_string()
    } else if cfg!(windows) {
        "win64".to_string()
    } else {
        let arch = if cfg!(target_arch = "aarch64") {
            "aarch_64"
        } else {
            "x86_64"
        };
        format!("linux-{}", arch)
    };
    format!(
        "https://github.com/protocolbuffers/protobuf/releases/download/v{version}/protoc-{version}-{platform}.zip"
    )
}
