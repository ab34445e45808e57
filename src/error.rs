//! Error types for the protoforge core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for protoforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protoforge core errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("target not found: {0}")]
    NotFound(PathBuf),

    #[error("target is neither a regular file nor a directory: {0}")]
    InvalidTarget(PathBuf),

    #[error("directory walk timed out after {timeout:?} under {dir}")]
    WalkTimeout { dir: PathBuf, timeout: Duration },

    #[error("invalid configuration at {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("target must be a relative path inside the working tree: {0}")]
    TargetOutsideWorkspace(PathBuf),

    #[error("descriptor sets disagree on contents of file: {0}")]
    DescriptorConflict(String),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("invalid error format field: {0}")]
    InvalidErrorFormat(String),

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("baseline compilation failed with {0} failures")]
    BaselineCompile(usize),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("invalid protoc version: {0}")]
    Version(#[from] semver::Error),

    #[error("descriptor decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
