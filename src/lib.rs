//! Protoforge
//!
//! A workspace-aware build and analysis layer over the protobuf compiler.
//! Directory trees of `.proto` files are resolved into per-directory
//! compilation groups, compiled with a cached, version-pinned protoc
//! toolchain, and the resulting descriptors are merged into queryable
//! package graphs.
//!
//! ## Features
//!
//! - **Workspace Resolution**: Scattered `protoforge.toml` files scope
//!   nested directory trees, with single-file targets supported
//! - **Toolchain Cache**: Pinned protoc releases fetched once and shared
//!   across concurrent runs under an advisory file lock
//! - **Compilation Orchestration**: One compiler invocation per directory
//!   group, diagnostics parsed into a sorted, deduplicated failure list
//! - **Package Graphs**: Descriptor sets grouped by package with derived
//!   dependency and importer relations
//! - **Breaking-Change Analysis**: Field, enum, service, and package level
//!   compatibility checks against a stored descriptor file or a git ref
//!
//! ## Layout
//!
//! ```text
//! workspace/
//! ├── protoforge.toml
//! ├── foo/
//! │   ├── a.proto
//! │   └── b.proto
//! └── vendor/
//!     ├── protoforge.toml      # separate scope
//!     └── dep.proto
//! ```

pub mod breaking;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod failure;
pub mod gitwork;
pub mod graph;
pub mod workspace;

pub use breaking::{BreakingConfig, BreakingRunner, BreakingSource};
pub use cache::{Toolchain, ToolchainCache};
pub use compiler::{CompileResult, Compiler};
pub use config::{ConfigResolver, DirConfig, ProtocConfig};
pub use descriptor::DescriptorSet;
pub use error::{Error, Result};
pub use failure::{Failure, FailureField};
pub use graph::{Package, PackageSet};
pub use workspace::{CompilationUnit, DirGroup, WorkspaceResolver};
