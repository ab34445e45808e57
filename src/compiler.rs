//! Compilation orchestration
//!
//! Builds and executes one external-compiler invocation per directory group,
//! parses compiler diagnostics into a sorted failure list, and merges the
//! per-group descriptor outputs into one normalized descriptor set. Groups
//! are executed independently so a single run surfaces every error across
//! the whole tree; diagnostics and descriptors are merged commutatively and
//! sorted afterwards, so results do not depend on execution order.

use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tempfile::NamedTempFile;

use crate::cache::{Toolchain, ToolchainCache};
use crate::descriptor::DescriptorSet;
use crate::error::Result;
use crate::failure::{sort_failures, Failure};
use crate::workspace::{CompilationUnit, DirGroup};

/// Outcome of one orchestrated compile
///
/// A non-empty failure list means the operation failed as a whole, even
/// though individual groups may have compiled; the descriptor set is only
/// present on a clean run.
#[derive(Debug)]
pub struct CompileResult {
    pub descriptor_set: Option<DescriptorSet>,
    pub failures: Vec<Failure>,
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives the external compiler over a compilation unit
pub struct Compiler {
    cache: ToolchainCache,
    gen: bool,
    include_imports: bool,
    include_source_info: bool,
    diagnostic_line: Regex,
}

impl Compiler {
    /// Create a compiler resolving its toolchain through the given cache
    pub fn new(cache: ToolchainCache) -> Self {
        Self {
            cache,
            gen: false,
            include_imports: false,
            include_source_info: false,
            // file:line:col: message, with a file-only two-field fallback
            diagnostic_line: Regex::new(r"^(.+?\.proto):(?:(\d+):(\d+):)?\s*(.*)$")
                .expect("diagnostic line pattern is valid"),
        }
    }

    /// Also run the configured generation plugins
    pub fn with_gen(mut self) -> Self {
        self.gen = true;
        self
    }

    /// Include imported files in descriptor output
    pub fn include_imports(mut self, include: bool) -> Self {
        self.include_imports = include;
        self
    }

    /// Include source-location info in descriptor output
    pub fn include_source_info(mut self, include: bool) -> Self {
        self.include_source_info = include;
        self
    }

    /// Compile every directory group, collecting all diagnostics before
    /// deciding overall success. Per-group descriptor temp files are removed
    /// on success and failure alike.
    pub fn compile(&self, unit: &CompilationUnit) -> Result<CompileResult> {
        let mut failures = Vec::new();
        let mut sets = Vec::new();

        for group in unit.groups() {
            let toolchain = self.cache.download(&group.config.protoc)?;
            // dropped (and deleted) at end of iteration, success or failure
            let out = NamedTempFile::new()?;
            let args = self.group_args(&toolchain, group, Some(out.path()));

            tracing::debug!(
                dir = %group.dir.display(),
                protoc = %toolchain.protoc_path.display(),
                "compiling directory group"
            );
            let output = Command::new(&toolchain.protoc_path).args(&args).output()?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut group_failures = self.parse_diagnostics(&stderr);
            if group_failures.is_empty() && !output.status.success() {
                group_failures.push(Failure::unparsed(format!(
                    "compiler exited with {} and no diagnostics",
                    output.status
                )));
            }

            if group_failures.is_empty() {
                sets.push(DescriptorSet::read_file(out.path())?);
            } else if let Some(single) = unit.single_file() {
                // single-file targets report only that file's diagnostics;
                // zero-location failures are never dropped
                group_failures
                    .retain(|f| f.filename.is_empty() || group.scope.join(&f.filename) == single);
            }
            failures.extend(group_failures);
        }

        sort_failures(&mut failures);
        let descriptor_set = if failures.is_empty() {
            Some(DescriptorSet::merge_all(sets)?)
        } else {
            None
        };
        Ok(CompileResult {
            descriptor_set,
            failures,
        })
    }

    /// The exact command lines `compile` would run, without executing them.
    /// Descriptor output targets are omitted so the commands are
    /// reproducible outside this tool.
    pub fn plan_commands(&self, unit: &CompilationUnit) -> Result<Vec<String>> {
        let mut commands = Vec::new();
        for group in unit.groups() {
            let toolchain = self.cache.download(&group.config.protoc)?;
            let args = self.group_args(&toolchain, group, None);
            let mut command = toolchain.protoc_path.to_string_lossy().into_owned();
            for arg in args {
                command.push(' ');
                command.push_str(&arg.to_string_lossy());
            }
            commands.push(command);
        }
        Ok(commands)
    }

    fn group_args(
        &self,
        toolchain: &Toolchain,
        group: &DirGroup,
        descriptor_out: Option<&Path>,
    ) -> Vec<PathBuf> {
        let mut args: Vec<PathBuf> = Vec::new();
        args.push("-I".into());
        args.push(group.scope.clone());
        for include in &group.config.protoc.includes {
            args.push("-I".into());
            if include.is_absolute() {
                args.push(include.clone());
            } else {
                args.push(group.scope.join(include));
            }
        }
        args.push("-I".into());
        args.push(toolchain.include_path.clone());

        if self.gen {
            for plugin in &group.config.generate.plugins {
                let output = if plugin.output.is_absolute() {
                    plugin.output.clone()
                } else {
                    group.scope.join(&plugin.output)
                };
                let value = if plugin.flags.is_empty() {
                    output.to_string_lossy().into_owned()
                } else {
                    format!("{}:{}", plugin.flags, output.display())
                };
                args.push(format!("--{}_out={}", plugin.name, value).into());
            }
        }

        if let Some(out) = descriptor_out {
            if self.include_imports {
                args.push("--include_imports".into());
            }
            if self.include_source_info {
                args.push("--include_source_info".into());
            }
            args.push("-o".into());
            args.push(out.to_path_buf());
        }

        args.extend(group.files.iter().cloned());
        args
    }

    /// Parse compiler stderr line-by-line. Lines that do not match the
    /// expected shape become a single zero-location failure rather than
    /// being discarded.
    fn parse_diagnostics(&self, stderr: &str) -> Vec<Failure> {
        let mut failures = Vec::new();
        for line in stderr.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.diagnostic_line.captures(line) {
                Some(caps) => {
                    let filename = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let line_no = caps
                        .get(2)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(0);
                    let column = caps
                        .get(3)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(0);
                    let message = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
                    failures.push(Failure::new(filename, line_no, column, message));
                }
                None => failures.push(Failure::unparsed(line)),
            }
        }
        failures
    }
}
