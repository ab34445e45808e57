//! Breaking-change analysis
//!
//! Compares a "from" and "to" package set and reports backward-incompatible
//! schema changes as a categorized failure list. The "from" state is either
//! a previously stored descriptor file or a fresh compile of the working
//! tree as it existed at a git reference. The analyzer reports and never
//! mutates either package set.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, ServiceDescriptorProto,
};
use serde::{Deserialize, Serialize};

use crate::compiler::Compiler;
use crate::descriptor::DescriptorSet;
use crate::error::{Error, Result};
use crate::failure::{sort_failures, Failure};
use crate::gitwork;
use crate::graph::PackageSet;
use crate::workspace::WorkspaceResolver;

/// Where the "before" state of the schema set comes from
#[derive(Debug, Clone)]
pub enum BreakingSource {
    /// A previously stored descriptor file
    DescriptorPath(PathBuf),
    /// A git reference to clone and recompile; `None` means the default
    /// branch head
    GitRef(Option<String>),
}

impl BreakingSource {
    /// Build a source from caller options. Requesting both a descriptor path
    /// and a git reference is an input error.
    pub fn from_options(
        descriptor_path: Option<PathBuf>,
        git_ref: Option<String>,
    ) -> Result<Self> {
        match (descriptor_path, git_ref) {
            (Some(_), Some(_)) => Err(Error::ConflictingOptions(
                "only one of descriptor path and git reference may be set".to_string(),
            )),
            (Some(path), None) => Ok(Self::DescriptorPath(path)),
            (None, git_ref) => Ok(Self::GitRef(git_ref)),
        }
    }
}

/// Analyzer settings, loadable from the `[breaking]` config section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakingConfig {
    /// Packages excluded from analysis
    #[serde(default)]
    pub ignore_packages: Vec<String>,
}

/// Walks two package sets and reports incompatible changes
pub struct BreakingRunner;

impl BreakingRunner {
    pub fn new() -> Self {
        Self
    }

    /// Compare `from` against `to`, producing one failure per incompatible
    /// change, sorted for deterministic output. Findings are located at the
    /// offending element in the current (`to`) tree when it survives, else
    /// at a synthetic location in the `from` tree.
    pub fn run(
        &self,
        config: &BreakingConfig,
        from: &PackageSet,
        to: &PackageSet,
    ) -> Result<Vec<Failure>> {
        let from_index = TypeIndex::build(from.descriptor_set());
        let to_index = TypeIndex::build(to.descriptor_set());
        let mut failures = Vec::new();

        let from_packages: BTreeSet<&str> = from_index.package_files.keys().copied().collect();
        for package in from_packages {
            if config.ignore_packages.iter().any(|p| p == package) {
                continue;
            }
            if !to_index.package_files.contains_key(package) {
                failures.push(Failure::with_id(
                    from_index.package_files[package],
                    0,
                    0,
                    "PACKAGE_DELETED",
                    format!("package \"{}\" was deleted", display_package(package)),
                ));
                continue;
            }
            let (Some(from_package), Some(to_package)) = (from.get(package), to.get(package))
            else {
                continue;
            };
            for file in from_package.files() {
                if !to_package.files().any(|f| f == file) {
                    failures.push(Failure::with_id(
                        file,
                        0,
                        0,
                        "FILE_DELETED",
                        format!(
                            "file \"{}\" was deleted from package \"{}\"",
                            file,
                            display_package(package)
                        ),
                    ));
                }
            }
        }

        for (fq_name, entry) in &from_index.messages {
            if config.ignore_packages.iter().any(|p| p == entry.package) {
                continue;
            }
            match to_index.messages.get(fq_name) {
                None => {
                    if to_index.package_files.contains_key(entry.package) {
                        failures.push(Failure::with_id(
                            to_index.package_files[entry.package],
                            0,
                            0,
                            "MESSAGE_DELETED",
                            format!("message \"{}\" was deleted", fq_name),
                        ));
                    }
                    // whole-package deletion is already reported above
                }
                Some(to_entry) => {
                    self.check_message(fq_name, entry, to_entry, &mut failures);
                }
            }
        }

        for (fq_name, entry) in &from_index.enums {
            if config.ignore_packages.iter().any(|p| p == entry.package) {
                continue;
            }
            match to_index.enums.get(fq_name) {
                None => {
                    if to_index.package_files.contains_key(entry.package) {
                        failures.push(Failure::with_id(
                            to_index.package_files[entry.package],
                            0,
                            0,
                            "ENUM_DELETED",
                            format!("enum \"{}\" was deleted", fq_name),
                        ));
                    }
                }
                Some(to_entry) => {
                    self.check_enum(fq_name, entry, to_entry, &mut failures);
                }
            }
        }

        for (fq_name, entry) in &from_index.services {
            if config.ignore_packages.iter().any(|p| p == entry.package) {
                continue;
            }
            match to_index.services.get(fq_name) {
                None => {
                    if to_index.package_files.contains_key(entry.package) {
                        failures.push(Failure::with_id(
                            to_index.package_files[entry.package],
                            0,
                            0,
                            "SERVICE_DELETED",
                            format!("service \"{}\" was deleted", fq_name),
                        ));
                    }
                }
                Some(to_entry) => {
                    self.check_service(fq_name, entry, to_entry, &mut failures);
                }
            }
        }

        sort_failures(&mut failures);
        Ok(failures)
    }

    /// Obtain the "from" package set per the requested source. In git mode
    /// the target must be a relative path inside the working tree, since it
    /// is replayed inside the temporary clone; the clone directory is
    /// removed on every exit path, including compiler failure.
    pub fn resolve_from(
        &self,
        work_dir: &Path,
        target: &Path,
        source: &BreakingSource,
        resolver: &WorkspaceResolver,
        compiler: &Compiler,
    ) -> Result<PackageSet> {
        match source {
            BreakingSource::DescriptorPath(path) => {
                PackageSet::from_descriptor_set(DescriptorSet::read_file(path)?)
            }
            BreakingSource::GitRef(git_ref) => {
                if target.is_absolute()
                    || target
                        .components()
                        .any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(Error::TargetOutsideWorkspace(target.to_path_buf()));
                }
                let clone = gitwork::temporary_clone(work_dir, git_ref.as_deref())?;
                let unit = resolver.resolve(clone.path(), &clone.path().join(target))?;
                let result = compiler.compile(&unit)?;
                if !result.is_success() {
                    return Err(Error::BaselineCompile(result.failures.len()));
                }
                let descriptors = result.descriptor_set.unwrap_or_default();
                PackageSet::from_descriptor_set(descriptors)
            }
        }
    }

    /// End-to-end check: compile the current tree into the "to" set, obtain
    /// the "from" set per the source, and compare. Compilation diagnostics
    /// from the current tree are returned directly; analysis requires a
    /// clean build.
    pub fn check(
        &self,
        config: &BreakingConfig,
        work_dir: &Path,
        target: &Path,
        source: &BreakingSource,
        resolver: &WorkspaceResolver,
        compiler: &Compiler,
    ) -> Result<Vec<Failure>> {
        let unit = resolver.resolve(work_dir, target)?;
        let result = compiler.compile(&unit)?;
        if !result.is_success() {
            return Ok(result.failures);
        }
        let to = PackageSet::from_descriptor_set(result.descriptor_set.unwrap_or_default())?;
        let from = self.resolve_from(work_dir, target, source, resolver, compiler)?;
        self.run(config, &from, &to)
    }

    fn check_message(
        &self,
        fq_name: &str,
        from: &Entry<'_, DescriptorProto>,
        to: &Entry<'_, DescriptorProto>,
        failures: &mut Vec<Failure>,
    ) {
        let to_fields: HashMap<i32, &FieldDescriptorProto> =
            to.item.field.iter().map(|f| (f.number(), f)).collect();

        for from_field in &from.item.field {
            let number = from_field.number();
            let Some(to_field) = to_fields.get(&number) else {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "FIELD_DELETED",
                    format!("field {} of message \"{}\" was deleted", number, fq_name),
                ));
                continue;
            };
            if to_field.name() != from_field.name() {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "FIELD_NAME_CHANGED",
                    format!(
                        "field {} of message \"{}\" changed name from \"{}\" to \"{}\"",
                        number,
                        fq_name,
                        from_field.name(),
                        to_field.name()
                    ),
                ));
            }
            if to_field.r#type() != from_field.r#type()
                || to_field.type_name() != from_field.type_name()
            {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "FIELD_TYPE_CHANGED",
                    format!(
                        "field {} of message \"{}\" changed type from {} to {}",
                        number,
                        fq_name,
                        field_type_name(from_field),
                        field_type_name(to_field)
                    ),
                ));
            }
            if to_field.label() != from_field.label() {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "FIELD_LABEL_CHANGED",
                    format!(
                        "field {} of message \"{}\" changed label from {} to {}",
                        number,
                        fq_name,
                        from_field.label().as_str_name(),
                        to_field.label().as_str_name()
                    ),
                ));
            }
        }

        for from_range in &from.item.reserved_range {
            let covered = to.item.reserved_range.iter().any(|to_range| {
                to_range.start() <= from_range.start() && to_range.end() >= from_range.end()
            });
            if !covered {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "MESSAGE_RESERVED_RANGE_DELETED",
                    format!(
                        "reserved range [{}, {}) of message \"{}\" was deleted or shrunk",
                        from_range.start(),
                        from_range.end(),
                        fq_name
                    ),
                ));
            }
        }
    }

    fn check_enum(
        &self,
        fq_name: &str,
        from: &Entry<'_, EnumDescriptorProto>,
        to: &Entry<'_, EnumDescriptorProto>,
        failures: &mut Vec<Failure>,
    ) {
        let to_values: HashMap<&str, i32> =
            to.item.value.iter().map(|v| (v.name(), v.number())).collect();
        for from_value in &from.item.value {
            match to_values.get(from_value.name()) {
                None => failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "ENUM_VALUE_DELETED",
                    format!(
                        "value \"{}\" of enum \"{}\" was deleted",
                        from_value.name(),
                        fq_name
                    ),
                )),
                Some(&number) if number != from_value.number() => {
                    failures.push(Failure::with_id(
                        to.file,
                        0,
                        0,
                        "ENUM_VALUE_NUMBER_CHANGED",
                        format!(
                            "value \"{}\" of enum \"{}\" changed number from {} to {}",
                            from_value.name(),
                            fq_name,
                            from_value.number(),
                            number
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
    }

    fn check_service(
        &self,
        fq_name: &str,
        from: &Entry<'_, ServiceDescriptorProto>,
        to: &Entry<'_, ServiceDescriptorProto>,
        failures: &mut Vec<Failure>,
    ) {
        let to_methods: HashMap<&str, &prost_types::MethodDescriptorProto> =
            to.item.method.iter().map(|m| (m.name(), m)).collect();
        for from_method in &from.item.method {
            let Some(to_method) = to_methods.get(from_method.name()) else {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "METHOD_DELETED",
                    format!(
                        "method \"{}\" of service \"{}\" was deleted",
                        from_method.name(),
                        fq_name
                    ),
                ));
                continue;
            };
            if to_method.input_type() != from_method.input_type()
                || to_method.output_type() != from_method.output_type()
                || to_method.client_streaming() != from_method.client_streaming()
                || to_method.server_streaming() != from_method.server_streaming()
            {
                failures.push(Failure::with_id(
                    to.file,
                    0,
                    0,
                    "METHOD_SIGNATURE_CHANGED",
                    format!(
                        "method \"{}\" of service \"{}\" changed signature",
                        from_method.name(),
                        fq_name
                    ),
                ));
            }
        }
    }
}

impl Default for BreakingRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn display_package(package: &str) -> &str {
    if package.is_empty() {
        "(default)"
    } else {
        package
    }
}

fn field_type_name(field: &FieldDescriptorProto) -> String {
    if field.type_name().is_empty() {
        field.r#type().as_str_name().to_string()
    } else {
        field.type_name().to_string()
    }
}

/// One indexed entity with the file and package declaring it
struct Entry<'a, T> {
    item: &'a T,
    file: &'a str,
    package: &'a str,
}

/// Fully-qualified lookup tables over one descriptor set
struct TypeIndex<'a> {
    /// package -> first file declaring it (file-name order)
    package_files: HashMap<&'a str, &'a str>,
    messages: HashMap<String, Entry<'a, DescriptorProto>>,
    enums: HashMap<String, Entry<'a, EnumDescriptorProto>>,
    services: HashMap<String, Entry<'a, ServiceDescriptorProto>>,
}

impl<'a> TypeIndex<'a> {
    fn build(set: &'a DescriptorSet) -> Self {
        let mut index = Self {
            package_files: HashMap::new(),
            messages: HashMap::new(),
            enums: HashMap::new(),
            services: HashMap::new(),
        };
        for file in set.files() {
            let package = file.package();
            index.package_files.entry(package).or_insert(file.name());
            let prefix = if package.is_empty() {
                String::new()
            } else {
                format!(".{}", package)
            };
            for message in &file.message_type {
                index.add_message(&prefix, message, file.name(), package);
            }
            for enum_type in &file.enum_type {
                index.enums.insert(
                    format!("{}.{}", prefix, enum_type.name()),
                    Entry {
                        item: enum_type,
                        file: file.name(),
                        package,
                    },
                );
            }
            for service in &file.service {
                index.services.insert(
                    format!("{}.{}", prefix, service.name()),
                    Entry {
                        item: service,
                        file: file.name(),
                        package,
                    },
                );
            }
        }
        index
    }

    fn add_message(
        &mut self,
        prefix: &str,
        message: &'a DescriptorProto,
        file: &'a str,
        package: &'a str,
    ) {
        let fq_name = format!("{}.{}", prefix, message.name());
        for nested in &message.nested_type {
            self.add_message(&fq_name, nested, file, package);
        }
        for enum_type in &message.enum_type {
            self.enums.insert(
                format!("{}.{}", fq_name, enum_type.name()),
                Entry {
                    item: enum_type,
                    file,
                    package,
                },
            );
        }
        self.messages.insert(
            fq_name,
            Entry {
                item: message,
                file,
                package,
            },
        );
    }
}
