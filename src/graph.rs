//! Package dependency graph
//!
//! Groups compiled file descriptors by declared package and derives directed
//! package-level edges from file-level imports. The graph is a read-only
//! view computed once at construction; nothing mutates a package set after
//! it is built, so it is safe to hand to multiple consumers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::descriptor::DescriptorSet;
use crate::error::{Error, Result};

/// A named schema namespace and the files declaring it
#[derive(Debug, Clone)]
pub struct Package {
    name: String,
    files: BTreeSet<String>,
}

impl Package {
    /// The package name; empty for the unnamed default package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted names of the files declaring this package
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Read-only mapping from package name to package, with derived dependency
/// and importer relations
pub struct PackageSet {
    packages: BTreeMap<String, Package>,
    graph: DiGraph<String, ()>,
    node_indices: HashMap<String, NodeIndex>,
    descriptors: DescriptorSet,
}

impl PackageSet {
    /// Merge the input descriptor sets (a same-name content conflict is a
    /// hard error) and build the package graph
    pub fn build(sets: Vec<DescriptorSet>) -> Result<Self> {
        Self::from_descriptor_set(DescriptorSet::merge_all(sets)?)
    }

    /// Build the package graph from one merged descriptor set
    pub fn from_descriptor_set(descriptors: DescriptorSet) -> Result<Self> {
        let mut packages: BTreeMap<String, Package> = BTreeMap::new();
        let mut file_packages: HashMap<String, String> = HashMap::new();
        for file in descriptors.files() {
            let package = file.package().to_string();
            file_packages.insert(file.name().to_string(), package.clone());
            packages
                .entry(package.clone())
                .or_insert_with(|| Package {
                    name: package,
                    files: BTreeSet::new(),
                })
                .files
                .insert(file.name().to_string());
        }

        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        for name in packages.keys() {
            let idx = graph.add_node(name.clone());
            node_indices.insert(name.clone(), idx);
        }

        for file in descriptors.files() {
            let from = &file_packages[file.name()];
            for dep in &file.dependency {
                let Some(to) = file_packages.get(dep) else {
                    // imports outside the set (e.g. bundled well-known types
                    // when imports were not included) cannot be resolved
                    tracing::debug!(file = file.name(), import = %dep, "unresolved import");
                    continue;
                };
                if to == from {
                    continue;
                }
                let a = node_indices[from];
                let b = node_indices[to];
                if graph.find_edge(a, b).is_none() {
                    graph.add_edge(a, b, ());
                }
            }
        }

        Ok(Self {
            packages,
            graph,
            node_indices,
            descriptors,
        })
    }

    /// Sorted package names, excluding the unnamed default package
    pub fn package_names(&self) -> Vec<&str> {
        self.packages
            .keys()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Look up one package by name
    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Sorted names of packages containing any file imported by this
    /// package's files; self-references excluded
    pub fn dependencies(&self, name: &str) -> Result<Vec<&str>> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Sorted names of packages with any file importing from this package;
    /// self-references excluded
    pub fn importers(&self, name: &str) -> Result<Vec<&str>> {
        self.neighbors(name, Direction::Incoming)
    }

    /// The merged descriptors this graph was derived from
    pub fn descriptor_set(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Number of packages, excluding the unnamed default package
    pub fn len(&self) -> usize {
        self.package_names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Result<Vec<&str>> {
        let idx = self
            .node_indices
            .get(name)
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))?;
        let mut names: Vec<&str> = self
            .graph
            .edges_directed(*idx, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.graph.node_weight(other).map(String::as_str)
            })
            .filter(|n| !n.is_empty())
            .collect();
        names.sort_unstable();
        Ok(names)
    }
}
