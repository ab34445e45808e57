//! Descriptor sets
//!
//! An ordered, deduplicated collection of compiled file descriptors, keyed by
//! file name. The binary layout is the external compiler's own
//! `FileDescriptorSet` schema and is reproduced exactly via prost; only the
//! JSON projection here is our own.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use prost::Message;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet, ServiceDescriptorProto,
};
use serde_json::json;

use crate::error::{Error, Result};

/// Ordered, deduplicated collection of compiled file descriptors
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    files: BTreeMap<String, FileDescriptorProto>,
}

impl DescriptorSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a raw `FileDescriptorSet`, applying the merge rule to
    /// any repeated file names
    pub fn from_proto(proto: FileDescriptorSet) -> Result<Self> {
        let mut set = Self::new();
        for file in proto.file {
            set.insert(file)?;
        }
        Ok(set)
    }

    /// Decode a serialized `FileDescriptorSet`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_proto(FileDescriptorSet::decode(bytes)?)
    }

    /// Read and decode a descriptor file from disk
    pub fn read_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }

    /// Insert one file descriptor. Inserting a file identical to an existing
    /// one with the same name is a no-op; same name with differing content is
    /// an error, since continuing would silently pick an arbitrary version of
    /// the schema.
    pub fn insert(&mut self, file: FileDescriptorProto) -> Result<()> {
        let name = file.name().to_string();
        match self.files.get(&name) {
            None => {
                self.files.insert(name, file);
                Ok(())
            }
            Some(existing) if *existing == file => Ok(()),
            Some(_) => Err(Error::DescriptorConflict(name)),
        }
    }

    /// Merge another set into this one (idempotent for identical content)
    pub fn merge(&mut self, other: DescriptorSet) -> Result<()> {
        for (_, file) in other.files {
            self.insert(file)?;
        }
        Ok(())
    }

    /// Merge a sequence of sets into one
    pub fn merge_all<I>(sets: I) -> Result<Self>
    where
        I: IntoIterator<Item = DescriptorSet>,
    {
        let mut merged = Self::new();
        for set in sets {
            merged.merge(set)?;
        }
        Ok(merged)
    }

    /// File descriptors in file-name order
    pub fn files(&self) -> impl Iterator<Item = &FileDescriptorProto> {
        self.files.values()
    }

    /// Look up one file descriptor by name
    pub fn get(&self, name: &str) -> Option<&FileDescriptorProto> {
        self.files.get(name)
    }

    /// Sorted file names
    pub fn file_names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The raw proto representation, files in name order
    pub fn to_proto(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.files.values().cloned().collect(),
        }
    }

    /// Serialize in the compiler's binary wire format
    pub fn encode(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// A human-readable JSON projection of the descriptor contents
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "files": self.files.values().map(file_to_json).collect::<Vec<_>>(),
        })
    }
}

fn file_to_json(file: &FileDescriptorProto) -> serde_json::Value {
    json!({
        "name": file.name(),
        "package": file.package(),
        "dependencies": file.dependency,
        "messages": file.message_type.iter().map(message_to_json).collect::<Vec<_>>(),
        "enums": file.enum_type.iter().map(enum_to_json).collect::<Vec<_>>(),
        "services": file.service.iter().map(service_to_json).collect::<Vec<_>>(),
    })
}

fn message_to_json(message: &DescriptorProto) -> serde_json::Value {
    json!({
        "name": message.name(),
        "fields": message.field.iter().map(field_to_json).collect::<Vec<_>>(),
        "nested_messages": message.nested_type.iter().map(message_to_json).collect::<Vec<_>>(),
        "enums": message.enum_type.iter().map(enum_to_json).collect::<Vec<_>>(),
    })
}

fn field_to_json(field: &FieldDescriptorProto) -> serde_json::Value {
    let mut value = json!({
        "name": field.name(),
        "number": field.number(),
        "label": field.label().as_str_name(),
        "type": field.r#type().as_str_name(),
    });
    if !field.type_name().is_empty() {
        value["type_name"] = json!(field.type_name());
    }
    value
}

fn enum_to_json(enum_type: &EnumDescriptorProto) -> serde_json::Value {
    json!({
        "name": enum_type.name(),
        "values": enum_type
            .value
            .iter()
            .map(|v| json!({ "name": v.name(), "number": v.number() }))
            .collect::<Vec<_>>(),
    })
}

fn service_to_json(service: &ServiceDescriptorProto) -> serde_json::Value {
    json!({
        "name": service.name(),
        "methods": service
            .method
            .iter()
            .map(|m| json!({
                "name": m.name(),
                "input_type": m.input_type(),
                "output_type": m.output_type(),
            }))
            .collect::<Vec<_>>(),
    })
}
