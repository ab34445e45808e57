//! Compiler diagnostics as data
//!
//! A `Failure` is one diagnostic from the external compiler (or from the
//! breaking-change analyzer). Failures are ordinary values, not errors: a
//! compile can succeed as an operation and still carry a non-empty failure
//! list. They are totally ordered by (filename, line, column, message), with
//! the id as a last tiebreaker, so repeated runs and merged subprocess
//! outputs render identically.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default field order for colon-delimited rendering
pub const DEFAULT_ERROR_FORMAT: &str = "filename:line:column:message";

/// One compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub filename: String,
    pub line: u32,
    pub column: u32,
    /// Stable identifier for analyzer findings; empty for raw compiler output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub message: String,
}

impl Failure {
    /// Create a failure at a concrete source location
    pub fn new(
        filename: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line,
            column,
            id: String::new(),
            message: message.into(),
        }
    }

    /// Create a failure with a stable identifier
    pub fn with_id(
        filename: impl Into<String>,
        line: u32,
        column: u32,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line,
            column,
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a zero-location failure for output that did not match the
    /// expected diagnostic shape. Nothing is silently dropped.
    pub fn unparsed(message: impl Into<String>) -> Self {
        Self::new("", 0, 0, message)
    }

    /// Render as colon-delimited text with the given field order
    pub fn render(&self, fields: &[FailureField]) -> String {
        let mut parts = Vec::with_capacity(fields.len());
        for field in fields {
            match field {
                FailureField::Filename => parts.push(self.filename.clone()),
                FailureField::Line => parts.push(self.line.to_string()),
                FailureField::Column => parts.push(self.column.to_string()),
                FailureField::Id => parts.push(self.id.clone()),
                FailureField::Message => parts.push(self.message.clone()),
            }
        }
        parts.join(":")
    }

    /// Render as one JSON object on a single line
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&default_error_format()))
    }
}

impl Ord for Failure {
    fn cmp(&self, other: &Self) -> Ordering {
        self.filename
            .cmp(&other.filename)
            .then_with(|| self.line.cmp(&other.line))
            .then_with(|| self.column.cmp(&other.column))
            .then_with(|| self.message.cmp(&other.message))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Failure {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort failures into their canonical order and drop exact duplicates
pub fn sort_failures(failures: &mut Vec<Failure>) {
    failures.sort();
    failures.dedup();
}

/// One field of the colon-delimited rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureField {
    Filename,
    Line,
    Column,
    Id,
    Message,
}

/// Parse a colon-joined error-format spec such as
/// "filename:line:column:id:message" into a field order
pub fn parse_error_format(format: &str) -> Result<Vec<FailureField>> {
    let mut fields = Vec::new();
    for part in format.split(':') {
        let field = match part {
            "filename" => FailureField::Filename,
            "line" => FailureField::Line,
            "column" => FailureField::Column,
            "id" => FailureField::Id,
            "message" => FailureField::Message,
            other => return Err(Error::InvalidErrorFormat(other.to_string())),
        };
        fields.push(field);
    }
    Ok(fields)
}

fn default_error_format() -> Vec<FailureField> {
    // DEFAULT_ERROR_FORMAT only names known fields
    parse_error_format(DEFAULT_ERROR_FORMAT).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_order() {
        let mut failures = vec![
            Failure::new("b.proto", 1, 1, "zzz"),
            Failure::new("a.proto", 9, 9, "yyy"),
            Failure::new("a.proto", 2, 5, "xxx"),
            Failure::new("a.proto", 2, 1, "www"),
        ];
        sort_failures(&mut failures);
        let rendered: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "a.proto:2:1:www",
                "a.proto:2:5:xxx",
                "a.proto:9:9:yyy",
                "b.proto:1:1:zzz",
            ]
        );
    }

    #[test]
    fn test_dedup() {
        let mut failures = vec![
            Failure::new("a.proto", 1, 1, "dup"),
            Failure::new("a.proto", 1, 1, "dup"),
        ];
        sort_failures(&mut failures);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_same_location_different_ids_both_survive() {
        let mut failures = vec![
            Failure::with_id("a.proto", 1, 1, "FIELD_DELETED", "same"),
            Failure::with_id("a.proto", 1, 1, "ENUM_DELETED", "same"),
            Failure::with_id("a.proto", 1, 1, "ENUM_DELETED", "same"),
        ];
        sort_failures(&mut failures);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].id, "ENUM_DELETED");
        assert_eq!(failures[1].id, "FIELD_DELETED");
    }

    #[test]
    fn test_render_custom_format() {
        let failure = Failure::with_id("a.proto", 3, 7, "FIELD_DELETED", "boom");
        let fields = parse_error_format("filename:line:column:id:message").unwrap();
        assert_eq!(failure.render(&fields), "a.proto:3:7:FIELD_DELETED:boom");
    }

    #[test]
    fn test_invalid_format_field() {
        assert!(parse_error_format("filename:nope").is_err());
    }

    #[test]
    fn test_json_line() {
        let failure = Failure::new("a.proto", 1, 2, "msg");
        let line = failure.to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["filename"], "a.proto");
        assert_eq!(value["line"], 1);
        // empty id is omitted from the JSON stream
        assert!(value.get("id").is_none());
    }
}
