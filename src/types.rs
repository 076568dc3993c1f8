//! Shared record types produced by the parser and consumed by the aggregator.
//!
//! These are the shapes that end up in the `<collection>.json` and
//! `<collection>-categories.json` outputs, so their serialized form is part of
//! the public contract.

use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// A single front-matter value. Nested objects are never produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Scalar(String),
    Array(Vec<String>),
}

impl MetadataValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            MetadataValue::Scalar(s) => Some(s),
            MetadataValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            MetadataValue::Array(items) => Some(items),
            MetadataValue::Scalar(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Scalar(s.to_string())
    }
}

impl From<Vec<&str>> for MetadataValue {
    fn from(items: Vec<&str>) -> Self {
        MetadataValue::Array(items.into_iter().map(str::to_string).collect())
    }
}

/// Parsed front matter, keyed in source order.
///
/// A duplicate key keeps its first position and takes the last value.
pub type MetadataRecord = IndexMap<String, MetadataValue>;

/// One entry of a collection output.
///
/// Serializes as a flat object: `fileName`, then every metadata key in source
/// order, then `replacedImages` when image processing ran. A front-matter key
/// literally named `fileName` overrides the file's base name, and
/// `replacedImages` always overrides a front-matter key of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File name without extension.
    pub file_name: String,
    pub metadata: MetadataRecord,
    /// Number of image references replaced in this file. `None` when image
    /// processing was not run.
    pub replaced_images: Option<usize>,
}

/// Output key for the file base name.
pub const FILE_NAME_KEY: &str = "fileName";
/// Output key for the replaced-image count.
pub const REPLACED_IMAGES_KEY: &str = "replacedImages";

enum FieldRef<'a> {
    Name(&'a str),
    Meta(&'a MetadataValue),
    Count(usize),
}

impl Serialize for FieldRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldRef::Name(s) => serializer.serialize_str(s),
            FieldRef::Meta(v) => v.serialize(serializer),
            FieldRef::Count(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl FileRecord {
    /// The `category` field, only when it parsed as an array.
    pub fn category(&self) -> Option<&[String]> {
        self.metadata.get("category").and_then(MetadataValue::as_array)
    }

    fn fields(&self) -> IndexMap<&str, FieldRef<'_>> {
        let mut fields = IndexMap::with_capacity(self.metadata.len() + 2);
        fields.insert(FILE_NAME_KEY, FieldRef::Name(&self.file_name));
        for (key, value) in &self.metadata {
            fields.insert(key.as_str(), FieldRef::Meta(value));
        }
        if let Some(count) = self.replaced_images {
            fields.insert(REPLACED_IMAGES_KEY, FieldRef::Count(count));
        }
        fields
    }
}

impl Serialize for FileRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.fields();
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (key, value) in &fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One row of the category histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}
