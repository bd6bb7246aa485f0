use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use scraper::Selector;

/// Maximum nesting depth accepted for container selectors. Schemas are data
/// loaded at runtime, so the tree is bounded here rather than trusted.
const MAX_SCHEMA_DEPTH: usize = 8;

/// Kind of data a field selector extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Trimmed text content of the first match
    Text,
    /// An attribute of the first match (default `href`)
    Link,
    /// An attribute of the first match (default `src`)
    Image,
    /// Trimmed text of every match
    Table,
    /// Trimmed text of every match
    List,
    /// One sub-mapping per match, built from `children`
    Container,
}

/// A single declarative extraction rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSelector {
    /// Unique key for this field within its level
    pub name: String,

    /// CSS query evaluated against the current scope
    pub query: String,

    /// What to extract from the matched elements
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Attribute to read for link/image fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    /// Nested selectors, only meaningful for container fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldSelector>,
}

impl FieldSelector {
    /// Attribute read for link/image fields, falling back to the
    /// conventional attribute for the field type
    pub fn effective_attribute(&self) -> &str {
        if let Some(attr) = &self.attribute {
            return attr.as_str();
        }
        match self.field_type {
            FieldType::Image => "src",
            _ => "href",
        }
    }
}

/// Ordered list of field selectors describing what to pull out of a page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorSchema {
    pub fields: Vec<FieldSelector>,
}

impl SelectorSchema {
    pub fn new(fields: Vec<FieldSelector>) -> Self {
        Self { fields }
    }

    /// Parse a schema from YAML and validate it
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let schema: Self =
            serde_yaml::from_str(contents).context("Failed to parse selector schema")?;
        schema.validate()?;
        Ok(schema)
    }

    /// Validate the schema tree: unique non-empty names per level, parseable
    /// CSS queries, children only under containers, bounded depth
    pub fn validate(&self) -> Result<()> {
        validate_level(&self.fields, 0)
    }
}

fn validate_level(fields: &[FieldSelector], depth: usize) -> Result<()> {
    if depth > MAX_SCHEMA_DEPTH {
        anyhow::bail!("Selector schema exceeds maximum nesting depth of {}", MAX_SCHEMA_DEPTH);
    }

    let mut seen = HashSet::new();

    for field in fields {
        if field.name.trim().is_empty() {
            anyhow::bail!("Field selector with empty name");
        }

        if !seen.insert(field.name.as_str()) {
            anyhow::bail!("Duplicate field name '{}' at the same level", field.name);
        }

        if Selector::parse(&field.query).is_err() {
            anyhow::bail!("Invalid query '{}' for field '{}'", field.query, field.name);
        }

        match field.field_type {
            FieldType::Container => {
                if field.children.is_empty() {
                    anyhow::bail!("Container field '{}' has no child selectors", field.name);
                }
                validate_level(&field.children, depth + 1)?;
            }
            _ => {
                if !field.children.is_empty() {
                    anyhow::bail!(
                        "Field '{}' has child selectors but is not a container",
                        field.name
                    );
                }
            }
        }
    }

    Ok(())
}
