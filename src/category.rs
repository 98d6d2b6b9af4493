//! Sub-module category table
//!
//! Maps `sm_tag` values to the accumulator buckets used by the category
//! aggregator. The table is data, not code: the default set is embedded from
//! `categories-default.toml`, and a project can supply its own file without
//! recompiling.
//!
//! Lookup is an exact string match. A tag that merely contains a category
//! name (say `CFS_EXT`) does not belong to that category.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// One bucket of the breakdown
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryDefinition {
    /// Bucket name shown in reports (e.g. "CFS")
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// sm_tag values counted into this bucket
    pub tags: Vec<String>,
}

#[derive(Deserialize)]
struct CategoryFile {
    category: Vec<CategoryDefinition>,
}

/// Index of a bucket in a [`CategoryTable`]
pub type CategoryIndex = usize;

/// Static lookup table: sm_tag → bucket
#[derive(Debug, Clone)]
pub struct CategoryTable {
    categories: Vec<CategoryDefinition>,
    tag_to_index: HashMap<String, CategoryIndex>,
}

impl CategoryTable {
    /// Load the category table embedded in the binary
    pub fn default_table() -> Result<Self> {
        const DEFAULT_TOML: &str = include_str!("../categories-default.toml");
        Self::from_toml_str(DEFAULT_TOML).context("Failed to parse embedded categories-default.toml")
    }

    /// Load a category table from a TOML file
    ///
    /// # Example TOML
    /// ```toml
    /// [[category]]
    /// name = "CFS"
    /// description = "CORTXFS file system operations"
    /// tags = ["CFS"]
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read categories file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content).with_context(|| {
            format!("Failed to parse categories file: {}", path.as_ref().display())
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CategoryFile = toml::from_str(content)?;
        Self::from_definitions(file.category)
    }

    /// Build a table, rejecting empty tables and tags claimed twice
    pub fn from_definitions(categories: Vec<CategoryDefinition>) -> Result<Self> {
        if categories.is_empty() {
            anyhow::bail!("Category table must define at least one category");
        }

        let mut tag_to_index = HashMap::new();
        for (index, category) in categories.iter().enumerate() {
            for tag in &category.tags {
                if let Some(existing) = tag_to_index.insert(tag.clone(), index) {
                    anyhow::bail!(
                        "Duplicate sm_tag '{}' in categories '{}' and '{}'",
                        tag,
                        categories[existing].name,
                        category.name
                    );
                }
            }
        }

        Ok(Self {
            categories,
            tag_to_index,
        })
    }

    /// Bucket for an sm_tag, `None` if the tag is not categorised
    pub fn classify(&self, sm_tag: &str) -> Option<CategoryIndex> {
        self.tag_to_index.get(sm_tag).copied()
    }

    pub fn name(&self, index: CategoryIndex) -> &str {
        &self.categories[index].name
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
