//! Checkpoint catalog: the fixed list of what a Safe-to-Load control inspects.
//!
//! The catalog is loaded once (builtin or from JSON) and validated; a bad
//! catalog is a startup error. Sessions copy checkpoints into their own items,
//! so replacing the catalog never changes sessions already created.

mod builtin;

use std::{collections::HashSet, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{HseqError, HseqResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub is_critical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub code: String,
    pub label: String,
    pub checkpoints: Vec<Checkpoint>,
}

/// A checkpoint together with the category it belongs to, in catalog order.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry<'a> {
    pub category: &'a Category,
    pub checkpoint: &'a Checkpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>) -> HseqResult<Self> {
        let catalog = Self { categories };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn builtin() -> Self {
        Self {
            categories: builtin::categories(),
        }
    }

    pub fn from_json_str(raw: &str) -> HseqResult<Self> {
        let categories: Vec<Category> = serde_json::from_str(raw)
            .map_err(|err| HseqError::Config(format!("invalid catalog JSON: {err}")))?;
        Self::new(categories)
    }

    pub fn from_json_file(path: &Path) -> HseqResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            HseqError::Config(format!("failed to read catalog {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn checkpoints(&self) -> impl Iterator<Item = CatalogEntry<'_>> {
        self.categories.iter().flat_map(|category| {
            category
                .checkpoints
                .iter()
                .map(move |checkpoint| CatalogEntry {
                    category,
                    checkpoint,
                })
        })
    }

    pub fn len(&self) -> usize {
        self.categories.iter().map(|c| c.checkpoints.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn codes(&self) -> Vec<&str> {
        self.checkpoints()
            .map(|entry| entry.checkpoint.code.as_str())
            .collect()
    }

    // Codes must be unique across the whole catalog: items are keyed by code
    // inside a session.
    fn validate(&self) -> HseqResult<()> {
        if self.categories.is_empty() {
            return Err(HseqError::Config("catalog has no categories".into()));
        }

        let mut category_codes = HashSet::new();
        let mut checkpoint_codes = HashSet::new();
        for category in &self.categories {
            if category.code.trim().is_empty() || category.label.trim().is_empty() {
                return Err(HseqError::Config(
                    "catalog category with blank code or label".into(),
                ));
            }
            if !category_codes.insert(category.code.as_str()) {
                return Err(HseqError::Config(format!(
                    "duplicate category code '{}'",
                    category.code
                )));
            }
            if category.checkpoints.is_empty() {
                return Err(HseqError::Config(format!(
                    "category '{}' has no checkpoints",
                    category.code
                )));
            }
            for checkpoint in &category.checkpoints {
                if checkpoint.code.trim().is_empty() || checkpoint.label.trim().is_empty() {
                    return Err(HseqError::Config(format!(
                        "category '{}' has a checkpoint with blank code or label",
                        category.code
                    )));
                }
                if !checkpoint_codes.insert(checkpoint.code.as_str()) {
                    return Err(HseqError::Config(format!(
                        "duplicate checkpoint code '{}'",
                        checkpoint.code
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
