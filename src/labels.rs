//! Class label map parsing.
//!
//! The label file is the `item { id: .. name: '..' }` text format exported
//! with the model. Only the `id:` and `name:'..'` tokens matter; everything
//! else on a line is ignored.

use std::sync::LazyLock;

use regex::Regex;

use crate::category::CategoryId;
use crate::error::ResourceError;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"id:\s*([^\s\\]+)").expect("id pattern is valid"));

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"name:\s*'([^']+)'").expect("name pattern is valid"));

pub const BACKGROUND_LABEL: &str = "background";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    pub id: CategoryId,
    pub label: String,
}

/// Class index to `(id, label)` table. Entry 0 is always background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    entries: Vec<LabelEntry>,
}

impl LabelTable {
    /// Parses a label map document.
    ///
    /// Ids and names are collected independently; the k-th id pairs with the
    /// k-th name.
    ///
    /// # Errors
    ///
    /// `LabelCountMismatch` if the id and name counts differ, `NoLabels` if
    /// the document defines no classes.
    pub fn parse(text: &str) -> Result<Self, ResourceError> {
        let mut ids = Vec::new();
        let mut names = Vec::new();

        for line in text.lines() {
            if let Some(id) = ID_PATTERN
                .captures(line)
                .and_then(|c| c[1].parse::<CategoryId>().ok())
            {
                ids.push(id);
            }
            if let Some(c) = NAME_PATTERN.captures(line) {
                names.push(c[1].to_string());
            }
        }

        if ids.len() != names.len() {
            return Err(ResourceError::LabelCountMismatch {
                ids: ids.len(),
                names: names.len(),
            });
        }
        if ids.is_empty() {
            return Err(ResourceError::NoLabels);
        }

        let mut entries = Vec::with_capacity(ids.len() + 1);
        entries.push(LabelEntry {
            id: 0,
            label: BACKGROUND_LABEL.to_string(),
        });
        entries.extend(
            ids.into_iter()
                .zip(names)
                .map(|(id, label)| LabelEntry { id, label }),
        );
        Ok(Self { entries })
    }

    /// Entry for model class index `class`.
    #[must_use]
    pub fn get(&self, class: usize) -> Option<&LabelEntry> {
        self.entries.get(class)
    }

    /// Label for model class index `class`.
    #[must_use]
    pub fn label(&self, class: usize) -> Option<&str> {
        self.get(class).map(|e| e.label.as_str())
    }

    /// Number of classes including background.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelEntry> {
        self.entries.iter()
    }
}
