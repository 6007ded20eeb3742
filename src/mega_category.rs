//! Coarse category groups ("Civilian Vehicles", "Structures & Sites", ..).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::Deserialize;

use crate::category::Category;
use crate::error::ResourceError;

pub const CUSTOM_MEGA_CATEGORY_LABEL: &str = "Custom";

/// A mega-category. Labels compare case-insensitively.
#[derive(Debug, Clone)]
pub struct MegaCategory {
    label: String,
}

impl MegaCategory {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.label.eq_ignore_ascii_case(CUSTOM_MEGA_CATEGORY_LABEL)
    }
}

impl PartialEq for MegaCategory {
    fn eq(&self, other: &Self) -> bool {
        self.label.to_lowercase() == other.label.to_lowercase()
    }
}

impl Eq for MegaCategory {}

impl Hash for MegaCategory {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.to_lowercase().hash(state);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MappingGroup {
    name: String,
    sub_categories: Vec<String>,
}

/// Category label to mega-category lookup.
#[derive(Debug, Clone)]
pub struct MegaCategoryMap {
    groups: Vec<MegaCategory>,
    by_label: HashMap<String, usize>,
    custom: usize,
}

impl MegaCategoryMap {
    /// Parses the mapping document: a JSON list of
    /// `{ "Name": .., "SubCategories": [..] }` groups.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, a group named `Custom`, or a label listed in
    /// more than one group.
    pub fn from_json(json: &str) -> Result<Self, ResourceError> {
        let items: Vec<MappingGroup> = serde_json::from_str(json)
            .map_err(|e| ResourceError::MegaCategoryMapping(e.to_string()))?;

        let mut groups = Vec::with_capacity(items.len() + 1);
        let mut by_label = HashMap::new();
        for item in items {
            let group = MegaCategory::new(&item.name);
            if group.is_custom() {
                return Err(ResourceError::MegaCategoryMapping(format!(
                    "group name {CUSTOM_MEGA_CATEGORY_LABEL:?} is reserved"
                )));
            }
            let index = groups.len();
            groups.push(group);
            for sub in item.sub_categories {
                if by_label.insert(sub.clone(), index).is_some() {
                    return Err(ResourceError::MegaCategoryMapping(format!(
                        "label {sub:?} is mapped more than once"
                    )));
                }
            }
        }

        let custom = groups.len();
        groups.push(MegaCategory::new(CUSTOM_MEGA_CATEGORY_LABEL));

        Ok(Self {
            groups,
            by_label,
            custom,
        })
    }

    /// Mega-category for a category label; unmapped labels are `Custom`.
    #[must_use]
    pub fn lookup(&self, label: &str) -> &MegaCategory {
        let index = self.by_label.get(label).copied().unwrap_or(self.custom);
        &self.groups[index]
    }

    #[must_use]
    pub fn of(&self, category: &Category) -> &MegaCategory {
        self.lookup(category.label())
    }

    /// All groups, `Custom` last.
    pub fn groups(&self) -> impl Iterator<Item = &MegaCategory> {
        self.groups.iter()
    }

    #[must_use]
    pub fn custom(&self) -> &MegaCategory {
        &self.groups[self.custom]
    }
}
