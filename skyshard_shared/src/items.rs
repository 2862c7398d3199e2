//! Item catalog: which character slot an item type occupies when equipped.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::schema::SLOT_NONE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    pub item_type_id: String,
    #[serde(default = "default_slot")]
    pub character_slot: String,
}

fn default_slot() -> String {
    SLOT_NONE.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    slots: HashMap<String, String>,
}

impl ItemCatalog {
    pub fn from_definitions<I>(defs: I) -> Self
    where
        I: IntoIterator<Item = ItemDefinition>,
    {
        Self {
            slots: defs
                .into_iter()
                .map(|d| (d.item_type_id, d.character_slot))
                .collect(),
        }
    }

    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        let defs: Vec<ItemDefinition> = serde_json::from_str(s).context("parse item catalog")?;
        Ok(Self::from_definitions(defs))
    }

    /// Loads the catalog file, logging and returning an empty catalog on failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let loaded = std::fs::read_to_string(path)
            .with_context(|| format!("read item catalog {}", path.display()))
            .and_then(|text| Self::from_json_str(&text));
        match loaded {
            Ok(catalog) => {
                info!(path = %path.display(), items = catalog.len(), "Item catalog loaded");
                catalog
            }
            Err(e) => {
                error!(error = ?e, "Failed to load item catalog, equips will use slot None");
                Self::default()
            }
        }
    }

    /// Slot for an item type, `None` for unknown types.
    pub fn character_slot(&self, item_type_id: &str) -> &str {
        self.slots
            .get(item_type_id)
            .map(String::as_str)
            .unwrap_or(SLOT_NONE)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
