//! Model catalog classification.
//!
//! Instead of a hand-maintained allow list, an ordering table is synthesized
//! from a numeric version range. Catalog entries are admitted only when they
//! belong to a synthesized family, then bucketed into `main`, `exp` and
//! `others` with a priority callers can sort by.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

pub const MODEL_NAME_PREFIX: &str = "models/";
pub const MODEL_FAMILY: &str = "gemini";
pub const DEFAULT_MAX_MAJOR_VERSION: u32 = 3;
pub const DEFAULT_MIN_MAJOR_VERSION: u32 = 2;
/// Appended after the synthesized range regardless of its bounds.
pub const LEGACY_VERSION: &str = "1.5";
/// Priority of admitted models without an exact ordering entry.
pub const UNRANKED_PRIORITY: u32 = u32::MAX;

const VARIANTS: [(&str, Category); 4] = [
    ("flash", Category::Main),
    ("pro", Category::Main),
    ("flash-exp", Category::Exp),
    ("pro-exp", Category::Exp),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Main,
    Exp,
    Others,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranking {
    pub category: Category,
    pub priority: u32,
}

/// Catalog entry as returned by the models endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawModel {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawModel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// Admitted catalog entry with its assigned category and priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub priority_index: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Synthesized `model id -> ranking` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderingTable {
    rankings: HashMap<String, Ranking>,
    keys: Vec<String>,
}

impl OrderingTable {
    /// Builds the table for majors `max_major` down to `min_major`, two
    /// sub-versions each (`N.5`, `N.0`), followed by [`LEGACY_VERSION`].
    ///
    /// `main` and `exp` draw from independent counters.
    pub fn synthesize(max_major: u32, min_major: u32) -> Self {
        let versions = (min_major..=max_major)
            .rev()
            .flat_map(|major| [format!("{}.5", major), format!("{}.0", major)])
            .chain(std::iter::once(LEGACY_VERSION.to_string()));

        let mut table = Self::default();
        let mut next_main = 0;
        let mut next_exp = 0;
        for version in versions {
            for (variant, category) in VARIANTS {
                let counter = match category {
                    Category::Main => &mut next_main,
                    _ => &mut next_exp,
                };
                let key = format!("{}-{}-{}", MODEL_FAMILY, version, variant);
                if table.register(key, category, *counter) {
                    *counter += 1;
                }
            }
        }
        table
    }

    fn register(&mut self, key: String, category: Category, priority: u32) -> bool {
        if self.rankings.contains_key(&key) {
            return false;
        }
        self.rankings
            .insert(key.clone(), Ranking { category, priority });
        self.keys.push(key);
        true
    }

    /// Exact ranking of a model id.
    pub fn rank(&self, id: &str) -> Option<Ranking> {
        self.rankings.get(id).copied()
    }

    /// Whether `id` equals or extends a synthesized key.
    pub fn admits(&self, id: &str) -> bool {
        self.keys.iter().any(|key| id.starts_with(key.as_str()))
    }

    /// Synthesized keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Classifies raw catalog entries, dropping the ones not admitted.
    ///
    /// Does not sort: each bucket keeps arrival order.
    pub fn classify<I>(&self, models: I) -> ClassifiedCatalog
    where
        I: IntoIterator<Item = RawModel>,
    {
        let mut catalog = ClassifiedCatalog::default();
        for model in models {
            let id = model
                .name
                .strip_prefix(MODEL_NAME_PREFIX)
                .unwrap_or(&model.name)
                .to_string();
            if !self.admits(&id) {
                tracing::debug!(model = %model.name, "Dropping unrecognized model family");
                continue;
            }

            let ranking = self.rank(&id).unwrap_or(Ranking {
                category: Category::Others,
                priority: UNRANKED_PRIORITY,
            });
            let descriptor = ModelDescriptor {
                id,
                name: model.name,
                category: ranking.category,
                priority_index: ranking.priority,
                extra: model.extra,
            };
            match ranking.category {
                Category::Main => catalog.main.push(descriptor),
                Category::Exp => catalog.exp.push(descriptor),
                Category::Others => catalog.others.push(descriptor),
            }
        }
        catalog
    }
}

/// Admitted descriptors grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedCatalog {
    pub main: Vec<ModelDescriptor>,
    pub exp: Vec<ModelDescriptor>,
    pub others: Vec<ModelDescriptor>,
}

impl ClassifiedCatalog {
    /// Buckets concatenated as `main`, `exp`, `others`.
    pub fn ordered(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.main.iter().chain(&self.exp).chain(&self.others)
    }

    pub fn into_ordered(self) -> Vec<ModelDescriptor> {
        let mut ordered = self.main;
        ordered.extend(self.exp);
        ordered.extend(self.others);
        ordered
    }

    pub fn len(&self) -> usize {
        self.main.len() + self.exp.len() + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct CatalogEntries {
    ordered: Vec<ModelDescriptor>,
    ids: HashSet<String>,
}

/// Append-only cache of admitted descriptors, keyed by id.
///
/// Shared by concurrent catalog fetches; an id already present is never
/// replaced.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    entries: Mutex<CatalogEntries>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds descriptors with unseen ids; returns how many were added.
    pub fn extend<I>(&self, descriptors: I) -> usize
    where
        I: IntoIterator<Item = ModelDescriptor>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for descriptor in descriptors {
            if entries.ids.insert(descriptor.id.clone()) {
                entries.ordered.push(descriptor);
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.ordered.iter().find(|d| d.id == id).cloned()
    }

    /// All cached descriptors in insertion order.
    pub fn snapshot(&self) -> Vec<ModelDescriptor> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.ordered.clone()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
