//! Named datasets a client may list and open

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::data::{BrickedVolume, Dataset, Pattern};
use crate::{Error, Result};

/// Source of the datasets served to clients
pub trait Catalog: Send + Sync {
    /// Names of all datasets that can be opened, sorted
    fn list(&self) -> Vec<String>;

    fn open(&self, name: &str) -> Result<Arc<dyn Dataset>>;
}

/// A generated volume described in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub dimensions: [usize; 3],
    pub brick_size: [usize; 3],
    pub pattern: Pattern,
}

/// Catalog of in-memory datasets.
///
/// Volumes declared by a [`VolumeSpec`] are built on first open and shared
/// afterwards; datasets may also be registered directly.
#[derive(Default)]
pub struct MemoryCatalog {
    specs: BTreeMap<String, VolumeSpec>,
    loaded: DashMap<String, Arc<dyn Dataset>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = VolumeSpec>) -> Self {
        let mut catalog = Self::new();
        for spec in specs {
            catalog.specs.insert(spec.name.clone(), spec);
        }
        catalog
    }

    pub fn insert(&self, name: &str, dataset: Arc<dyn Dataset>) {
        self.loaded.insert(name.to_string(), dataset);
    }
}

impl Catalog for MemoryCatalog {
    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.specs.keys().cloned().collect();
        for entry in self.loaded.iter() {
            if !self.specs.contains_key(entry.key()) {
                names.push(entry.key().clone());
            }
        }
        names.sort();
        names
    }

    fn open(&self, name: &str) -> Result<Arc<dyn Dataset>> {
        if let Some(dataset) = self.loaded.get(name) {
            return Ok(dataset.value().clone());
        }

        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| Error::Dataset(format!("no such dataset '{}'", name)))?;

        tracing::info!(
            name,
            dims = ?spec.dimensions,
            brick = ?spec.brick_size,
            "building volume"
        );
        let volume: Arc<dyn Dataset> =
            Arc::new(BrickedVolume::generate(spec.dimensions, spec.brick_size, spec.pattern)?);

        // Two opens racing to build the same volume keep whichever landed first.
        Ok(self.loaded.entry(name.to_string()).or_insert(volume).value().clone())
    }
}
