//! Shared execution context the commands run against

use std::sync::Arc;

use crate::data::{BrickKey, Catalog, Dataset, ViewTransform};
use crate::render::Renderer;
use crate::{Error, Result};

struct OpenDataset {
    name: String,
    handle: Arc<dyn Dataset>,
}

/// Dataset handle, renderer handle and batch size of one serving loop.
///
/// Each rank owns exactly one; it is only touched by that rank's loop.
pub struct CallPerformer {
    catalog: Arc<dyn Catalog>,
    renderer: Box<dyn Renderer>,
    open: Option<OpenDataset>,
    max_batch_size: usize,
    default_batch_size: usize,
}

impl CallPerformer {
    pub fn new(catalog: Arc<dyn Catalog>, renderer: Box<dyn Renderer>, max_batch_size: usize) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            catalog,
            renderer,
            open: None,
            max_batch_size,
            default_batch_size: max_batch_size,
        }
    }

    /// Opens `name`, replacing any dataset that was open before
    pub fn open_file(&mut self, name: &str) -> Result<()> {
        if let Some(previous) = self.open.take() {
            tracing::debug!(previous = %previous.name, "replacing open dataset");
        }
        let handle = self.catalog.open(name)?;
        tracing::info!(
            name,
            lods = handle.lod_level_count(),
            bricks = handle.total_brick_count(),
            "dataset opened"
        );
        self.open = Some(OpenDataset {
            name: name.to_string(),
            handle,
        });
        Ok(())
    }

    pub fn close_file(&mut self, name: &str) -> Result<()> {
        match &self.open {
            Some(open) if open.name == name => {
                self.open = None;
                tracing::info!(name, "dataset closed");
                Ok(())
            }
            _ => Err(Error::Dataset(format!("'{}' is not open", name))),
        }
    }

    pub fn list_files(&self) -> Vec<String> {
        self.catalog.list()
    }

    /// Applies a new view to the renderer
    pub fn rotate(&mut self, view: &ViewTransform) {
        self.renderer.set_rotation(view);
    }

    pub fn view(&self) -> &ViewTransform {
        self.renderer.view()
    }

    /// Keys of the bricks needed for the current view, front to back
    pub fn needed_bricks(&self) -> Result<Vec<BrickKey>> {
        let dataset = self.dataset()?;
        let coords = self.renderer.needed_bricks(&**dataset);

        let mut keys = Vec::with_capacity(coords.len());
        keys.extend(coords.into_iter().map(|coord| dataset.index_from_4d(coord, 0)));
        Ok(keys)
    }

    pub fn dataset(&self) -> Result<&Arc<dyn Dataset>> {
        self.open.as_ref().map(|open| &open.handle).ok_or(Error::NoDataset)
    }

    pub fn open_name(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.name.as_str())
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// A zero batch size is raised to one brick per batch
    pub fn set_max_batch_size(&mut self, size: u64) {
        if size == 0 {
            tracing::warn!("batch size 0 requested, using 1");
        }
        self.max_batch_size = usize::try_from(size).unwrap_or(usize::MAX).max(1);
    }

    /// Drops per-connection state
    pub fn reset(&mut self) {
        self.open = None;
        self.max_batch_size = self.default_batch_size;
        self.renderer.set_rotation(&ViewTransform::identity());
    }
}
