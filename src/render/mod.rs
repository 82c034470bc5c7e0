//! View-dependent brick selection
//!
//! The GPU pipeline is outside this crate; what the server needs from a
//! renderer is the list of bricks that the current view would touch.
//! [`LodRenderer`] answers that question in software.

use serde::{Deserialize, Serialize};

use crate::data::{BrickKey, Dataset, ViewTransform};

/// Renderer handle used by the call performer
pub trait Renderer: Send {
    /// Replaces the current view
    fn set_rotation(&mut self, view: &ViewTransform);

    fn view(&self) -> &ViewTransform;

    /// `(x, y, z, lod)` coordinates of the bricks needed for the current view,
    /// front to back
    fn needed_bricks(&self, dataset: &dyn Dataset) -> Vec<[u32; 4]>;
}

/// Camera parameters for brick selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Viewport edge in pixels
    pub viewport: u32,
    /// Added to the chosen level; positive values pick coarser data
    pub lod_bias: i32,
    /// Eye distance from the volume center along +z
    pub camera_distance: f32,
    pub fov_degrees: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport: 512,
            lod_bias: 0,
            camera_distance: 2.0,
            fov_degrees: 45.0,
        }
    }
}

/// Level-of-detail brick selector.
///
/// Picks the finest level whose longest axis fits the viewport, culls bricks
/// against the view frustum and orders the rest front to back.
pub struct LodRenderer {
    config: RendererConfig,
    view: ViewTransform,
}

impl LodRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            view: ViewTransform::identity(),
        }
    }

    /// Level used for the current viewport
    pub fn select_lod(&self, dataset: &dyn Dataset) -> u64 {
        let levels = dataset.lod_level_count();
        if levels == 0 {
            return 0;
        }
        let viewport = self.config.viewport.max(1) as u64;
        let fitting = (0..levels)
            .find(|&lod| dataset.domain_size(lod).iter().copied().max().unwrap_or(0) <= viewport)
            .unwrap_or(levels - 1);

        (fitting as i64 + self.config.lod_bias as i64).clamp(0, levels as i64 - 1) as u64
    }
}

impl Renderer for LodRenderer {
    fn set_rotation(&mut self, view: &ViewTransform) {
        self.view = *view;
    }

    fn view(&self) -> &ViewTransform {
        &self.view
    }

    fn needed_bricks(&self, dataset: &dyn Dataset) -> Vec<[u32; 4]> {
        let lod = self.select_lod(dataset);
        let [lx, ly, lz] = dataset.brick_layout(lod);
        let half_fov = (self.config.fov_degrees.to_radians() / 2.0).tan();

        let mut visible = Vec::new();
        for z in 0..lz {
            for y in 0..ly {
                for x in 0..lx {
                    let coord = [x, y, z, lod as u32];
                    let key: BrickKey = dataset.index_from_4d(coord, 0);
                    let Some(md) = dataset.brick_metadata(&key) else {
                        continue;
                    };

                    let p = self.view.transform_point(md.center);
                    let depth = self.config.camera_distance - p[2];
                    let r = md.radius();
                    if depth + r <= 0.0 {
                        continue;
                    }
                    let reach = depth.max(0.0) * half_fov + r;
                    if p[0].abs() > reach || p[1].abs() > reach {
                        continue;
                    }
                    visible.push((depth, key.index, coord));
                }
            }
        }

        visible.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        tracing::trace!(lod, count = visible.len(), "needed bricks");
        visible.into_iter().map(|(_, _, coord)| coord).collect()
    }
}
