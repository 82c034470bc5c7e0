//! In-memory multi-resolution bricked volume
//!
//! The voxels of a [`BrickedVolume`] come from a source outside the server's
//! control (a generator or a caller-provided array). The hierarchy is built
//! once by repeated 2x averaging until a single brick covers a whole level,
//! and is read-only afterwards.

use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};

use crate::data::{BrickKey, BrickMetadata, Dataset, Voxel};
use crate::{Error, Result};

/// Procedural content used for volumes served from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    Sphere,
    Gradient,
    Checker,
}

impl Pattern {
    /// Evaluates the pattern at a point of the unit cube
    pub fn sample(self, p: [f32; 3]) -> f32 {
        match self {
            Pattern::Sphere => {
                let r = p.iter().map(|c| (c - 0.5) * (c - 0.5)).sum::<f32>().sqrt() / 0.5;
                (1.0 - r).max(0.0)
            }
            Pattern::Gradient => p[0].clamp(0.0, 1.0),
            Pattern::Checker => {
                let cells: i64 = p.iter().map(|c| (c * 8.0).floor() as i64).sum();
                (cells.rem_euclid(2)) as f32
            }
        }
    }
}

struct Level {
    data: Array3<f32>,
    layout: [u32; 3],
    metadata: Vec<BrickMetadata>,
}

pub struct BrickedVolume {
    levels: Vec<Level>,
    brick_size: [usize; 3],
}

impl BrickedVolume {
    pub fn generate(dims: [usize; 3], brick_size: [usize; 3], pattern: Pattern) -> Result<Self> {
        let scale = dims.map(|d| d.max(1) as f32);
        Self::from_fn(dims, brick_size, |x, y, z| {
            pattern.sample([
                (x as f32 + 0.5) / scale[0],
                (y as f32 + 0.5) / scale[1],
                (z as f32 + 0.5) / scale[2],
            ])
        })
    }

    pub fn from_fn<F>(dims: [usize; 3], brick_size: [usize; 3], f: F) -> Result<Self>
    where
        F: Fn(usize, usize, usize) -> f32,
    {
        if dims.contains(&0) {
            return Err(Error::Dataset(format!("empty volume dimensions {:?}", dims)));
        }
        let data = Array3::from_shape_fn((dims[0], dims[1], dims[2]), |(x, y, z)| f(x, y, z));
        Self::from_array(data, brick_size)
    }

    /// Builds the hierarchy over samples indexed `[x, y, z]`
    pub fn from_array(data: Array3<f32>, brick_size: [usize; 3]) -> Result<Self> {
        if brick_size.contains(&0) {
            return Err(Error::Dataset(format!("invalid brick size {:?}", brick_size)));
        }
        let (nx, ny, nz) = data.dim();
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(Error::Dataset("empty volume".to_string()));
        }

        let longest = nx.max(ny).max(nz) as f32;
        let scale = [nx as f32 / longest, ny as f32 / longest, nz as f32 / longest];

        let mut levels = Vec::new();
        let mut current = data;
        loop {
            let dims = current.dim();
            let dims = [dims.0, dims.1, dims.2];
            let layout = [0, 1, 2].map(|a| dims[a].div_ceil(brick_size[a]) as u32);
            let metadata = level_metadata(dims, layout, brick_size, scale);
            let coarsest = layout == [1, 1, 1];

            let next = if coarsest { None } else { Some(downsample(&current)) };
            levels.push(Level {
                data: current,
                layout,
                metadata,
            });

            match next {
                Some(next) => current = next,
                None => break,
            }
        }

        tracing::debug!(
            levels = levels.len(),
            bricks = levels.iter().map(|l| l.metadata.len()).sum::<usize>(),
            "built bricked volume"
        );

        Ok(Self { levels, brick_size })
    }

    fn level(&self, key: &BrickKey) -> Result<&Level> {
        if key.dataset != 0 {
            return Err(Error::Dataset(format!("no timestep {} in volume", key.dataset)));
        }
        let level = self
            .levels
            .get(key.lod as usize)
            .ok_or_else(|| Error::Dataset(format!("no LOD {} in volume", key.lod)))?;
        if key.index as usize >= level.metadata.len() {
            return Err(Error::Dataset(format!(
                "brick {} out of range at LOD {} ({} bricks)",
                key.index,
                key.lod,
                level.metadata.len()
            )));
        }
        Ok(level)
    }

    /// Brick samples with x varying fastest
    pub fn samples(&self, key: &BrickKey) -> Result<Vec<f32>> {
        let level = self.level(key)?;
        let [lx, ly, _] = level.layout;
        let i = key.index as usize;
        let coord = [i % lx as usize, (i / lx as usize) % ly as usize, i / (lx as usize * ly as usize)];

        let (nx, ny, nz) = level.data.dim();
        let dims = [nx, ny, nz];
        let lo = [0, 1, 2].map(|a| coord[a] * self.brick_size[a]);
        let hi = [0, 1, 2].map(|a| (lo[a] + self.brick_size[a]).min(dims[a]));

        let view = level.data.slice(s![lo[0]..hi[0], lo[1]..hi[1], lo[2]..hi[2]]);
        let (bx, by, bz) = view.dim();
        let mut out = Vec::with_capacity(bx * by * bz);
        for z in 0..bz {
            for y in 0..by {
                for x in 0..bx {
                    out.push(view[[x, y, z]]);
                }
            }
        }
        Ok(out)
    }

    fn typed<T: Voxel>(&self, key: &BrickKey) -> Result<Vec<T>> {
        Ok(self.samples(key)?.into_iter().map(T::from_sample).collect())
    }
}

fn level_metadata(
    dims: [usize; 3],
    layout: [u32; 3],
    brick_size: [usize; 3],
    scale: [f32; 3],
) -> Vec<BrickMetadata> {
    let mut out = Vec::with_capacity(layout.iter().map(|&n| n as usize).product());
    for z in 0..layout[2] as usize {
        for y in 0..layout[1] as usize {
            for x in 0..layout[0] as usize {
                let coord = [x, y, z];
                let mut center = [0.0f32; 3];
                let mut extents = [0.0f32; 3];
                let mut n_voxels = [0u32; 3];
                for a in 0..3 {
                    let lo = coord[a] * brick_size[a];
                    let hi = (lo + brick_size[a]).min(dims[a]);
                    let d = dims[a] as f32;
                    center[a] = ((lo + hi) as f32 / 2.0 / d - 0.5) * scale[a];
                    extents[a] = (hi - lo) as f32 / d * scale[a];
                    n_voxels[a] = (hi - lo) as u32;
                }
                out.push(BrickMetadata {
                    center,
                    extents,
                    n_voxels,
                });
            }
        }
    }
    out
}

fn downsample(src: &Array3<f32>) -> Array3<f32> {
    let (nx, ny, nz) = src.dim();
    let dims = (nx.div_ceil(2), ny.div_ceil(2), nz.div_ceil(2));
    Array3::from_shape_fn(dims, |(x, y, z)| {
        let block = src.slice(s![
            2 * x..(2 * x + 2).min(nx),
            2 * y..(2 * y + 2).min(ny),
            2 * z..(2 * z + 2).min(nz)
        ]);
        block.mean().unwrap_or(0.0)
    })
}

impl Dataset for BrickedVolume {
    fn lod_level_count(&self) -> u64 {
        self.levels.len() as u64
    }

    fn brick_layout(&self, lod: u64) -> [u32; 3] {
        self.levels.get(lod as usize).map(|l| l.layout).unwrap_or([0; 3])
    }

    fn domain_size(&self, lod: u64) -> [u64; 3] {
        self.levels
            .get(lod as usize)
            .map(|l| {
                let (x, y, z) = l.data.dim();
                [x as u64, y as u64, z as u64]
            })
            .unwrap_or([0; 3])
    }

    fn bricks(&self) -> Box<dyn Iterator<Item = (BrickKey, BrickMetadata)> + '_> {
        Box::new(self.levels.iter().enumerate().flat_map(|(lod, level)| {
            level
                .metadata
                .iter()
                .enumerate()
                .map(move |(index, md)| (BrickKey::new(0, lod as u64, index as u64), *md))
        }))
    }

    fn brick_metadata(&self, key: &BrickKey) -> Option<BrickMetadata> {
        self.level(key).ok().map(|level| level.metadata[key.index as usize])
    }

    fn brick_u8(&self, key: &BrickKey) -> Result<Vec<u8>> {
        self.typed(key)
    }

    fn brick_u16(&self, key: &BrickKey) -> Result<Vec<u16>> {
        self.typed(key)
    }

    fn brick_u32(&self, key: &BrickKey) -> Result<Vec<u32>> {
        self.typed(key)
    }
}
