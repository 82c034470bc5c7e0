//! Brick identifiers, metadata and the dataset handle

use crate::{Error, Result};

/// Identifies one brick within a dataset's resolution hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrickKey {
    pub dataset: u64,
    pub lod: u64,
    pub index: u64,
}

impl BrickKey {
    pub fn new(dataset: u64, lod: u64, index: u64) -> Self {
        Self { dataset, lod, index }
    }
}

/// Spatial descriptor of a brick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrickMetadata {
    pub center: [f32; 3],
    pub extents: [f32; 3],
    pub n_voxels: [u32; 3],
}

impl BrickMetadata {
    pub fn voxel_count(&self) -> usize {
        self.n_voxels.iter().map(|&n| n as usize).product()
    }

    /// Radius of the sphere enclosing the brick
    pub fn radius(&self) -> f32 {
        let [x, y, z] = self.extents;
        0.5 * (x * x + y * y + z * z).sqrt()
    }
}

/// Voxel payload type requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoxelType {
    U8 = 0,
    U16 = 1,
    U32 = 2,
}

impl VoxelType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for VoxelType {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(VoxelType::U8),
            1 => Ok(VoxelType::U16),
            2 => Ok(VoxelType::U32),
            other => Err(Error::TypeMismatch(other)),
        }
    }
}

/// Read access to a bricked multi-resolution dataset.
///
/// LOD 0 is the finest level. Bricks within a level are indexed
/// `x + y * lx + z * lx * ly` over the level's brick layout.
pub trait Dataset: Send + Sync {
    fn lod_level_count(&self) -> u64;

    /// Number of bricks along each axis at `lod`
    fn brick_layout(&self, lod: u64) -> [u32; 3];

    /// Voxel dimensions of the whole domain at `lod`
    fn domain_size(&self, lod: u64) -> [u64; 3];

    fn total_brick_count(&self) -> u64 {
        (0..self.lod_level_count())
            .map(|lod| self.brick_layout(lod).iter().map(|&n| n as u64).product::<u64>())
            .sum()
    }

    /// All bricks, level by level, in index order
    fn bricks(&self) -> Box<dyn Iterator<Item = (BrickKey, BrickMetadata)> + '_>;

    fn brick_metadata(&self, key: &BrickKey) -> Option<BrickMetadata>;

    /// Maps a `(x, y, z, lod)` brick coordinate to its key
    fn index_from_4d(&self, coord: [u32; 4], timestep: u64) -> BrickKey {
        let [lx, ly, _] = self.brick_layout(coord[3] as u64);
        let index = coord[0] as u64 + coord[1] as u64 * lx as u64 + coord[2] as u64 * lx as u64 * ly as u64;
        BrickKey::new(timestep, coord[3] as u64, index)
    }

    fn brick_u8(&self, key: &BrickKey) -> Result<Vec<u8>>;
    fn brick_u16(&self, key: &BrickKey) -> Result<Vec<u16>>;
    fn brick_u32(&self, key: &BrickKey) -> Result<Vec<u32>>;
}

/// A voxel scalar that can be fetched from a dataset and put on the wire
pub trait Voxel: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const TYPE: VoxelType;
    const WIDTH: usize;

    /// Quantizes a normalized `[0, 1]` sample
    fn from_sample(sample: f32) -> Self;

    fn fetch(dataset: &dyn Dataset, key: &BrickKey) -> Result<Vec<Self>>;

    fn put(self, buf: &mut Vec<u8>);

    /// Reads one value from exactly `WIDTH` little-endian bytes
    fn take(bytes: &[u8]) -> Self;
}

macro_rules! impl_voxel {
    ($ty:ty, $variant:ident, $fetch:ident) => {
        impl Voxel for $ty {
            const TYPE: VoxelType = VoxelType::$variant;
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn from_sample(sample: f32) -> Self {
                (sample.clamp(0.0, 1.0) as f64 * <$ty>::MAX as f64).round() as $ty
            }

            fn fetch(dataset: &dyn Dataset, key: &BrickKey) -> Result<Vec<Self>> {
                dataset.$fetch(key)
            }

            fn put(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            fn take(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_voxel!(u8, U8, brick_u8);
impl_voxel!(u16, U16, brick_u16);
impl_voxel!(u32, U32, brick_u32);
