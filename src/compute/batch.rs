//! Brick catalog serialization and batched brick streaming
//!
//! A rotation reply is a sequence of batches, each laid out as
//!
//! ```text
//! u8 tag (Rotate) | u8 more | u64 n | u64[n] lods | u64[n] idxs | u64[n] voxel counts | voxels
//! ```
//!
//! with the voxels of every brick concatenated in order. `more == 0` marks the
//! last batch; an empty brick list still sends one such batch. A batch holds at
//! most the configured batch size of bricks and is dropped once written.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::data::{BrickKey, Dataset, Voxel, VoxelType};
use crate::net::codec::{self, WirePut};
use crate::net::CommandCode;
use crate::{Error, Result};

/// What a send loop put on the wire
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub bricks: usize,
    pub largest_batch: usize,
    pub bytes: usize,
}

/// Appends the static brick catalog of `dataset`, in brick iteration order
pub fn encode_catalog(dataset: &dyn Dataset, buf: &mut Vec<u8>) {
    let lod_count = dataset.lod_level_count();
    buf.put_size(lod_count);
    for lod in 0..lod_count {
        buf.put_u32s(&dataset.brick_layout(lod));
    }

    let brick_count = dataset.total_brick_count();
    buf.put_size(brick_count);

    let n = brick_count as usize;
    let mut lods = Vec::with_capacity(n);
    let mut idxs = Vec::with_capacity(n);
    let mut centers = Vec::with_capacity(n * 3);
    let mut extents = Vec::with_capacity(n * 3);
    let mut n_voxels = Vec::with_capacity(n * 3);
    for (key, md) in dataset.bricks() {
        lods.push(key.lod);
        idxs.push(key.index);
        centers.extend_from_slice(&md.center);
        extents.extend_from_slice(&md.extents);
        n_voxels.extend_from_slice(&md.n_voxels);
    }
    debug_assert_eq!(lods.len(), n);

    buf.put_sizes(&lods);
    buf.put_sizes(&idxs);
    buf.put_f32s(&centers);
    buf.put_f32s(&extents);
    buf.put_u32s(&n_voxels);
}

/// Catalog of a dataset that failed to open: no levels, no bricks
pub fn encode_empty_catalog(buf: &mut Vec<u8>) {
    buf.put_size(0);
    buf.put_size(0);
}

fn fetch<T: Voxel>(dataset: Option<&dyn Dataset>, key: &BrickKey) -> Result<Vec<T>> {
    match dataset {
        Some(dataset) => T::fetch(dataset, key),
        None => Err(Error::NoDataset),
    }
}

/// Sends a single brick as `u64` voxel count followed by the voxels.
///
/// A brick that cannot be read is sent with zero voxels and the read error is
/// returned afterwards.
pub async fn send_brick<W>(
    out: &mut W,
    dataset: Option<&dyn Dataset>,
    key: &BrickKey,
    voxel_type: VoxelType,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match voxel_type {
        VoxelType::U8 => send_brick_typed::<u8, W>(out, dataset, key).await,
        VoxelType::U16 => send_brick_typed::<u16, W>(out, dataset, key).await,
        VoxelType::U32 => send_brick_typed::<u32, W>(out, dataset, key).await,
    }
}

async fn send_brick_typed<T, W>(out: &mut W, dataset: Option<&dyn Dataset>, key: &BrickKey) -> Result<()>
where
    T: Voxel,
    W: AsyncWrite + Unpin + ?Sized,
{
    let (voxels, failure) = match fetch::<T>(dataset, key) {
        Ok(voxels) => (voxels, None),
        Err(e) => (Vec::new(), Some(e)),
    };

    let mut buf = Vec::with_capacity(1 + 8 + voxels.len() * T::WIDTH);
    buf.put_u8(CommandCode::Brick as u8);
    buf.put_size(voxels.len() as u64);
    for v in voxels {
        v.put(&mut buf);
    }
    codec::write_frame(out, &buf).await?;
    out.flush().await?;

    failure.map_or(Ok(()), Err)
}

/// Streams `keys` in order as batches of at most `max_batch` bricks
pub async fn send_batches<W>(
    out: &mut W,
    dataset: Option<&dyn Dataset>,
    keys: &[BrickKey],
    voxel_type: VoxelType,
    max_batch: usize,
) -> Result<BatchStats>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match voxel_type {
        VoxelType::U8 => send_loop::<u8, W>(out, dataset, keys, max_batch).await,
        VoxelType::U16 => send_loop::<u16, W>(out, dataset, keys, max_batch).await,
        VoxelType::U32 => send_loop::<u32, W>(out, dataset, keys, max_batch).await,
    }
}

async fn send_loop<T, W>(
    out: &mut W,
    dataset: Option<&dyn Dataset>,
    keys: &[BrickKey],
    max_batch: usize,
) -> Result<BatchStats>
where
    T: Voxel,
    W: AsyncWrite + Unpin + ?Sized,
{
    let max_batch = max_batch.max(1);
    let mut stats = BatchStats::default();

    if keys.is_empty() {
        let buf = encode_batch::<T>(dataset, &[], false);
        codec::write_frame(out, &buf).await?;
        stats.batches = 1;
        stats.bytes = buf.len();
    } else {
        let last = (keys.len() - 1) / max_batch;
        for (i, chunk) in keys.chunks(max_batch).enumerate() {
            let buf = encode_batch::<T>(dataset, chunk, i < last);
            codec::write_frame(out, &buf).await?;

            stats.batches += 1;
            stats.bricks += chunk.len();
            stats.largest_batch = stats.largest_batch.max(chunk.len());
            stats.bytes += buf.len();
        }
    }

    out.flush().await?;
    Ok(stats)
}

fn encode_batch<T: Voxel>(dataset: Option<&dyn Dataset>, chunk: &[BrickKey], more: bool) -> Vec<u8> {
    let payloads: Vec<Vec<T>> = chunk
        .iter()
        .map(|key| {
            fetch::<T>(dataset, key).unwrap_or_else(|e| {
                tracing::warn!(?key, error = %e, "sending empty brick");
                Vec::new()
            })
        })
        .collect();

    let voxels: usize = payloads.iter().map(Vec::len).sum();
    let mut buf = Vec::with_capacity(2 + 8 + chunk.len() * 24 + voxels * T::WIDTH);
    buf.put_u8(CommandCode::Rotate as u8);
    buf.put_u8(more as u8);
    buf.put_size(chunk.len() as u64);
    for key in chunk {
        buf.put_size(key.lod);
    }
    for key in chunk {
        buf.put_size(key.index);
    }
    for payload in &payloads {
        buf.put_size(payload.len() as u64);
    }
    for payload in payloads {
        for v in payload {
            v.put(&mut buf);
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BrickedVolume, Pattern};
    use crate::net::client::{read_batch, read_catalog};

    fn volume() -> BrickedVolume {
        BrickedVolume::generate([48, 32, 16], [16, 16, 16], Pattern::Gradient).unwrap()
    }

    fn lod0_keys(volume: &BrickedVolume) -> Vec<BrickKey> {
        volume.bricks().map(|(k, _)| k).filter(|k| k.lod == 0).collect()
    }

    #[tokio::test]
    async fn catalog_counts_every_brick() {
        let volume = volume();
        let mut buf = Vec::new();
        encode_catalog(&volume, &mut buf);

        let catalog = read_catalog(&mut buf.as_slice()).await.unwrap();
        let expected: u64 = catalog
            .layouts
            .iter()
            .map(|l| l.iter().map(|&n| n as u64).product::<u64>())
            .sum();
        assert_eq!(catalog.layouts.len() as u64, volume.lod_level_count());
        assert_eq!(catalog.brick_count(), expected);
        assert_eq!(catalog.lods.len() as u64, expected);
        assert_eq!(catalog.idxs.len() as u64, expected);
        assert_eq!(catalog.centers.len() as u64, expected * 3);
        assert_eq!(&catalog.n_voxels[..3], &[16, 16, 16]);
    }

    #[tokio::test]
    async fn batches_respect_the_limit() {
        let volume = volume();
        let keys = lod0_keys(&volume);
        assert_eq!(keys.len(), 6);

        let mut out = Vec::new();
        let stats = send_batches(&mut out, Some(&volume), &keys, VoxelType::U16, 4).await.unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.largest_batch, 4);
        assert_eq!(stats.bytes, out.len());

        let mut r = out.as_slice();
        let first = read_batch::<u16, _>(&mut r).await.unwrap();
        let second = read_batch::<u16, _>(&mut r).await.unwrap();
        assert!(r.is_empty());

        assert!(first.more && !second.more);
        assert_eq!(first.bricks.len(), 4);
        assert_eq!(second.bricks.len(), 2);
        assert_eq!(second.bricks[1].0, keys[5]);
        assert_eq!(second.bricks[1].1.len(), 16 * 16 * 16);
    }

    #[tokio::test]
    async fn empty_list_sends_one_terminating_batch() {
        let volume = volume();
        let mut out = Vec::new();
        let stats = send_batches(&mut out, Some(&volume), &[], VoxelType::U8, 8).await.unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.bricks, 0);

        let batch = read_batch::<u8, _>(&mut out.as_slice()).await.unwrap();
        assert!(!batch.more);
        assert!(batch.bricks.is_empty());
    }

    #[tokio::test]
    async fn single_brick_reply() {
        let volume = volume();
        let key = BrickKey::new(0, 0, 5);
        let mut out = Vec::new();
        send_brick(&mut out, Some(&volume), &key, VoxelType::U8).await.unwrap();

        assert_eq!(out[0], CommandCode::Brick as u8);
        let count = u64::from_le_bytes(out[1..9].try_into().unwrap());
        assert_eq!(count, 16 * 16 * 16);
        assert_eq!(out.len(), 9 + count as usize);
        assert_eq!(&out[9..], volume.brick_u8(&key).unwrap().as_slice());
    }

    #[tokio::test]
    async fn missing_brick_is_sent_empty() {
        let volume = volume();
        let mut out = Vec::new();
        let result = send_brick(&mut out, Some(&volume), &BrickKey::new(0, 0, 99), VoxelType::U32).await;
        assert!(matches!(result, Err(Error::Dataset(_))));
        assert_eq!(out, vec![CommandCode::Brick as u8, 0, 0, 0, 0, 0, 0, 0, 0]);

        let mut out = Vec::new();
        let result = send_brick(&mut out, None, &BrickKey::new(0, 0, 0), VoxelType::U8).await;
        assert!(matches!(result, Err(Error::NoDataset)));
        assert_eq!(out.len(), 9);
    }
}
