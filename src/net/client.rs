//! Client side of the brick streaming protocol

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::data::{BrickKey, ViewTransform, Voxel};
use crate::net::codec;
use crate::net::command::{BatchSizeParams, BrickParams, FileParams, RotateParams};
use crate::net::{Command, CommandCode};
use crate::{Error, Result};

/// Static brick layout of an opened dataset, as sent in the `Open` reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrickCatalog {
    pub layouts: Vec<[u32; 3]>,
    pub lods: Vec<u64>,
    pub idxs: Vec<u64>,
    pub centers: Vec<f32>,
    pub extents: Vec<f32>,
    pub n_voxels: Vec<u32>,
}

impl BrickCatalog {
    pub fn lod_count(&self) -> u64 {
        self.layouts.len() as u64
    }

    pub fn brick_count(&self) -> u64 {
        self.lods.len() as u64
    }

    /// Position of `(lod, index)` in the per-brick arrays
    pub fn position(&self, lod: u64, index: u64) -> Option<usize> {
        self.lods
            .iter()
            .zip(&self.idxs)
            .position(|(&l, &i)| l == lod && i == index)
    }

    pub fn voxel_counts(&self, position: usize) -> Option<[u32; 3]> {
        let v = self.n_voxels.get(position * 3..position * 3 + 3)?;
        Some([v[0], v[1], v[2]])
    }
}

/// One batch of a rotation reply
#[derive(Debug, Clone, PartialEq)]
pub struct BrickBatch<T> {
    /// Whether further batches follow
    pub more: bool,
    pub bricks: Vec<(BrickKey, Vec<T>)>,
}

/// Reads an `Open` reply body (the tag already consumed)
pub async fn read_catalog<R>(r: &mut R) -> Result<BrickCatalog>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let lod_count = codec::read_size(r).await?;
    let flat = codec::read_u32s(r, triples(lod_count)?).await?;
    let layouts = flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();

    let brick_count = codec::read_size(r).await?;
    let n = codec::wire_len(brick_count, 1)?;
    Ok(BrickCatalog {
        layouts,
        lods: codec::read_sizes(r, n).await?,
        idxs: codec::read_sizes(r, n).await?,
        centers: codec::read_f32s(r, triples(brick_count)?).await?,
        extents: codec::read_f32s(r, triples(brick_count)?).await?,
        n_voxels: codec::read_u32s(r, triples(brick_count)?).await?,
    })
}

/// Number of values in `count` three-component entries
fn triples(count: u64) -> Result<usize> {
    codec::wire_len(count, 3)
}

async fn read_voxels<T, R>(r: &mut R, count: u64) -> Result<Vec<T>>
where
    T: Voxel,
    R: AsyncRead + Unpin + ?Sized,
{
    let raw = codec::read_exact_vec(r, codec::wire_len(count, T::WIDTH)?).await?;
    Ok(raw.chunks_exact(T::WIDTH).map(T::take).collect())
}

async fn expect_tag<R>(r: &mut R, code: CommandCode) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let got = codec::read_u8(r).await?;
    if got != code as u8 {
        return Err(Error::UnexpectedReply {
            expected: code as u8,
            got,
        });
    }
    Ok(())
}

/// Reads one rotation batch including its tag
pub async fn read_batch<T, R>(r: &mut R) -> Result<BrickBatch<T>>
where
    T: Voxel,
    R: AsyncRead + Unpin + ?Sized,
{
    expect_tag(r, CommandCode::Rotate).await?;
    let more = codec::read_u8(r).await? != 0;
    let n = codec::wire_len(codec::read_size(r).await?, 1)?;
    let lods = codec::read_sizes(r, n).await?;
    let idxs = codec::read_sizes(r, n).await?;
    let counts = codec::read_sizes(r, n).await?;

    let mut bricks = Vec::with_capacity(n);
    for ((lod, index), count) in lods.into_iter().zip(idxs).zip(counts) {
        let voxels = read_voxels::<T, R>(r, count).await?;
        bricks.push((BrickKey::new(0, lod, index), voxels));
    }
    Ok(BrickBatch { more, bricks })
}

pub struct NetDsClient<S> {
    stream: S,
}

impl NetDsClient<TcpStream> {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> NetDsClient<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.send_raw(&command.encode()?).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn open(&mut self, name: &str) -> Result<BrickCatalog> {
        self.send(&Command::Open(FileParams::new(name))).await?;
        expect_tag(&mut self.stream, CommandCode::Open).await?;
        read_catalog(&mut self.stream).await
    }

    /// The server sends no acknowledgment for `Close`
    pub async fn close(&mut self, name: &str) -> Result<()> {
        self.send(&Command::Close(FileParams::new(name))).await
    }

    pub async fn set_batch_size(&mut self, batch_size: u64) -> Result<()> {
        self.send(&Command::BatchSize(BatchSizeParams { batch_size })).await
    }

    pub async fn list_files(&mut self) -> Result<Vec<String>> {
        self.send(&Command::ListFiles).await?;
        expect_tag(&mut self.stream, CommandCode::ListFiles).await?;
        let count = codec::read_u16(&mut self.stream).await?;
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            names.push(codec::read_cstr(&mut self.stream).await?);
        }
        Ok(names)
    }

    pub async fn brick<T: Voxel>(&mut self, lod: u32, brick_index: u32) -> Result<Vec<T>> {
        self.send(&Command::Brick(BrickParams {
            voxel_type: T::TYPE.tag(),
            lod,
            brick_index,
        }))
        .await?;
        expect_tag(&mut self.stream, CommandCode::Brick).await?;
        let count = codec::read_size(&mut self.stream).await?;
        read_voxels::<T, S>(&mut self.stream, count).await
    }

    /// Sends a view and collects batches up to the terminating one
    pub async fn rotate<T: Voxel>(&mut self, view: &ViewTransform) -> Result<Vec<BrickBatch<T>>> {
        self.send(&Command::Rotate(RotateParams {
            matrix: view.to_row_major(),
            voxel_type: T::TYPE.tag(),
        }))
        .await?;

        let mut batches = Vec::new();
        loop {
            let batch = read_batch::<T, S>(&mut self.stream).await?;
            let more = batch.more;
            batches.push(batch);
            if !more {
                return Ok(batches);
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.send(&Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lookup() {
        let catalog = BrickCatalog {
            layouts: vec![[2, 1, 1], [1, 1, 1]],
            lods: vec![0, 0, 1],
            idxs: vec![0, 1, 0],
            centers: vec![0.0; 9],
            extents: vec![0.0; 9],
            n_voxels: vec![8, 16, 16, 8, 16, 16, 8, 8, 8],
        };
        assert_eq!(catalog.lod_count(), 2);
        assert_eq!(catalog.brick_count(), 3);
        assert_eq!(catalog.position(1, 0), Some(2));
        assert_eq!(catalog.position(1, 1), None);
        assert_eq!(catalog.voxel_counts(2), Some([8, 8, 8]));
        assert_eq!(catalog.voxel_counts(3), None);
    }

    #[tokio::test]
    async fn overflowing_catalog_counts_are_errors() {
        let bytes = u64::MAX.to_le_bytes();
        let err = read_catalog(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(&err, Error::Transport(e) if e.kind() == std::io::ErrorKind::InvalidData));

        let mut bytes = 0u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(u64::MAX / 2).to_le_bytes());
        assert!(read_catalog(&mut bytes.as_slice()).await.is_err());
    }

    #[tokio::test]
    async fn oversized_batch_fails_without_panicking() {
        let mut bytes = vec![CommandCode::Rotate as u8, 0];
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = read_batch::<u32, _>(&mut bytes.as_slice()).await.unwrap_err();
        assert!(err.is_fatal());

        let mut bytes = vec![CommandCode::Rotate as u8, 1];
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        let err = read_batch::<u8, _>(&mut bytes.as_slice()).await.unwrap_err();
        assert!(codec::is_eof(&err));
    }

    #[tokio::test]
    async fn wrong_reply_tag_is_reported() {
        let mut r: &[u8] = &[CommandCode::Brick as u8];
        let err = read_batch::<u8, _>(&mut r).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedReply { expected: 5, got: 2 }));
    }
}
