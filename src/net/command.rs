//! Network commands and their parameters
//!
//! Each variant can be decoded from the wire, re-encoded, replicated to every
//! rank and performed against the [`CallPerformer`].

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::compute::{batch, CallPerformer};
use crate::data::{BrickKey, ViewTransform, VoxelType};
use crate::mpi::Communicator;
use crate::net::codec::{self, WirePut};
use crate::{Error, Result};

/// Command tag, the first byte of every request and reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    Open = 0,
    Close = 1,
    Brick = 2,
    ListFiles = 3,
    Shutdown = 4,
    Rotate = 5,
    BatchSize = 6,
}

impl TryFrom<u8> for CommandCode {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => CommandCode::Open,
            1 => CommandCode::Close,
            2 => CommandCode::Brick,
            3 => CommandCode::ListFiles,
            4 => CommandCode::Shutdown,
            5 => CommandCode::Rotate,
            6 => CommandCode::BatchSize,
            other => return Err(Error::UnknownCommand(other)),
        })
    }
}

/// Filename carried by `Open` and `Close`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileParams {
    pub filename: Vec<u8>,
}

impl FileParams {
    pub fn new(name: &str) -> Self {
        Self {
            filename: name.as_bytes().to_vec(),
        }
    }

    /// The filename without any trailing NULs a C client may have sent
    pub fn name(&self) -> String {
        let end = self
            .filename
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.filename[..end]).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrickParams {
    /// Raw voxel type tag; validated when performed
    pub voxel_type: u8,
    pub lod: u32,
    pub brick_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotateParams {
    /// Row-major view matrix
    pub matrix: [f32; 16],
    pub voxel_type: u8,
}

impl Default for RotateParams {
    fn default() -> Self {
        Self {
            matrix: ViewTransform::identity().to_row_major(),
            voxel_type: VoxelType::U8.tag(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSizeParams {
    pub batch_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open(FileParams),
    Close(FileParams),
    Brick(BrickParams),
    Rotate(RotateParams),
    BatchSize(BatchSizeParams),
    ListFiles,
    Shutdown,
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Open(_) => CommandCode::Open,
            Command::Close(_) => CommandCode::Close,
            Command::Brick(_) => CommandCode::Brick,
            Command::Rotate(_) => CommandCode::Rotate,
            Command::BatchSize(_) => CommandCode::BatchSize,
            Command::ListFiles => CommandCode::ListFiles,
            Command::Shutdown => CommandCode::Shutdown,
        }
    }

    /// A command with a default payload, to be filled by [`Command::broadcast`]
    pub fn empty(code: CommandCode) -> Self {
        match code {
            CommandCode::Open => Command::Open(FileParams::default()),
            CommandCode::Close => Command::Close(FileParams::default()),
            CommandCode::Brick => Command::Brick(BrickParams::default()),
            CommandCode::Rotate => Command::Rotate(RotateParams::default()),
            CommandCode::BatchSize => Command::BatchSize(BatchSizeParams::default()),
            CommandCode::ListFiles => Command::ListFiles,
            CommandCode::Shutdown => Command::Shutdown,
        }
    }

    /// Reads the payload that follows an already consumed tag
    pub async fn decode<R>(code: CommandCode, r: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let command = match code {
            CommandCode::Open => Command::Open(FileParams {
                filename: codec::read_bytes(r).await?,
            }),
            CommandCode::Close => Command::Close(FileParams {
                filename: codec::read_bytes(r).await?,
            }),
            CommandCode::BatchSize => Command::BatchSize(BatchSizeParams {
                batch_size: codec::read_size(r).await?,
            }),
            CommandCode::Rotate => {
                let values = codec::read_f32s(r, 16).await?;
                let mut matrix = [0.0f32; 16];
                matrix.copy_from_slice(&values);
                let voxel_type = codec::read_u8(r).await?;
                Command::Rotate(RotateParams { matrix, voxel_type })
            }
            CommandCode::Brick => {
                let voxel_type = codec::read_u8(r).await?;
                let lod = codec::read_u32(r).await?;
                let brick_index = codec::read_u32(r).await?;
                Command::Brick(BrickParams {
                    voxel_type,
                    lod,
                    brick_index,
                })
            }
            CommandCode::ListFiles => Command::ListFiles,
            CommandCode::Shutdown => Command::Shutdown,
        };

        tracing::debug!(target: "netds::params", "{}", command);
        Ok(command)
    }

    /// Tag byte followed by the payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.code() as u8];
        match self {
            Command::Open(p) | Command::Close(p) => buf.put_bytes(&p.filename)?,
            Command::BatchSize(p) => buf.put_size(p.batch_size),
            Command::Rotate(p) => {
                buf.put_f32s(&p.matrix);
                buf.put_u8(p.voxel_type);
            }
            Command::Brick(p) => {
                buf.put_u8(p.voxel_type);
                buf.put_u32(p.lod);
                buf.put_u32(p.brick_index);
            }
            Command::ListFiles | Command::Shutdown => {}
        }
        Ok(buf)
    }

    /// Replicates the payload from `source` to every rank of `comm`
    pub async fn broadcast(&mut self, comm: &dyn Communicator, source: i32) -> Result<()> {
        let rank = comm.rank();
        match self {
            Command::Open(p) | Command::Close(p) => {
                let mut len = u16::try_from(p.filename.len())
                    .map_err(|_| Error::Mpi(format!("filename of {} bytes", p.filename.len())))?;
                comm.broadcast_u16(&mut len, source).await?;
                if rank != source {
                    p.filename = vec![0; len as usize];
                }
                comm.broadcast_bytes(&mut p.filename, source).await?;
            }
            Command::BatchSize(p) => {
                comm.broadcast_u64(&mut p.batch_size, source).await?;
            }
            Command::Rotate(p) => {
                comm.broadcast_f32s(&mut p.matrix, source).await?;
                comm.broadcast_u8(&mut p.voxel_type, source).await?;
            }
            Command::Brick(p) => {
                comm.broadcast_u8(&mut p.voxel_type, source).await?;
                comm.broadcast_u32(&mut p.lod, source).await?;
                comm.broadcast_u32(&mut p.brick_index, source).await?;
            }
            Command::ListFiles | Command::Shutdown => {}
        }

        if rank != source {
            tracing::trace!(target: "netds::sync", "proc {} received {}", rank, self);
        }
        Ok(())
    }

    /// Executes the command. Only the `replying` rank produces replies and
    /// streams bricks; state changing commands run everywhere.
    pub async fn perform<W>(&self, performer: &mut CallPerformer, replying: bool, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self {
            Command::Open(p) => {
                let opened = performer.open_file(&p.name());
                if !replying {
                    return opened;
                }

                let mut reply = vec![CommandCode::Open as u8];
                match performer.dataset() {
                    Ok(dataset) => batch::encode_catalog(&**dataset, &mut reply),
                    Err(_) => batch::encode_empty_catalog(&mut reply),
                }
                codec::write_frame(out, &reply).await?;
                out.flush().await?;
                opened
            }
            Command::Close(p) => performer.close_file(&p.name()),
            Command::BatchSize(p) => {
                performer.set_max_batch_size(p.batch_size);
                Ok(())
            }
            Command::Rotate(p) => {
                if !replying {
                    return Ok(());
                }

                performer.rotate(&ViewTransform::from_row_major(&p.matrix));
                let voxel_type = VoxelType::try_from(p.voxel_type)?;
                let (keys, failure) = match performer.needed_bricks() {
                    Ok(keys) => (keys, None),
                    Err(e) => (Vec::new(), Some(e)),
                };

                let dataset = performer.dataset().ok().map(|d| &**d);
                let stats =
                    batch::send_batches(out, dataset, &keys, voxel_type, performer.max_batch_size()).await?;
                tracing::debug!(
                    batches = stats.batches,
                    bricks = stats.bricks,
                    bytes = stats.bytes,
                    "rotation streamed"
                );
                failure.map_or(Ok(()), Err)
            }
            Command::Brick(p) => {
                if !replying {
                    return Ok(());
                }

                let voxel_type = VoxelType::try_from(p.voxel_type)?;
                let key = BrickKey::new(0, p.lod as u64, p.brick_index as u64);
                let dataset = performer.dataset().ok().map(|d| &**d);
                batch::send_brick(out, dataset, &key, voxel_type).await
            }
            Command::ListFiles => {
                if !replying {
                    return Ok(());
                }

                let names: Vec<String> = performer
                    .list_files()
                    .into_iter()
                    .filter(|name| name.len() < u16::MAX as usize)
                    .take(u16::MAX as usize)
                    .collect();

                let mut reply = vec![CommandCode::ListFiles as u8];
                reply.put_u16(names.len() as u16);
                for name in &names {
                    reply.put_cstr(name)?;
                }
                codec::write_frame(out, &reply).await?;
                out.flush().await?;
                Ok(())
            }
            Command::Shutdown => Ok(()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Open(p) => write!(f, "OPEN ({}) {}", p.filename.len(), p.name()),
            Command::Close(p) => write!(f, "CLOSE ({}) {}", p.filename.len(), p.name()),
            Command::Brick(p) => write!(f, "BRICK type={} lod={} bidx={}", p.voxel_type, p.lod, p.brick_index),
            Command::Rotate(p) => write!(f, "ROTATE type={}", p.voxel_type),
            Command::BatchSize(p) => write!(f, "BATCHSIZE {}", p.batch_size),
            Command::ListFiles => write!(f, "LIST"),
            Command::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}
