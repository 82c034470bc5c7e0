//! Replication of the command stream across ranks
//!
//! Every rank must observe the same sequence of commands with bit-identical
//! payloads. The source rank decodes a command from its socket, then drives a
//! series of blocking broadcasts: first a one-byte frame header (the command
//! tag, or [`DISCONNECT_FRAME`]), then each payload field with its exact wire
//! type. Followers allocate variable-length buffers to the broadcast length
//! before receiving into them.
//!
//! Collectives must be issued in the same order on every rank. A rank that
//! skips or reorders a frame deadlocks or diverges the group; nothing here
//! detects that.

pub mod local;
#[cfg(feature = "mpi")]
pub mod world;

pub use local::LocalCommunicator;
#[cfg(feature = "mpi")]
pub use world::MpiWorld;

use async_trait::async_trait;

use crate::net::{Command, CommandCode};
use crate::{Error, Result};

/// Frame header announcing that the source's client went away
pub const DISCONNECT_FRAME: u8 = 0xFF;

/// Blocking broadcast collectives over a fixed group of ranks
#[async_trait(?Send)]
pub trait Communicator {
    fn rank(&self) -> i32;

    fn size(&self) -> i32;

    async fn broadcast_u8(&self, value: &mut u8, root: i32) -> Result<()>;

    async fn broadcast_u16(&self, value: &mut u16, root: i32) -> Result<()>;

    async fn broadcast_u32(&self, value: &mut u32, root: i32) -> Result<()>;

    async fn broadcast_u64(&self, value: &mut u64, root: i32) -> Result<()>;

    /// `buf` must already have the root's length on every rank
    async fn broadcast_bytes(&self, buf: &mut [u8], root: i32) -> Result<()>;

    async fn broadcast_f32s(&self, buf: &mut [f32], root: i32) -> Result<()>;
}

/// One unit of the replicated stream
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Command(Command),
    Disconnect,
}

impl Frame {
    pub fn tag(&self) -> u8 {
        match self {
            Frame::Command(command) => command.code() as u8,
            Frame::Disconnect => DISCONNECT_FRAME,
        }
    }
}

/// Replicates one frame from `source` to every rank.
///
/// The source passes the frame it decoded, followers pass `None` and get the
/// source's frame back.
pub async fn sync_frame(comm: &dyn Communicator, source: i32, frame: Option<Frame>) -> Result<Frame> {
    let is_source = comm.rank() == source;
    if is_source != frame.is_some() {
        return Err(Error::Mpi(format!(
            "rank {} has the wrong role for a broadcast from {}",
            comm.rank(),
            source
        )));
    }

    let mut tag = frame.as_ref().map(Frame::tag).unwrap_or(0);
    comm.broadcast_u8(&mut tag, source).await?;

    let mut frame = match frame {
        Some(frame) => frame,
        None if tag == DISCONNECT_FRAME => Frame::Disconnect,
        None => Frame::Command(Command::empty(CommandCode::try_from(tag)?)),
    };

    if let Frame::Command(command) = &mut frame {
        command.broadcast(comm, source).await?;
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::net::command::{BatchSizeParams, BrickParams, FileParams, RotateParams};

    #[tokio::test]
    async fn every_rank_sees_the_source_command() {
        let frames = vec![
            Frame::Command(Command::Open(FileParams::new("volume.uvf"))),
            Frame::Command(Command::BatchSize(BatchSizeParams { batch_size: 64 })),
            Frame::Command(Command::Brick(BrickParams {
                voxel_type: 1,
                lod: 2,
                brick_index: 9,
            })),
            Frame::Command(Command::Rotate(RotateParams {
                matrix: std::array::from_fn(|i| i as f32 * 0.25 - 1.0),
                voxel_type: 0,
            })),
            Frame::Command(Command::Close(FileParams::new("volume.uvf"))),
            Frame::Command(Command::ListFiles),
            Frame::Disconnect,
            Frame::Command(Command::Shutdown),
        ];

        let group = LocalCommunicator::group(4);
        let source = 2;
        let runs = group.iter().map(|comm| {
            let frames = frames.clone();
            async move {
                let mut seen = Vec::new();
                for frame in frames {
                    let local = (comm.rank() == source).then_some(frame);
                    seen.push(sync_frame(comm, source, local).await.unwrap());
                }
                seen
            }
        });

        for seen in join_all(runs).await {
            assert_eq!(seen, frames);
        }
    }

    #[tokio::test]
    async fn rotate_matrix_is_bit_identical() {
        let matrix: [f32; 16] = std::array::from_fn(|i| (i as f32).sin() / 3.0);
        let frame = Frame::Command(Command::Rotate(RotateParams { matrix, voxel_type: 2 }));

        let group = LocalCommunicator::group(3);
        let runs = group.iter().map(|comm| {
            let local = (comm.rank() == 0).then(|| frame.clone());
            async move { sync_frame(comm, 0, local).await.unwrap() }
        });

        for received in join_all(runs).await {
            let Frame::Command(Command::Rotate(params)) = received else {
                panic!("expected a rotate frame");
            };
            let bits: Vec<u32> = params.matrix.iter().map(|v| v.to_bits()).collect();
            let expected: Vec<u32> = matrix.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits, expected);
        }
    }

    #[tokio::test]
    async fn source_without_a_frame_is_rejected() {
        let comm = LocalCommunicator::solo();
        assert!(matches!(sync_frame(&comm, 0, None).await, Err(Error::Mpi(_))));
    }
}
