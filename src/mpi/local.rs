//! In-process communicator group
//!
//! Stands in for an MPI world when the server runs as a single process, and
//! simulates an N-rank group in tests. Ranks are tasks sharing one exchange
//! slot; each broadcast is a write by the root, a barrier, a read by
//! everybody else, and a second barrier before the slot can be reused.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Barrier;

use crate::mpi::Communicator;
use crate::{Error, Result};

struct Shared {
    barrier: Barrier,
    slot: Mutex<Vec<u8>>,
}

pub struct LocalCommunicator {
    rank: i32,
    size: i32,
    shared: Arc<Shared>,
}

impl LocalCommunicator {
    /// Creates `size` connected ranks, ordered by rank
    pub fn group(size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            slot: Mutex::new(Vec::new()),
        });
        (0..size)
            .map(|rank| Self {
                rank: rank as i32,
                size: size as i32,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// A group of one; every broadcast is a no-op
    pub fn solo() -> Self {
        Self {
            rank: 0,
            size: 1,
            shared: Arc::new(Shared {
                barrier: Barrier::new(1),
                slot: Mutex::new(Vec::new()),
            }),
        }
    }

    async fn exchange(&self, bytes: &mut [u8], root: i32) -> Result<()> {
        if root < 0 || root >= self.size {
            return Err(Error::Mpi(format!("root {} outside group of {}", root, self.size)));
        }
        if self.size == 1 {
            return Ok(());
        }

        if self.rank == root {
            let mut slot = self.shared.slot.lock();
            slot.clear();
            slot.extend_from_slice(bytes);
        }
        self.shared.barrier.wait().await;

        let mismatch = if self.rank != root {
            let slot = self.shared.slot.lock();
            if slot.len() == bytes.len() {
                bytes.copy_from_slice(&slot);
                None
            } else {
                Some(slot.len())
            }
        } else {
            None
        };
        self.shared.barrier.wait().await;

        match mismatch {
            Some(sent) => Err(Error::Mpi(format!(
                "rank {} expected {} bytes from root {}, got {}",
                self.rank,
                bytes.len(),
                root,
                sent
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl Communicator for LocalCommunicator {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    async fn broadcast_u8(&self, value: &mut u8, root: i32) -> Result<()> {
        let mut raw = [*value];
        self.exchange(&mut raw, root).await?;
        *value = raw[0];
        Ok(())
    }

    async fn broadcast_u16(&self, value: &mut u16, root: i32) -> Result<()> {
        let mut raw = value.to_le_bytes();
        self.exchange(&mut raw, root).await?;
        *value = u16::from_le_bytes(raw);
        Ok(())
    }

    async fn broadcast_u32(&self, value: &mut u32, root: i32) -> Result<()> {
        let mut raw = value.to_le_bytes();
        self.exchange(&mut raw, root).await?;
        *value = u32::from_le_bytes(raw);
        Ok(())
    }

    async fn broadcast_u64(&self, value: &mut u64, root: i32) -> Result<()> {
        let mut raw = value.to_le_bytes();
        self.exchange(&mut raw, root).await?;
        *value = u64::from_le_bytes(raw);
        Ok(())
    }

    async fn broadcast_bytes(&self, buf: &mut [u8], root: i32) -> Result<()> {
        self.exchange(buf, root).await
    }

    async fn broadcast_f32s(&self, buf: &mut [f32], root: i32) -> Result<()> {
        let mut raw: Vec<u8> = buf.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.exchange(&mut raw, root).await?;
        for (v, c) in buf.iter_mut().zip(raw.chunks_exact(4)) {
            *v = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
        }
        Ok(())
    }
}
