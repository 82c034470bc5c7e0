//! MPI world communicator

use ::mpi::environment::Universe;
use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::{Communicator as _, Root};
use async_trait::async_trait;

use crate::mpi::Communicator;
use crate::{Error, Result};

/// MPI universe and world communicator.
///
/// Collectives block the calling thread until every rank reaches them.
pub struct MpiWorld {
    _universe: Universe,
    world: SimpleCommunicator,
    rank: i32,
    size: i32,
}

impl MpiWorld {
    pub fn initialize() -> Result<Self> {
        let universe = ::mpi::initialize().ok_or_else(|| Error::Mpi("MPI already initialized".to_string()))?;
        let world = universe.world();
        let rank = world.rank();
        let size = world.size();
        tracing::info!(rank, size, "joined MPI world");

        Ok(Self {
            _universe: universe,
            world,
            rank,
            size,
        })
    }

    fn check_root(&self, root: i32) -> Result<()> {
        if root < 0 || root >= self.size {
            return Err(Error::Mpi(format!("root {} outside world of {}", root, self.size)));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl Communicator for MpiWorld {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    async fn broadcast_u8(&self, value: &mut u8, root: i32) -> Result<()> {
        self.check_root(root)?;
        self.world.process_at_rank(root).broadcast_into(value);
        Ok(())
    }

    async fn broadcast_u16(&self, value: &mut u16, root: i32) -> Result<()> {
        self.check_root(root)?;
        self.world.process_at_rank(root).broadcast_into(value);
        Ok(())
    }

    async fn broadcast_u32(&self, value: &mut u32, root: i32) -> Result<()> {
        self.check_root(root)?;
        self.world.process_at_rank(root).broadcast_into(value);
        Ok(())
    }

    async fn broadcast_u64(&self, value: &mut u64, root: i32) -> Result<()> {
        self.check_root(root)?;
        self.world.process_at_rank(root).broadcast_into(value);
        Ok(())
    }

    async fn broadcast_bytes(&self, buf: &mut [u8], root: i32) -> Result<()> {
        self.check_root(root)?;
        if !buf.is_empty() {
            self.world.process_at_rank(root).broadcast_into(buf);
        }
        Ok(())
    }

    async fn broadcast_f32s(&self, buf: &mut [f32], root: i32) -> Result<()> {
        self.check_root(root)?;
        self.world.process_at_rank(root).broadcast_into(buf);
        Ok(())
    }
}
