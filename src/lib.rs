//! # netds - Networked Out-of-Core Brick Streaming
//!
//! A TCP command service that lets remote clients open multi-resolution
//! volume datasets, request view transformations and receive only the bricks
//! needed to render the current view. Every rank of a parallel job replicates
//! the command stream so all ranks observe the same dataset state.

pub mod compute;
pub mod data;
pub mod mpi;
pub mod net;
pub mod render;
pub mod util;

pub use compute::{BatchStats, CallPerformer};
pub use data::{BrickKey, BrickMetadata, Catalog, Dataset, MemoryCatalog, ViewTransform, Voxel, VoxelType};
pub use mpi::{Communicator, Frame, LocalCommunicator};
pub use net::{Command, CommandCode, NetDsClient, NetDsServer};
pub use render::{LodRenderer, Renderer};
pub use util::config::ServerConfig;

/// Initialize logging for the netds system
pub fn init(log_level: &str) -> Result<()> {
    let level: tracing::Level = log_level
        .parse()
        .map_err(|_| Error::Config(format!("unknown log level '{}'", log_level)))?;

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!("Initializing netds v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Main error type for netds operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Unknown command tag {0}")]
    UnknownCommand(u8),

    #[error("Unknown voxel type tag {0}")]
    TypeMismatch(u8),

    #[error("Unexpected reply: expected tag {expected}, got {got}")]
    UnexpectedReply { expected: u8, got: u8 },

    #[error("MPI error: {0}")]
    Mpi(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("No dataset is open")]
    NoDataset,

    #[error("Render error: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Transport failures end the connection, everything else only the command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
