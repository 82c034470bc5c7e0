//! netds - brick streaming server
//!
//! Runs the command server on every rank of the job (the configured source
//! rank owns the socket), or probes a running server as a client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use netds::data::{Voxel, VoxelType};
use netds::{NetDsClient, NetDsServer, ServerConfig, ViewTransform};

#[derive(Parser)]
#[command(name = "netds", version, about = "Networked out-of-core brick streaming")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the configured volumes (default)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Connect to a server, open a file and stream the identity view
    Probe {
        #[arg(long, default_value = "127.0.0.1:4445")]
        addr: String,
        #[arg(long, default_value = "volume.uvf")]
        file: String,
        /// Voxel width in bits: 8, 16 or 32
        #[arg(long, default_value_t = 8)]
        bits: u8,
        #[arg(long)]
        batch_size: Option<u64>,
        /// Ask the server to exit afterwards
        #[arg(long)]
        shutdown: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;

    match cli.mode.unwrap_or(Mode::Serve { port: None }) {
        Mode::Config => print!("{}", config.to_toml()?),
        Mode::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            netds::init(&config.log_level)?;
            serve(config).await?;
        }
        Mode::Probe {
            addr,
            file,
            bits,
            batch_size,
            shutdown,
        } => {
            netds::init(&config.log_level)?;
            let voxel_type = match bits {
                8 => VoxelType::U8,
                16 => VoxelType::U16,
                32 => VoxelType::U32,
                other => anyhow::bail!("unsupported voxel width {}", other),
            };
            match voxel_type {
                VoxelType::U8 => probe::<u8>(&addr, &file, batch_size, shutdown).await?,
                VoxelType::U16 => probe::<u16>(&addr, &file, batch_size, shutdown).await?,
                VoxelType::U32 => probe::<u32>(&addr, &file, batch_size, shutdown).await?,
            }
        }
    }
    Ok(())
}

#[cfg(feature = "mpi")]
async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let world = netds::mpi::MpiWorld::initialize()?;
    let mut server = NetDsServer::from_config(world, &config);
    server.run(config.address()).await?;
    Ok(())
}

#[cfg(not(feature = "mpi"))]
async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!("built without MPI, serving as a single rank");
    let mut server = NetDsServer::from_config(netds::LocalCommunicator::solo(), &config);
    server.run(config.address()).await?;
    Ok(())
}

async fn probe<T: Voxel>(addr: &str, file: &str, batch_size: Option<u64>, shutdown: bool) -> anyhow::Result<()> {
    let mut client = NetDsClient::connect(addr).await?;

    let files = client.list_files().await?;
    println!("server offers {} file(s): {}", files.len(), files.join(", "));

    let catalog = client.open(file).await?;
    println!("{}: {} level(s), {} brick(s)", file, catalog.lod_count(), catalog.brick_count());
    if catalog.brick_count() == 0 {
        anyhow::bail!("server could not open {}", file);
    }

    if let Some(size) = batch_size {
        client.set_batch_size(size).await?;
    }

    let started = std::time::Instant::now();
    let batches = client.rotate::<T>(&ViewTransform::identity()).await?;
    let bricks: usize = batches.iter().map(|b| b.bricks.len()).sum();
    let voxels: usize = batches
        .iter()
        .flat_map(|b| b.bricks.iter())
        .map(|(_, v)| v.len())
        .sum();
    println!(
        "identity view: {} brick(s) in {} batch(es), {} voxel(s) in {:?}",
        bricks,
        batches.len(),
        voxels,
        started.elapsed()
    );

    client.close(file).await?;
    if shutdown {
        client.shutdown().await?;
    }
    Ok(())
}
