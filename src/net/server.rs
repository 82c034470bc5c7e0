//! Command serving loop
//!
//! The source rank accepts one TCP client at a time, decodes its commands and
//! replicates each one to the other ranks before performing it. Followers sit
//! in [`NetDsServer::follow`] and perform whatever the source replicates.
//! When a client goes away the source broadcasts a disconnect frame so every
//! rank drops its per-connection state; `Shutdown` stops all ranks.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::Instrument;
use uuid::Uuid;

use crate::compute::CallPerformer;
use crate::data::MemoryCatalog;
use crate::mpi::{sync_frame, Communicator, Frame};
use crate::net::{codec, dispatch, Command};
use crate::render::LodRenderer;
use crate::util::config::ServerConfig;
use crate::util::Timer;
use crate::{Error, Result};

/// How a client connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client closed its socket
    Disconnected,
    /// The client asked the whole job to stop
    Shutdown,
}

pub struct NetDsServer<C> {
    comm: C,
    source: i32,
    performer: CallPerformer,
}

impl<C: Communicator> NetDsServer<C> {
    pub fn new(comm: C, source: i32, performer: CallPerformer) -> Self {
        Self {
            comm,
            source,
            performer,
        }
    }

    /// Builds the catalog and renderer described by `config`
    pub fn from_config(comm: C, config: &ServerConfig) -> Self {
        let catalog = MemoryCatalog::from_specs(config.volumes.iter().cloned());
        let performer = CallPerformer::new(
            Arc::new(catalog),
            Box::new(LodRenderer::new(config.renderer.clone())),
            config.max_batch_size,
        );
        Self::new(comm, config.source_rank, performer)
    }

    pub fn rank(&self) -> i32 {
        self.comm.rank()
    }

    pub fn is_source(&self) -> bool {
        self.comm.rank() == self.source
    }

    pub fn performer(&self) -> &CallPerformer {
        &self.performer
    }

    /// Serves on `addr` when this is the source rank, follows otherwise
    pub async fn run<A: ToSocketAddrs>(&mut self, addr: A) -> Result<()> {
        if !self.is_source() {
            return self.follow().await;
        }
        if self.source >= self.comm.size() {
            return Err(Error::Mpi(format!(
                "source rank {} outside a group of {}",
                self.source,
                self.comm.size()
            )));
        }

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            "proc {} of {} listening at {}",
            self.rank(),
            self.comm.size(),
            listener.local_addr()?
        );
        self.serve(listener).await
    }

    /// Accepts clients one after another until one sends `Shutdown`
    pub async fn serve(&mut self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("set_nodelay failed: {}", e);
            }
            tracing::info!(%peer, "client connected");

            match self.serve_connection(stream).await {
                Ok(Outcome::Shutdown) => return Ok(()),
                Ok(Outcome::Disconnected) => {}
                Err(e) if e.is_fatal() => tracing::warn!(%peer, "connection dropped: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs one client's command stream to completion.
    ///
    /// Transport failures end the connection and are returned; all other
    /// command failures are logged and the loop keeps reading. Unless the
    /// client sent `Shutdown`, followers are told about the disconnect before
    /// this returns.
    pub async fn serve_connection<S>(&mut self, stream: S) -> Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("connection", id = %Uuid::new_v4());
        async move {
            let outcome = self.command_loop(stream).await;
            if !matches!(outcome, Ok(Outcome::Shutdown)) {
                sync_frame(&self.comm, self.source, Some(Frame::Disconnect)).await?;
            }
            self.performer.reset();
            outcome
        }
        .instrument(span)
        .await
    }

    async fn command_loop<S>(&mut self, stream: S) -> Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        loop {
            let command = match dispatch::read_command(&mut reader).await {
                Ok(command) => command,
                Err(Error::UnknownCommand(_)) => continue,
                Err(e) if codec::is_eof(&e) => {
                    tracing::info!("client disconnected");
                    return Ok(Outcome::Disconnected);
                }
                Err(e) => return Err(e),
            };

            let command = match sync_frame(&self.comm, self.source, Some(Frame::Command(command))).await? {
                Frame::Command(command) => command,
                Frame::Disconnect => return Ok(Outcome::Disconnected),
            };

            match self.execute(&command, &mut writer).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e @ Error::TypeMismatch(_)) => tracing::debug!("{} dropped: {}", command, e),
                Err(e) => tracing::warn!("{} failed: {}", command, e),
            }

            if command == Command::Shutdown {
                writer.shutdown().await.ok();
                tracing::info!("shutdown requested");
                return Ok(Outcome::Shutdown);
            }
        }
    }

    /// Performs replicated frames until the source sends `Shutdown`
    pub async fn follow(&mut self) -> Result<()> {
        let mut sink = tokio::io::sink();
        loop {
            match sync_frame(&self.comm, self.source, None).await? {
                Frame::Disconnect => {
                    tracing::debug!(target: "netds::sync", "proc {} resetting after disconnect", self.rank());
                    self.performer.reset();
                }
                Frame::Command(command) => {
                    if let Err(e) = self.execute(&command, &mut sink).await {
                        tracing::debug!(target: "netds::sync", "proc {}: {} failed: {}", self.rank(), command, e);
                    }
                    if command == Command::Shutdown {
                        self.performer.reset();
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn execute<W>(&mut self, command: &Command, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let _timer = Timer::new(command.to_string());
        let replying = self.is_source();
        command.perform(&mut self.performer, replying, out).await
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use tokio::io::duplex;

    use super::*;
    use crate::data::{Pattern, ViewTransform, VolumeSpec};
    use crate::mpi::LocalCommunicator;
    use crate::net::NetDsClient;

    fn config() -> ServerConfig {
        ServerConfig {
            volumes: vec![VolumeSpec {
                name: "tiny.uvf".to_string(),
                dimensions: [16, 16, 16],
                brick_size: [8, 8, 8],
                pattern: Pattern::Checker,
            }],
            max_batch_size: 4,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn eof_ends_the_connection() {
        let mut server = NetDsServer::from_config(LocalCommunicator::solo(), &config());
        let (client, remote) = duplex(1 << 16);

        let serve = server.serve_connection(remote);
        let drive = async move {
            let mut client = NetDsClient::new(client);
            let catalog = client.open("tiny.uvf").await.unwrap();
            assert_eq!(catalog.brick_count(), 9);
            drop(client);
        };

        let (outcome, ()) = tokio::join!(serve, drive);
        assert_eq!(outcome.unwrap(), Outcome::Disconnected);
        assert!(server.performer().open_name().is_none());
    }

    #[tokio::test]
    async fn followers_stay_in_lockstep() {
        let mut servers: Vec<_> = LocalCommunicator::group(3)
            .into_iter()
            .map(|comm| NetDsServer::from_config(comm, &config()))
            .collect();
        let (source, followers) = servers.split_at_mut(1);
        let source = &mut source[0];

        let (client, remote) = duplex(1 << 16);
        let drive = async move {
            let mut client = NetDsClient::new(client);
            client.open("tiny.uvf").await.unwrap();
            client.set_batch_size(2).await.unwrap();
            let batches = client.rotate::<u8>(&ViewTransform::identity()).await.unwrap();
            client.close("tiny.uvf").await.unwrap();
            client.shutdown().await.unwrap();
            batches
        };
        let follow = join_all(followers.iter_mut().map(|f| f.follow()));

        let (outcome, batches, followed) = tokio::join!(source.serve_connection(remote), drive, follow);
        assert_eq!(outcome.unwrap(), Outcome::Shutdown);
        assert!(followed.into_iter().all(|r| r.is_ok()));

        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|b| b.bricks.len() == 2));
        assert!(!batches[3].more);
    }
}
