//! Command factory: tag byte to fully decoded command

use tokio::io::AsyncRead;

use crate::net::codec;
use crate::net::{Command, CommandCode};
use crate::Result;

/// Reads the next tag from the stream and decodes its payload.
///
/// An unrecognized tag yields [`crate::Error::UnknownCommand`] without
/// consuming anything past the tag; callers skip it and keep the connection.
pub async fn read_command<R>(r: &mut R) -> Result<Command>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let tag = codec::read_u8(r).await?;
    decode_tagged(tag, r).await
}

pub async fn decode_tagged<R>(tag: u8, r: &mut R) -> Result<Command>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let code = CommandCode::try_from(tag).map_err(|e| {
        tracing::warn!(target: "netds::params", tag, "Unknown command received");
        e
    })?;
    Command::decode(code, r).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::command::{BatchSizeParams, FileParams};
    use crate::Error;

    #[tokio::test]
    async fn reads_commands_in_order() {
        let mut bytes = Command::Open(FileParams::new("a.uvf")).encode().unwrap();
        bytes.extend(Command::BatchSize(BatchSizeParams { batch_size: 3 }).encode().unwrap());
        bytes.extend(Command::Shutdown.encode().unwrap());

        let mut r = bytes.as_slice();
        assert_eq!(read_command(&mut r).await.unwrap(), Command::Open(FileParams::new("a.uvf")));
        assert_eq!(
            read_command(&mut r).await.unwrap(),
            Command::BatchSize(BatchSizeParams { batch_size: 3 })
        );
        assert_eq!(read_command(&mut r).await.unwrap(), Command::Shutdown);
        assert!(codec::is_eof(&read_command(&mut r).await.unwrap_err()));
    }

    #[tokio::test]
    async fn unknown_tag_leaves_the_stream_usable() {
        let mut bytes = vec![42u8];
        bytes.extend(Command::ListFiles.encode().unwrap());

        let mut r = bytes.as_slice();
        assert!(matches!(read_command(&mut r).await, Err(Error::UnknownCommand(42))));
        assert_eq!(read_command(&mut r).await.unwrap(), Command::ListFiles);
    }
}
