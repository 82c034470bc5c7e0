//! Wire codec
//!
//! Every value is little-endian and fixed-width; there is no padding and no
//! framing beyond what each command lays out. The size-width integer is a
//! `u64`. Byte strings carry a `u16` length prefix; C strings additionally
//! count and carry their terminating NUL.
//!
//! Encoding appends to a `Vec<u8>` through [`WirePut`], decoding pulls from any
//! [`AsyncRead`]. A short read surfaces as [`Error::Transport`] and drops
//! whatever was read so far.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Appends wire-encoded values to a buffer
pub trait WirePut {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_size(&mut self, v: u64);
    fn put_f32(&mut self, v: f32);

    fn put_u32s(&mut self, values: &[u32]) {
        values.iter().for_each(|&v| self.put_u32(v));
    }

    fn put_sizes(&mut self, values: &[u64]) {
        values.iter().for_each(|&v| self.put_size(v));
    }

    fn put_f32s(&mut self, values: &[f32]) {
        values.iter().for_each(|&v| self.put_f32(v));
    }

    /// `u16` length followed by the bytes
    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// `u16` length including the NUL, the bytes, then the NUL
    fn put_cstr(&mut self, s: &str) -> Result<()>;
}

impl WirePut for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_size(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f32(&mut self, v: f32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| Error::Dataset(format!("string of {} bytes exceeds u16 length", bytes.len())))?;
        self.put_u16(len);
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn put_cstr(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len() + 1)
            .map_err(|_| Error::Dataset(format!("string of {} bytes exceeds u16 length", s.len())))?;
        self.put_u16(len);
        self.extend_from_slice(s.as_bytes());
        self.push(0);
        Ok(())
    }
}

pub async fn read_u8<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<u8> {
    Ok(r.read_u8().await?)
}

pub async fn read_u16<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<u16> {
    Ok(r.read_u16_le().await?)
}

pub async fn read_u32<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<u32> {
    Ok(r.read_u32_le().await?)
}

pub async fn read_size<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<u64> {
    Ok(r.read_u64_le().await?)
}

pub async fn read_f32<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<f32> {
    Ok(r.read_f32_le().await?)
}

/// Largest buffer reserved up front; longer reads grow as bytes arrive
const PREALLOC_LIMIT: usize = 64 * 1024;

fn invalid_data(msg: String) -> Error {
    Error::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

/// Byte length of `count` values `width` bytes wide.
///
/// Counts come off the wire, so one that does not fit a `usize` is a
/// transport error rather than an overflow.
pub fn wire_len(count: u64, width: usize) -> Result<usize> {
    usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(width))
        .ok_or_else(|| invalid_data(format!("count {} of {}-byte values overflows", count, width)))
}

/// Reads exactly `n` raw bytes without trusting `n` for the allocation
pub async fn read_exact_vec<R: AsyncRead + Unpin + ?Sized>(r: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n.min(PREALLOC_LIMIT));
    let read = (&mut *r).take(n as u64).read_to_end(&mut buf).await?;
    if read < n {
        return Err(Error::Transport(std::io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buf)
}

pub async fn read_u32s<R: AsyncRead + Unpin + ?Sized>(r: &mut R, n: usize) -> Result<Vec<u32>> {
    let raw = read_exact_vec(r, wire_len(n as u64, 4)?).await?;
    Ok(raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub async fn read_sizes<R: AsyncRead + Unpin + ?Sized>(r: &mut R, n: usize) -> Result<Vec<u64>> {
    let raw = read_exact_vec(r, wire_len(n as u64, 8)?).await?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            u64::from_le_bytes(b)
        })
        .collect())
}

pub async fn read_f32s<R: AsyncRead + Unpin + ?Sized>(r: &mut R, n: usize) -> Result<Vec<f32>> {
    let raw = read_exact_vec(r, wire_len(n as u64, 4)?).await?;
    Ok(raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// `u16` length then that many bytes
pub async fn read_bytes<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_u16(r).await?;
    read_exact_vec(r, len as usize).await
}

/// Inverse of [`WirePut::put_cstr`]; the terminating NUL is stripped
pub async fn read_cstr<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<String> {
    let mut raw = read_bytes(r).await?;
    if raw.last() == Some(&0) {
        raw.pop();
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Writes an encoded buffer in one go
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, buf: &[u8]) -> Result<()> {
    w.write_all(buf).await?;
    Ok(())
}

/// True when a read failed because the peer closed the stream
pub fn is_eof(err: &Error) -> bool {
    matches!(err, Error::Transport(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_layout_is_little_endian() {
        let mut buf = Vec::new();
        buf.put_u8(0xAB);
        buf.put_u16(0x0102);
        buf.put_u32(0x03040506);
        buf.put_size(7);
        buf.put_f32(1.0);

        assert_eq!(
            buf,
            vec![
                0xAB, 0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 7, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x00, 0x80, 0x3F
            ]
        );
    }

    #[tokio::test]
    async fn reads_back_scalars_and_vectors() {
        let mut buf = Vec::new();
        buf.put_u16(513);
        buf.put_u32s(&[1, 2, 3]);
        buf.put_sizes(&[u64::MAX]);
        buf.put_f32s(&[0.5, -2.0]);

        let mut r = buf.as_slice();
        assert_eq!(read_u16(&mut r).await.unwrap(), 513);
        assert_eq!(read_u32s(&mut r, 3).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(read_sizes(&mut r, 1).await.unwrap(), vec![u64::MAX]);
        assert_eq!(read_f32s(&mut r, 2).await.unwrap(), vec![0.5, -2.0]);
        assert!(r.is_empty());
    }

    #[tokio::test]
    async fn strings_carry_u16_length() {
        let mut buf = Vec::new();
        buf.put_bytes(b"volume.uvf").unwrap();
        buf.put_cstr("a").unwrap();
        assert_eq!(&buf[..2], &[10, 0]);
        assert_eq!(&buf[12..], &[2, 0, b'a', 0]);

        let mut r = buf.as_slice();
        assert_eq!(read_bytes(&mut r).await.unwrap(), b"volume.uvf");
        assert_eq!(read_cstr(&mut r).await.unwrap(), "a");
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut buf = Vec::new();
        let long = vec![b'x'; u16::MAX as usize + 1];
        assert!(buf.put_bytes(&long).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_counts_are_rejected() {
        assert_eq!(wire_len(3, 8).unwrap(), 24);
        let err = wire_len(u64::MAX, 4).unwrap_err();
        assert!(err.is_fatal());
        assert!(!is_eof(&err));
    }

    #[tokio::test]
    async fn huge_count_on_a_short_stream_is_eof() {
        let mut r: &[u8] = &[1, 2, 3];
        let err = read_sizes(&mut r, 1 << 40).await.unwrap_err();
        assert!(is_eof(&err));
    }

    #[tokio::test]
    async fn short_read_is_a_transport_error() {
        let mut r: &[u8] = &[5, 0, b'a', b'b'];
        let err = read_bytes(&mut r).await.unwrap_err();
        assert!(is_eof(&err));
        assert!(err.is_fatal());
    }
}
