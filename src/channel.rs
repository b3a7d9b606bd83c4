//! Seekable and sequential byte channels over the backend's range reader
//! and resumable writer.
//!
//! Neither type is safe for concurrent use by more than one caller at a
//! time — both hold `&mut` cursor state and are `!Sync` by construction.

use crate::backend::{SeekableReader, SequentialWriter};
use crate::error::{Error, Result};
use log::warn;

/// Wraps a range reader opened against an existing blob. `size` is fixed at
/// open time. `write`/`truncate` are unsupported.
pub struct ReadableByteChannel {
    reader: Box<dyn SeekableReader>,
    size: u64,
}

impl ReadableByteChannel {
    pub(crate) fn new(reader: Box<dyn SeekableReader>, size: u64) -> Self {
        Self { reader, size }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await
    }

    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    pub async fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(pos).await
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Unsupported("write on a readable channel"))
    }

    pub fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(Error::Unsupported("truncate on a readable channel"))
    }

    /// Releasing the reader handle is synchronous — dropping this value is
    /// enough, `close` is just the explicit spelling of it.
    pub fn close(self) {}
}

/// Wraps a resumable writer. Creation is atomic on `close`: the object is
/// not visible to readers until then. `read`/`seek`/`truncate` are
/// unsupported; only sequential appends are — there is no random-access
/// write support.
pub struct WritableByteChannel {
    writer: Box<dyn SequentialWriter>,
    closed: bool,
}

impl WritableByteChannel {
    pub(crate) fn new(writer: Box<dyn SequentialWriter>) -> Self {
        Self { writer, closed: false }
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::illegal_argument("write after close"));
        }
        self.writer.write(buf).await
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.writer.position()
    }

    pub fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Unsupported("read on a writable channel"))
    }

    pub fn seek(&mut self, _pos: u64) -> Result<()> {
        Err(Error::Unsupported("seek on a writable channel"))
    }

    pub fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(Error::Unsupported("truncate on a writable channel"))
    }

    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.writer.close().await
    }
}

impl Drop for WritableByteChannel {
    fn drop(&mut self) {
        if !self.closed {
            warn!("writable channel dropped without an explicit close; upload was not finalized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedReader {
        data: Vec<u8>,
        position: u64,
    }

    #[async_trait]
    impl crate::backend::SeekableReader for FixedReader {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let start = self.position as usize;
            let n = buf.len().min(self.data.len().saturating_sub(start));
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            self.position += n as u64;
            Ok(n)
        }
        fn position(&self) -> u64 {
            self.position
        }
        async fn seek(&mut self, pos: u64) -> Result<()> {
            self.position = pos;
            Ok(())
        }
        fn size(&self) -> u64 {
            self.data.len() as u64
        }
    }

    struct BufferingWriter {
        buffer: Vec<u8>,
    }

    #[async_trait]
    impl crate::backend::SequentialWriter for BufferingWriter {
        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.buffer.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn position(&self) -> u64 {
            self.buffer.len() as u64
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn readable_channel_rejects_write_and_truncate() {
        let reader = Box::new(FixedReader { data: b"abc".to_vec(), position: 0 });
        let mut channel = ReadableByteChannel::new(reader, 3);
        assert!(matches!(channel.write(b"x"), Err(Error::Unsupported(_))));
        assert!(matches!(channel.truncate(0), Err(Error::Unsupported(_))));
        assert_eq!(channel.size(), 3);
    }

    #[tokio::test]
    async fn readable_channel_seeks_forward_and_backward() {
        let reader = Box::new(FixedReader { data: b"abcdef".to_vec(), position: 0 });
        let mut channel = ReadableByteChannel::new(reader, 6);
        channel.seek(4).await.unwrap();
        let mut buf = [0u8; 2];
        channel.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ef");
        channel.seek(0).await.unwrap();
        assert_eq!(channel.position(), 0);
    }

    #[test]
    fn writable_channel_rejects_read_seek_and_truncate() {
        let writer = Box::new(BufferingWriter { buffer: Vec::new() });
        let mut channel = WritableByteChannel::new(writer);
        let mut buf = [0u8; 1];
        assert!(matches!(channel.read(&mut buf), Err(Error::Unsupported(_))));
        assert!(matches!(channel.seek(0), Err(Error::Unsupported(_))));
        assert!(matches!(channel.truncate(0), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn writable_channel_size_tracks_bytes_written_so_far() {
        let writer = Box::new(BufferingWriter { buffer: Vec::new() });
        let mut channel = WritableByteChannel::new(writer);
        channel.write(b"hello").await.unwrap();
        assert_eq!(channel.size(), 5);
        channel.close().await.unwrap();
    }
}
