//! Byte-level framed I/O over a single TCP connection.
//!
//! The stream keeps a small internal read buffer so `read_exact` and
//! `read_zero_terminated_ascii` can draw buffered bytes before touching
//! the socket. After the handshake the stream splits into a buffered
//! read half for the read loop and a write half for the serialization
//! lane; unconsumed buffered bytes travel with the read half.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{DriverError, DriverResult};

/// Default server port.
pub const DEFAULT_PORT: u16 = 28015;

const READ_CHUNK: usize = 4096;

struct Buffered<S> {
    io: S,
    buf: Vec<u8>,
}

impl<S: AsyncRead + Unpin> Buffered<S> {
    fn new(io: S) -> Self {
        Self {
            io,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Pull one chunk off the socket into the buffer. EOF is an error:
    /// callers only read when they expect more protocol data.
    async fn fill(&mut self) -> DriverResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let got = self
            .io
            .read(&mut chunk)
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        if got == 0 {
            return Err(DriverError::Io("connection closed by peer".to_string()));
        }
        self.buf.extend_from_slice(&chunk[..got]);
        Ok(())
    }

    /// Return exactly `n` bytes; everything that arrived beyond them
    /// stays in the buffer for the next call.
    async fn read_exact(&mut self, n: usize) -> DriverResult<Vec<u8>> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        let rest = self.buf.split_off(n);
        Ok(std::mem::replace(&mut self.buf, rest))
    }

    /// Read up to and including the next 0x00 byte, looping across
    /// socket reads until the terminator shows up. Returns the prefix
    /// without the terminator, decoded as ASCII.
    async fn read_zero_terminated_ascii(&mut self) -> DriverResult<String> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == 0) {
                let rest = self.buf.split_off(scanned + pos + 1);
                let mut msg = std::mem::replace(&mut self.buf, rest);
                msg.pop();
                return String::from_utf8(msg).map_err(|_| {
                    DriverError::Protocol("handshake reply is not valid ASCII".to_string())
                });
            }
            scanned = self.buf.len();
            self.fill().await?;
        }
    }
}

impl<S: AsyncWrite + Unpin> Buffered<S> {
    async fn write(&mut self, bytes: &[u8]) -> DriverResult<()> {
        self.io
            .write_all(bytes)
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        self.io
            .flush()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))
    }
}

/// Framed I/O over one TCP socket; the handshake runs on this before the
/// connection splits it.
pub struct ByteStream {
    inner: Buffered<TcpStream>,
    closed: bool,
}

impl ByteStream {
    pub async fn connect(host: &str, port: u16) -> DriverResult<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| DriverError::Connect(format!("{host}:{port}: {e}")))?;
        debug!(host, port, "tcp connected");
        Ok(Self {
            inner: Buffered::new(stream),
            closed: false,
        })
    }

    /// Write all of `bytes` or fail; the socket is flushed before
    /// returning so the frame is fully handed to the OS.
    pub async fn write(&mut self, bytes: &[u8]) -> DriverResult<()> {
        self.inner.write(bytes).await
    }

    pub async fn read_exact(&mut self, n: usize) -> DriverResult<Vec<u8>> {
        self.inner.read_exact(n).await
    }

    pub async fn read_zero_terminated_ascii(&mut self) -> DriverResult<String> {
        self.inner.read_zero_terminated_ascii().await
    }

    /// Shut the socket down; safe to call more than once.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.inner.io.shutdown().await;
        }
    }

    /// Split into a buffered read half and a write half. Bytes already
    /// buffered stay with the reader.
    pub fn into_split(self) -> (ReadStream, WriteStream) {
        let (read, write) = self.inner.io.into_split();
        (
            ReadStream {
                inner: Buffered {
                    io: read,
                    buf: self.inner.buf,
                },
            },
            WriteStream { io: write },
        )
    }
}

/// Buffered read half, owned by the read loop.
pub struct ReadStream {
    inner: Buffered<OwnedReadHalf>,
}

impl ReadStream {
    pub async fn read_exact(&mut self, n: usize) -> DriverResult<Vec<u8>> {
        self.inner.read_exact(n).await
    }
}

/// Write half, owned by the serialization lane.
#[derive(Debug)]
pub struct WriteStream {
    io: OwnedWriteHalf,
}

impl WriteStream {
    pub async fn write(&mut self, bytes: &[u8]) -> DriverResult<()> {
        self.io
            .write_all(bytes)
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        self.io
            .flush()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    pub async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_exact_buffers_extras() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = Buffered::new(server);

        client.write_all(b"abcdefghij").await.unwrap();
        assert_eq!(reader.read_exact(4).await.unwrap(), b"abcd");
        // The remaining six bytes must be served from the buffer.
        assert_eq!(reader.buf, b"efghij");
        assert_eq!(reader.read_exact(6).await.unwrap(), b"efghij");
        assert!(reader.buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_exact_spans_multiple_writes() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = Buffered::new(server);

        let task = tokio::spawn(async move { reader.read_exact(8).await });
        client.write_all(b"1234").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"5678").await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), b"12345678");
    }

    #[tokio::test]
    async fn test_zero_terminated_spans_reads() {
        let (mut client, server) = tokio::io::duplex(8);
        let mut reader = Buffered::new(server);

        let task =
            tokio::spawn(async move { (reader.read_zero_terminated_ascii().await, reader) });
        // Terminator arrives in a later chunk than the prefix.
        client.write_all(b"SUCC").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"ESS\0tail").await.unwrap();

        let (msg, reader) = task.await.unwrap();
        assert_eq!(msg.unwrap(), "SUCCESS");
        assert_eq!(reader.buf, b"tail");
    }

    #[tokio::test]
    async fn test_eof_is_an_io_error() {
        let (client, server) = tokio::io::duplex(8);
        drop(client);
        let mut reader = Buffered::new(server);
        let err = reader.read_exact(1).await.unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));
    }
}
