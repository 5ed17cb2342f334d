//! Line-oriented transport.
//!
//! The planet and the ground station both speak newline-delimited text over a
//! reliable, ordered byte stream.  [`LineTransport`] is the seam the protocol
//! client is written against; [`StreamTransport`] implements it over any tokio
//! stream so production uses TCP and tests use an in-memory duplex.

use async_trait::async_trait;
use exorover_types::RoverError;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;

/// A bidirectional stream of text lines.
#[async_trait]
pub trait LineTransport: Send {
    /// Write `line` followed by `\n` and flush.
    async fn send_line(&mut self, line: &str) -> Result<(), RoverError>;

    /// Read the next line without its terminator.  `Ok(None)` means the peer
    /// closed the stream.
    async fn recv_line(&mut self) -> Result<Option<String>, RoverError>;
}

/// [`LineTransport`] over a tokio byte stream.
pub struct StreamTransport<S> {
    lines: Lines<BufReader<ReadHalf<S>>>,
    writer: WriteHalf<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }
}

impl StreamTransport<TcpStream> {
    /// Open a TCP connection to `addr`.
    pub async fn connect(addr: &str) -> Result<Self, RoverError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RoverError::Connection(format!("cannot reach {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl<S> LineTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn send_line(&mut self, line: &str) -> Result<(), RoverError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv_line(&mut self) -> Result<Option<String>, RoverError> {
        Ok(self.lines.next_line().await?)
    }
}
