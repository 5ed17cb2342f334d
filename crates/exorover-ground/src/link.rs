//! The ground-station connection and its registration handshake.

use exorover_types::RoverError;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

#[derive(Deserialize)]
struct Registration {
    #[serde(default)]
    name: String,
}

/// Line-oriented connection to the ground station.
///
/// Reader and writer are kept apart so the bridge can wait for the next
/// command and write outbound traffic from the same `select!` loop.
pub struct GroundLink<R, W> {
    pub(crate) lines: Lines<BufReader<R>>,
    pub(crate) writer: W,
}

impl GroundLink<OwnedReadHalf, OwnedWriteHalf> {
    pub async fn connect(addr: &str) -> Result<Self, RoverError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RoverError::Connection(format!("cannot reach ground station {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        info!(addr, "connected to ground station");
        Ok(Self::new(reader, writer))
    }
}

impl<R, W> GroundLink<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Announce ourselves with `{"CMD":"register"}` and read back the robot
    /// name the ground station assigns.
    ///
    /// # Errors
    ///
    /// [`RoverError::Protocol`] if the answer is missing, not JSON, or carries
    /// an empty name.
    pub async fn register(&mut self) -> Result<String, RoverError> {
        let request = json!({ "CMD": "register" }).to_string();
        self.send_line(&request).await?;

        let raw = self.next_line().await?.unwrap_or_default();
        let registration: Registration = serde_json::from_str(raw.trim())
            .map_err(|_| RoverError::protocol(r#"{"name": <robot name>}"#, raw.as_str()))?;
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(RoverError::protocol("a non-empty robot name", raw.as_str()));
        }
        info!(robot = name, "registered with ground station");
        Ok(name.to_string())
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), RoverError> {
        debug!(" gs -> {line}");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line from the ground station; `Ok(None)` at end of stream.
    pub async fn next_line(&mut self) -> Result<Option<String>, RoverError> {
        Ok(self.lines.next_line().await?)
    }
}
