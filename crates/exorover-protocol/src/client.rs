//! Strict request/response client for the planet connection.

use exorover_types::RoverError;
use tracing::debug;

use crate::codec::{PlanetCommand, PlanetResponse};
use crate::transport::LineTransport;

/// A decoded response together with the line it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub response: PlanetResponse,
    pub raw: String,
}

/// Sends one command at a time and waits for exactly one response line.
///
/// `send` takes `&mut self`, so a single client can never have two commands
/// in flight.  The client holds no rover state; interpreting the reply is the
/// caller's job.
pub struct ProtocolClient {
    transport: Box<dyn LineTransport>,
}

impl ProtocolClient {
    pub fn new(transport: impl LineTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Send `command` and decode the matching response.
    ///
    /// # Errors
    ///
    /// - [`RoverError::Connection`] if the transport fails.
    /// - [`RoverError::Protocol`] if the planet closes the stream, answers with
    ///   an empty line, or answers with a tag `command` does not expect.
    /// - [`RoverError::InvalidState`] for `exit`, which is never answered; use
    ///   [`ProtocolClient::exit`].
    pub async fn send(&mut self, command: &PlanetCommand) -> Result<Reply, RoverError> {
        let expected = command.expected_tags();
        if expected.is_empty() {
            return Err(RoverError::InvalidState(format!(
                "`{}` has no response; use ProtocolClient::exit",
                command.tag()
            )));
        }

        let line = command.encode()?;
        debug!(cmd = command.tag(), " -> {line}");
        self.transport.send_line(&line).await?;

        let raw = self.transport.recv_line().await?.unwrap_or_default();
        debug!(cmd = command.tag(), " <- {raw}");
        let response = PlanetResponse::decode(&raw, expected)?;
        Ok(Reply { response, raw })
    }

    /// Send `exit` without waiting for an answer.
    pub async fn exit(&mut self) -> Result<(), RoverError> {
        let line = PlanetCommand::Exit.encode()?;
        debug!(cmd = "exit", " -> {line}");
        self.transport.send_line(&line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use exorover_types::{Cell, Heading, Turn};

    use crate::codec::Position;

    /// Client wired to a scripted peer that answers each request with the
    /// next canned line and records what it received.
    fn scripted(replies: Vec<&'static str>) -> (ProtocolClient, tokio::task::JoinHandle<Vec<String>>) {
        let (client_end, peer_end) = tokio::io::duplex(1024);
        let handle = tokio::spawn(async move {
            let mut peer = StreamTransport::new(peer_end);
            let mut received = Vec::new();
            let mut replies = replies.into_iter();
            while let Ok(Some(line)) = peer.recv_line().await {
                received.push(line);
                match replies.next() {
                    Some(reply) => {
                        if peer.send_line(reply).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            received
        });
        (ProtocolClient::new(StreamTransport::new(client_end)), handle)
    }

    #[tokio::test]
    async fn land_request_and_landed_response() {
        let (mut client, peer) =
            scripted(vec![r#"{"CMD":"landed","MEASURE":{"GROUND":"SAND","TEMP":-3.0}}"#]);
        let command = PlanetCommand::Land {
            position: Position::new(Cell::new(3, 4), Heading::East),
        };
        let reply = client.send(&command).await.unwrap();
        assert_eq!(reply.response.tag(), "landed");
        assert!(reply.raw.contains("SAND"));

        drop(client);
        let received = peer.await.unwrap();
        assert_eq!(
            received,
            vec![r#"{"CMD":"land","POSITION":{"X":3,"Y":4,"DIRECTION":"EAST"}}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn move_accepts_crashed() {
        let (mut client, _peer) = scripted(vec![r#"{"CMD":"crashed"}"#]);
        let reply = client.send(&PlanetCommand::Move).await.unwrap();
        assert_eq!(reply.response, PlanetResponse::Crashed);
    }

    #[tokio::test]
    async fn unexpected_tag_is_protocol_error() {
        let (mut client, _peer) = scripted(vec![r#"{"CMD":"rotated","DIRECTION":"EAST"}"#]);
        let err = client.send(&PlanetCommand::Move).await.unwrap_err();
        assert!(matches!(err, RoverError::Protocol { ref raw, .. } if raw.contains("rotated")));
    }

    #[tokio::test]
    async fn closed_stream_is_protocol_error() {
        let (mut client, _peer) = scripted(vec![]);
        let err = client
            .send(&PlanetCommand::Rotate {
                rotation: Turn::Right,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RoverError::Protocol { .. }));
    }

    #[tokio::test]
    async fn exit_goes_through_exit_only() {
        let (mut client, peer) = scripted(vec![]);
        assert!(matches!(
            client.send(&PlanetCommand::Exit).await,
            Err(RoverError::InvalidState(_))
        ));
        client.exit().await.unwrap();
        drop(client);
        assert_eq!(peer.await.unwrap(), vec![r#"{"CMD":"exit"}"#.to_string()]);
    }
}
