//! Lobby Client
//!
//! Async helpers for talking to a lobby server: frame I/O over any tokio
//! stream, and [`LobbyClient`], a request/reply wrapper around a TCP
//! connection.
//!
//! Unsolicited frames (opponent joined, match outcome) arrive on the same
//! stream as replies, in the order the server produced them. Callers that
//! expect a notification must [`LobbyClient::recv`] it before issuing the
//! next request.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::lobby::registry::MatchId;
use crate::lobby::session::Username;
use crate::network::protocol::{Credentials, DecodeError, OutboundFrame, Password, Request, Status};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent bytes that do not form a frame.
    #[error("bad frame from server: {0}")]
    Decode(#[from] DecodeError),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// Username or password does not fit the wire format.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    /// The server answered with a failure status.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Read one outbound frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<OutboundFrame, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(ClientError::Closed),
        Err(e) => return Err(e.into()),
    }

    let [status, len] = header;
    let mut message = vec![0u8; len as usize];
    reader.read_exact(&mut message).await?;
    Ok(OutboundFrame::from_parts(status, message)?)
}

/// Write one request frame.
pub async fn write_request<W>(writer: &mut W, request: &Request) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&request.to_frame().encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Build an Authenticate request, checking field bounds locally.
pub fn login_request(username: &str, password: &str) -> Result<Request, ClientError> {
    let username = Username::new(username).ok_or(ClientError::InvalidCredentials(
        "username must be 1-16 bytes, no control characters",
    ))?;
    let password = Password::new(password.as_bytes())
        .map_err(|_| ClientError::InvalidCredentials("password must be at most 16 bytes"))?;
    Ok(Request::Authenticate(Credentials { username, password }))
}

/// Parse a ListMatches reply into `(id, host)` pairs. Unparseable lines are skipped.
pub fn parse_listing(message: &str) -> Vec<(MatchId, String)> {
    message
        .lines()
        .filter_map(|line| {
            let (id, host) = line.split_once(':')?;
            let id = id.trim().parse().ok()?;
            Some((MatchId::new(id), host.to_string()))
        })
        .collect()
}

/// Request/reply connection to a lobby server.
pub struct LobbyClient {
    stream: TcpStream,
}

impl LobbyClient {
    /// Connect to a server.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send a request without waiting for anything.
    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        write_request(&mut self.stream, request).await
    }

    /// Receive the next frame, reply or notification.
    pub async fn recv(&mut self) -> Result<OutboundFrame, ClientError> {
        read_frame(&mut self.stream).await
    }

    /// Send a request and return the next frame.
    pub async fn request(&mut self, request: &Request) -> Result<OutboundFrame, ClientError> {
        self.send(request).await?;
        self.recv().await
    }

    /// Log in. A rejected login is returned as a failure frame so the
    /// caller can retry.
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<OutboundFrame, ClientError> {
        let request = login_request(username, password)?;
        self.request(&request).await
    }

    /// Matches awaiting an opponent, ascending by id.
    pub async fn list_matches(&mut self) -> Result<Vec<(MatchId, String)>, ClientError> {
        let reply = expect_success(self.request(&Request::ListMatches).await?)?;
        Ok(parse_listing(&reply.message()))
    }

    /// Host a new match.
    pub async fn create_match(&mut self) -> Result<OutboundFrame, ClientError> {
        self.request(&Request::CreateMatch).await
    }

    /// Join an open match.
    pub async fn join_match(&mut self, id: MatchId) -> Result<OutboundFrame, ClientError> {
        self.request(&Request::JoinMatch(id)).await
    }

    /// Withdraw the hosted match.
    pub async fn quit(&mut self) -> Result<OutboundFrame, ClientError> {
        self.request(&Request::Quit).await
    }

    /// Report the current match over.
    pub async fn game_over(&mut self) -> Result<OutboundFrame, ClientError> {
        self.request(&Request::GameOver).await
    }

    /// Give up the underlying stream.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

fn expect_success(frame: OutboundFrame) -> Result<OutboundFrame, ClientError> {
    match frame.status_kind() {
        Some(Status::Success) => Ok(frame),
        _ => Err(ClientError::Rejected(frame.message().into_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_frames_from_stream() {
        let mut bytes = OutboundFrame::success("hello").encode();
        bytes.extend(OutboundFrame::new(Status::OpponentJoined, "bob joined match 1").encode());
        let mut reader = &bytes[..];

        let first = read_frame(&mut reader).await.unwrap();
        assert_eq!(first.message(), "hello");
        let second = read_frame(&mut reader).await.unwrap();
        assert_eq!(second.status_kind(), Some(Status::OpponentJoined));
        assert!(matches!(read_frame(&mut reader).await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_truncated_message_is_io_error() {
        let bytes = [0u8, 10, b'a', b'b'];
        let mut reader = &bytes[..];
        assert!(matches!(read_frame(&mut reader).await, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_write_request_bytes() {
        let mut out = Vec::new();
        write_request(&mut out, &Request::JoinMatch(MatchId::new(258))).await.unwrap();
        assert_eq!(out, vec![42, 0, 0, 1, 2]);
    }

    #[test]
    fn test_login_request_bounds() {
        assert!(login_request("marie", "marie").is_ok());
        assert!(matches!(
            login_request("", "pw"),
            Err(ClientError::InvalidCredentials(_))
        ));
        assert!(matches!(
            login_request("marie", "a-password-that-is-too-long"),
            Err(ClientError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_parse_listing() {
        let listing = parse_listing("1:alice\n3:bob");
        assert_eq!(
            listing,
            vec![(MatchId::new(1), "alice".to_string()), (MatchId::new(3), "bob".to_string())]
        );
        assert!(parse_listing("").is_empty());
        assert_eq!(parse_listing("garbage\n2:carol").len(), 1);
    }
}
