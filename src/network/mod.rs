//! Network Layer
//!
//! Wire protocol, authentication, frame dispatch and the TCP multiplexer.
//! Everything here talks bytes and sockets; lobby rules live in `lobby/`.

pub mod auth;
pub mod client;
pub mod dispatcher;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, Authenticator, CredentialStore};
pub use client::{ClientError, LobbyClient};
pub use dispatcher::{Dispatch, Dispatcher, OutboundEvent, ProtocolViolation};
pub use protocol::{
    DecodeError, InboundFrame, OutboundFrame, PacketType, ParseError, Request, Status,
};
pub use server::{ConfigError, LobbyServer, ServerConfig, ServerError, ShutdownHandle};
