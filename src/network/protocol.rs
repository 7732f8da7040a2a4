//! Protocol Messages
//!
//! Wire format for client-server communication over raw TCP.
//!
//! ```text
//! inbound  (client -> server): [packet_type:1][payload...]
//! outbound (server -> client): [status:1][message_len:1][message: message_len bytes]
//! ```
//!
//! Inbound frames are not length-prefixed as a whole: one physical read of up
//! to [`READ_BUFFER_SIZE`] bytes is one frame. The codec is purely structural.
//! Deciding whether a packet is legal for a session is the dispatcher's job.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::lobby::registry::MatchId;
use crate::lobby::session::Username;

/// Size of the buffer a single socket read fills.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Largest inbound frame accepted (one byte of the read buffer stays unused).
pub const MAX_FRAME_SIZE: usize = READ_BUFFER_SIZE - 1;

/// Fixed width of the username and password fields in an Authenticate payload.
pub const CREDENTIAL_FIELD_WIDTH: usize = 16;

/// Exact size of an Authenticate payload: two length bytes plus two fixed-width fields.
pub const AUTH_PAYLOAD_LEN: usize = 2 + 2 * CREDENTIAL_FIELD_WIDTH;

/// Size of a JoinMatch payload (big-endian match id).
pub const JOIN_PAYLOAD_LEN: usize = 4;

/// Largest outbound message, bounded by its one-byte length field.
pub const MAX_MESSAGE_LEN: usize = u8::MAX as usize;

// =============================================================================
// ERRORS
// =============================================================================

/// Structural decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A declared field needs more bytes than the frame holds.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required to finish the field.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// A frame or field is longer than its fixed maximum.
    #[error("oversize {what}: {len} bytes exceeds maximum {max}")]
    Oversize {
        /// What overflowed (frame, username, password, message).
        what: &'static str,
        /// Declared or actual length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The bytes are in bounds but do not form a valid value.
    #[error("malformed {0}")]
    Malformed(&'static str),
}

// =============================================================================
// CLIENT -> SERVER FRAMES
// =============================================================================

/// Known inbound packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Log in with username and password.
    Authenticate = 10,
    /// List matches awaiting an opponent.
    ListMatches = 21,
    /// Host a new match.
    CreateMatch = 23,
    /// Withdraw a hosted match that nobody joined.
    Quit = 31,
    /// Report that the current match is over.
    GameOver = 41,
    /// Join another player's match.
    JoinMatch = 42,
}

impl PacketType {
    /// Map a wire byte to a packet type.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            10 => Some(Self::Authenticate),
            21 => Some(Self::ListMatches),
            23 => Some(Self::CreateMatch),
            31 => Some(Self::Quit),
            41 => Some(Self::GameOver),
            42 => Some(Self::JoinMatch),
            _ => None,
        }
    }
}

/// One inbound frame as read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Raw packet type byte (may be unknown).
    pub packet_type: u8,
    /// Type-specific payload.
    pub payload: Vec<u8>,
}

impl InboundFrame {
    /// Decode a frame from the bytes of a single read.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(DecodeError::Oversize {
                what: "frame",
                len: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let (&packet_type, payload) = bytes.split_first().ok_or(DecodeError::Truncated {
            needed: 1,
            available: 0,
        })?;

        Ok(Self {
            packet_type,
            payload: payload.to_vec(),
        })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.packet_type);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Password as received on the wire, at most [`CREDENTIAL_FIELD_WIDTH`] bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Vec<u8>);

impl Password {
    /// Build a password, rejecting anything wider than the wire field.
    pub fn new(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() > CREDENTIAL_FIELD_WIDTH {
            return Err(DecodeError::Oversize {
                what: "password",
                len: bytes.len(),
                max: CREDENTIAL_FIELD_WIDTH,
            });
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Raw password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Parsed Authenticate payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Claimed identity.
    pub username: Username,
    /// Secret to verify.
    pub password: Password,
}

impl Credentials {
    /// Parse `[username_len:1][username:16][password_len:1][password:16]`.
    ///
    /// Every length byte is checked against the fixed field width before any
    /// byte is copied out, so a hostile length can never reach past its field.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < AUTH_PAYLOAD_LEN {
            return Err(DecodeError::Truncated {
                needed: AUTH_PAYLOAD_LEN,
                available: payload.len(),
            });
        }

        let (username_field, rest) = payload.split_at(1 + CREDENTIAL_FIELD_WIDTH);
        let username = bounded_field(username_field, "username")?;
        let password = bounded_field(&rest[..1 + CREDENTIAL_FIELD_WIDTH], "password")?;

        let username = std::str::from_utf8(username)
            .map_err(|_| DecodeError::Malformed("username is not valid UTF-8"))?;
        let username = Username::new(username)
            .ok_or(DecodeError::Malformed(
                "username must be 1-16 bytes without control characters",
            ))?;

        Ok(Self {
            username,
            password: Password::new(password)?,
        })
    }

    /// Encode to the fixed-width, zero-padded payload layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AUTH_PAYLOAD_LEN);
        push_padded(&mut out, self.username.as_str().as_bytes());
        push_padded(&mut out, self.password.as_bytes());
        out
    }
}

/// Slice a `[len:1][data:16]` field, bounding `len` by the field width.
fn bounded_field<'a>(field: &'a [u8], what: &'static str) -> Result<&'a [u8], DecodeError> {
    let declared = field[0] as usize;
    if declared > CREDENTIAL_FIELD_WIDTH {
        return Err(DecodeError::Oversize {
            what,
            len: declared,
            max: CREDENTIAL_FIELD_WIDTH,
        });
    }
    Ok(&field[1..1 + declared])
}

fn push_padded(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len().min(CREDENTIAL_FIELD_WIDTH);
    out.push(len as u8);
    out.extend_from_slice(&data[..len]);
    out.resize(out.len() + CREDENTIAL_FIELD_WIDTH - len, 0);
}

/// Semantic form of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Log in.
    Authenticate(Credentials),
    /// List open matches.
    ListMatches,
    /// Host a match.
    CreateMatch,
    /// Join the given match.
    JoinMatch(MatchId),
    /// Withdraw the hosted match.
    Quit,
    /// Report the current match finished.
    GameOver,
}

/// Outcome of interpreting an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The packet type byte names no known packet.
    #[error("unknown packet type {0}")]
    UnknownPacket(u8),

    /// A known packet carried a structurally invalid payload.
    #[error("{packet:?} payload: {source}")]
    Payload {
        /// Packet whose payload failed.
        packet: PacketType,
        /// Underlying decode failure.
        source: DecodeError,
    },
}

impl Request {
    /// Interpret a decoded frame. Trailing payload bytes are ignored.
    pub fn parse(frame: &InboundFrame) -> Result<Self, ParseError> {
        let packet = PacketType::from_byte(frame.packet_type)
            .ok_or(ParseError::UnknownPacket(frame.packet_type))?;

        let request = match packet {
            PacketType::Authenticate => Credentials::parse(&frame.payload)
                .map(Request::Authenticate)
                .map_err(|source| ParseError::Payload { packet, source })?,
            PacketType::ListMatches => Request::ListMatches,
            PacketType::CreateMatch => Request::CreateMatch,
            PacketType::Quit => Request::Quit,
            PacketType::GameOver => Request::GameOver,
            PacketType::JoinMatch => {
                let id: [u8; JOIN_PAYLOAD_LEN] = frame
                    .payload
                    .get(..JOIN_PAYLOAD_LEN)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or(ParseError::Payload {
                        packet,
                        source: DecodeError::Truncated {
                            needed: JOIN_PAYLOAD_LEN,
                            available: frame.payload.len(),
                        },
                    })?;
                Request::JoinMatch(MatchId::new(u32::from_be_bytes(id)))
            }
        };

        Ok(request)
    }

    /// Packet type this request travels as.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Request::Authenticate(_) => PacketType::Authenticate,
            Request::ListMatches => PacketType::ListMatches,
            Request::CreateMatch => PacketType::CreateMatch,
            Request::JoinMatch(_) => PacketType::JoinMatch,
            Request::Quit => PacketType::Quit,
            Request::GameOver => PacketType::GameOver,
        }
    }

    /// Build the frame for this request.
    pub fn to_frame(&self) -> InboundFrame {
        let payload = match self {
            Request::Authenticate(credentials) => credentials.encode(),
            Request::JoinMatch(id) => id.get().to_be_bytes().to_vec(),
            _ => Vec::new(),
        };
        InboundFrame {
            packet_type: self.packet_type() as u8,
            payload,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT FRAMES
// =============================================================================

/// Outbound status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Request succeeded.
    Success = 0,
    /// Request failed; message carries the reason code.
    Failure = 1,
    /// Unsolicited: someone joined the match you host.
    OpponentJoined = 2,
    /// Unsolicited: your match was decided by the other player or a disconnect.
    MatchOutcome = 3,
}

impl Status {
    /// Map a wire byte to a known status.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Success),
            1 => Some(Self::Failure),
            2 => Some(Self::OpponentJoined),
            3 => Some(Self::MatchOutcome),
            _ => None,
        }
    }
}

/// One outbound frame. The message never exceeds [`MAX_MESSAGE_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    status: u8,
    message: Vec<u8>,
}

impl OutboundFrame {
    /// Build a frame, truncating the message on a UTF-8 boundary if needed.
    pub fn new(status: Status, message: &str) -> Self {
        let mut end = message.len().min(MAX_MESSAGE_LEN);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            status: status as u8,
            message: message.as_bytes()[..end].to_vec(),
        }
    }

    /// Success frame.
    pub fn success(message: &str) -> Self {
        Self::new(Status::Success, message)
    }

    /// Failure frame.
    pub fn failure(message: &str) -> Self {
        Self::new(Status::Failure, message)
    }

    /// Build a frame from raw parts, rejecting an over-long message.
    pub fn from_parts(status: u8, message: Vec<u8>) -> Result<Self, DecodeError> {
        if message.len() > MAX_MESSAGE_LEN {
            return Err(DecodeError::Oversize {
                what: "message",
                len: message.len(),
                max: MAX_MESSAGE_LEN,
            });
        }
        Ok(Self { status, message })
    }

    /// Raw status byte.
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Status as a known code, if it is one.
    pub fn status_kind(&self) -> Option<Status> {
        Status::from_byte(self.status)
    }

    /// Message bytes.
    pub fn message_bytes(&self) -> &[u8] {
        &self.message
    }

    /// Message as text (lossy for non-UTF-8 bytes).
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    /// Bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        2 + self.message.len()
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.status);
        out.push(self.message.len() as u8);
        out.extend_from_slice(&self.message);
        out
    }

    /// Decode one frame from the front of `bytes`. Bytes past it are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let [status, len, rest @ ..] = bytes else {
            return Err(DecodeError::Truncated {
                needed: 2,
                available: bytes.len(),
            });
        };
        let len = *len as usize;
        let message = rest.get(..len).ok_or(DecodeError::Truncated {
            needed: 2 + len,
            available: bytes.len(),
        })?;

        Ok(Self {
            status: *status,
            message: message.to_vec(),
        })
    }
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_kind() {
            Some(kind) => write!(f, "[{:?}] {}", kind, self.message()),
            None => write!(f, "[status {}] {}", self.status, self.message()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn credentials(user: &str, pass: &[u8]) -> Credentials {
        Credentials {
            username: Username::new(user).unwrap(),
            password: Password::new(pass).unwrap(),
        }
    }

    fn auth_payload(ulen: u8, user: &[u8], plen: u8, pass: &[u8]) -> Vec<u8> {
        let mut payload = vec![ulen];
        payload.extend_from_slice(user);
        payload.resize(1 + CREDENTIAL_FIELD_WIDTH, 0);
        payload.push(plen);
        payload.extend_from_slice(pass);
        payload.resize(AUTH_PAYLOAD_LEN, 0);
        payload
    }

    #[test]
    fn test_decode_empty_read_is_truncated() {
        assert_eq!(
            InboundFrame::decode(&[]),
            Err(DecodeError::Truncated { needed: 1, available: 0 })
        );
    }

    #[test]
    fn test_decode_rejects_oversize_frame() {
        let bytes = vec![21u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            InboundFrame::decode(&bytes),
            Err(DecodeError::Oversize { what: "frame", .. })
        ));
        assert!(InboundFrame::decode(&bytes[..MAX_FRAME_SIZE]).is_ok());
    }

    #[test]
    fn test_credentials_parse() {
        let payload = auth_payload(5, b"marie", 6, b"secret");
        let parsed = Credentials::parse(&payload).unwrap();
        assert_eq!(parsed.username.as_str(), "marie");
        assert_eq!(parsed.password.as_bytes(), b"secret");
    }

    #[test]
    fn test_credentials_encode_is_fixed_width() {
        let encoded = credentials("bob", b"pw").encode();
        assert_eq!(encoded.len(), AUTH_PAYLOAD_LEN);
        assert_eq!(encoded[0], 3);
        assert_eq!(&encoded[1..4], b"bob");
        assert!(encoded[4..17].iter().all(|&b| b == 0));
        assert_eq!(encoded[17], 2);
        assert_eq!(&encoded[18..20], b"pw");
    }

    #[test]
    fn test_credentials_length_byte_bounded_by_field_width() {
        // A declared length of 200 must not read into the password field or beyond
        let payload = auth_payload(200, b"marie", 4, b"pass");
        assert_eq!(
            Credentials::parse(&payload),
            Err(DecodeError::Oversize { what: "username", len: 200, max: 16 })
        );

        let payload = auth_payload(5, b"marie", 17, b"pass");
        assert!(matches!(
            Credentials::parse(&payload),
            Err(DecodeError::Oversize { what: "password", len: 17, .. })
        ));
    }

    #[test]
    fn test_credentials_truncated_payload() {
        let payload = auth_payload(5, b"marie", 4, b"pass");
        assert_eq!(
            Credentials::parse(&payload[..20]),
            Err(DecodeError::Truncated { needed: AUTH_PAYLOAD_LEN, available: 20 })
        );
    }

    #[test]
    fn test_credentials_reject_empty_or_invalid_username() {
        let payload = auth_payload(0, b"", 4, b"pass");
        assert!(matches!(Credentials::parse(&payload), Err(DecodeError::Malformed(_))));

        let payload = auth_payload(2, &[0xff, 0xfe], 4, b"pass");
        assert!(matches!(Credentials::parse(&payload), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new(b"hunter2").unwrap();
        assert!(!format!("{:?}", password).contains("hunter2"));
    }

    #[test]
    fn test_request_parse_join() {
        let frame = InboundFrame { packet_type: 42, payload: vec![0, 0, 1, 2] };
        assert_eq!(Request::parse(&frame), Ok(Request::JoinMatch(MatchId::new(258))));
    }

    #[test]
    fn test_request_parse_join_truncated() {
        let frame = InboundFrame { packet_type: 42, payload: vec![0, 1] };
        assert!(matches!(
            Request::parse(&frame),
            Err(ParseError::Payload {
                packet: PacketType::JoinMatch,
                source: DecodeError::Truncated { needed: 4, available: 2 },
            })
        ));
    }

    #[test]
    fn test_request_parse_unknown_packet() {
        let frame = InboundFrame { packet_type: 1, payload: b"marie".to_vec() };
        assert_eq!(Request::parse(&frame), Err(ParseError::UnknownPacket(1)));
    }

    #[test]
    fn test_request_ignores_trailing_bytes() {
        let frame = InboundFrame { packet_type: 21, payload: b"\n".to_vec() };
        assert_eq!(Request::parse(&frame), Ok(Request::ListMatches));
    }

    #[test]
    fn test_request_frame_roundtrip() {
        let requests = vec![
            Request::Authenticate(credentials("marie", b"pw")),
            Request::ListMatches,
            Request::CreateMatch,
            Request::JoinMatch(MatchId::new(7)),
            Request::Quit,
            Request::GameOver,
        ];

        for request in requests {
            let bytes = request.to_frame().encode();
            let frame = InboundFrame::decode(&bytes).unwrap();
            assert_eq!(Request::parse(&frame).unwrap(), request);
        }
    }

    #[test]
    fn test_outbound_layout() {
        let frame = OutboundFrame::success("Connection successful");
        let bytes = frame.encode();
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1] as usize, "Connection successful".len());
        assert_eq!(&bytes[2..], b"Connection successful");
    }

    #[test]
    fn test_outbound_truncates_on_char_boundary() {
        let long = "é".repeat(200); // 400 bytes
        let frame = OutboundFrame::failure(&long);
        assert!(frame.message_bytes().len() <= MAX_MESSAGE_LEN);
        assert_eq!(frame.message_bytes().len() % 2, 0);
        assert!(std::str::from_utf8(frame.message_bytes()).is_ok());
    }

    #[test]
    fn test_outbound_decode_truncated() {
        assert!(matches!(OutboundFrame::decode(&[0]), Err(DecodeError::Truncated { .. })));
        assert_eq!(
            OutboundFrame::decode(&[1, 5, b'a', b'b']),
            Err(DecodeError::Truncated { needed: 7, available: 4 })
        );
    }

    #[test]
    fn test_outbound_from_parts_rejects_oversize() {
        assert!(OutboundFrame::from_parts(0, vec![b'x'; 256]).is_err());
        assert!(OutboundFrame::from_parts(0, vec![b'x'; 255]).is_ok());
    }

    proptest! {
        #[test]
        fn prop_inbound_roundtrip(
            packet_type: u8,
            payload in proptest::collection::vec(any::<u8>(), 0..MAX_FRAME_SIZE),
        ) {
            let frame = InboundFrame { packet_type, payload };
            prop_assert_eq!(InboundFrame::decode(&frame.encode()), Ok(frame));
        }

        #[test]
        fn prop_outbound_roundtrip(
            status: u8,
            message in proptest::collection::vec(any::<u8>(), 0..=MAX_MESSAGE_LEN),
        ) {
            let frame = OutboundFrame::from_parts(status, message).unwrap();
            let bytes = frame.encode();
            prop_assert_eq!(bytes.len(), frame.encoded_len());
            prop_assert_eq!(OutboundFrame::decode(&bytes), Ok(frame));
        }

        #[test]
        fn prop_credentials_roundtrip(
            user in "[a-z0-9]{1,16}",
            pass in proptest::collection::vec(any::<u8>(), 0..=16),
        ) {
            let creds = credentials(&user, &pass);
            prop_assert_eq!(Credentials::parse(&creds.encode()), Ok(creds));
        }

        #[test]
        fn prop_request_parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            if let Ok(frame) = InboundFrame::decode(&bytes) {
                let _ = Request::parse(&frame);
            }
        }
    }
}
