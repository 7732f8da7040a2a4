//! Frame Dispatcher
//!
//! Turns one inbound frame from one session into state changes and outbound
//! frames. The multiplexer lends the session table and match registry for the
//! duration of a single call, so every operation runs to completion before the
//! next event is looked at.
//!
//! Packet legality per state:
//!
//! ```text
//! Unauthenticated : Authenticate
//! Idle            : ListMatches, CreateMatch, JoinMatch
//! InLobby         : Quit
//! InMatch         : GameOver
//! ```
//!
//! Anything else (including unknown packet types) is a [`ProtocolViolation`]
//! and the session is disconnected. A legal packet with a malformed payload is
//! dropped with a `Malformed` failure reply and the session stays as it was.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::lobby::outcome::OutcomeResolver;
use crate::lobby::registry::{MatchId, MatchRegistry, MatchResult};
use crate::lobby::session::{SessionError, SessionId, SessionState, SessionTable, Username};
use crate::network::auth::Authenticator;
use crate::network::protocol::{
    Credentials, InboundFrame, OutboundFrame, PacketType, ParseError, Request, Status,
    MAX_MESSAGE_LEN,
};

/// Reply to a successful login.
pub const MSG_AUTH_OK: &str = "Connection successful";
/// Reply to rejected credentials.
pub const MSG_AUTH_FAILED: &str = "Connection failed";
/// Reply when the identity is bound to another live session.
pub const MSG_ALREADY_LOGGED_IN: &str = "AlreadyLoggedIn";
/// Reply to a legal packet whose payload failed to decode.
pub const MSG_MALFORMED: &str = "Malformed";

/// A frame addressed to a session, possibly not the one that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    /// Recipient.
    pub target: SessionId,
    /// Frame to write.
    pub frame: OutboundFrame,
}

impl OutboundEvent {
    /// Address `frame` to `target`.
    pub fn new(target: SessionId, frame: OutboundFrame) -> Self {
        Self { target, frame }
    }
}

/// Packet that must end the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Packet type byte names no known packet.
    #[error("unknown packet type {0}")]
    UnknownPacket(u8),

    /// Known packet sent in a state that does not accept it.
    #[error("{packet:?} is not allowed while {state}")]
    IllegalInState {
        /// Offending packet.
        packet: PacketType,
        /// Session state at the time.
        state: &'static str,
    },
}

/// Result of dispatching one frame.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Frames to deliver, in order.
    pub events: Vec<OutboundEvent>,
    /// Set when the sender must be disconnected.
    pub violation: Option<ProtocolViolation>,
}

impl Dispatch {
    fn reply(target: SessionId, frame: OutboundFrame) -> Self {
        Self {
            events: vec![OutboundEvent::new(target, frame)],
            violation: None,
        }
    }

    fn from_events(events: Vec<OutboundEvent>) -> Self {
        Self {
            events,
            violation: None,
        }
    }

    fn violation(violation: ProtocolViolation) -> Self {
        Self {
            events: Vec::new(),
            violation: Some(violation),
        }
    }

    /// Whether the sender must be disconnected.
    pub fn should_disconnect(&self) -> bool {
        self.violation.is_some()
    }
}

/// Whether `packet` is accepted in `state`.
pub fn is_legal(state: SessionState, packet: PacketType) -> bool {
    use PacketType::*;
    match state {
        SessionState::Unauthenticated => matches!(packet, Authenticate),
        SessionState::Idle => matches!(packet, ListMatches | CreateMatch | JoinMatch),
        SessionState::InLobby(_) => matches!(packet, Quit),
        SessionState::InMatch(_) => matches!(packet, GameOver),
    }
}

/// Stateless router from frames to lobby operations.
pub struct Dispatcher<A, R> {
    authenticator: A,
    resolver: R,
}

impl<A: Authenticator, R: OutcomeResolver> Dispatcher<A, R> {
    /// Create a dispatcher with injected collaborators.
    pub fn new(authenticator: A, resolver: R) -> Self {
        Self {
            authenticator,
            resolver,
        }
    }

    /// Process the bytes of one read from session `from`.
    pub fn dispatch(
        &mut self,
        sessions: &mut SessionTable,
        registry: &mut MatchRegistry,
        from: SessionId,
        bytes: &[u8],
    ) -> Dispatch {
        let Some(state) = sessions.get(from).map(|s| s.state()) else {
            debug!("Dropping frame for closed {}", from);
            return Dispatch::default();
        };

        let frame = match InboundFrame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Undecodable frame from {}: {}", from, e);
                return Dispatch::reply(from, OutboundFrame::failure(MSG_MALFORMED));
            }
        };

        let Some(packet) = PacketType::from_byte(frame.packet_type) else {
            return Dispatch::violation(ProtocolViolation::UnknownPacket(frame.packet_type));
        };
        if !is_legal(state, packet) {
            return Dispatch::violation(ProtocolViolation::IllegalInState {
                packet,
                state: state.name(),
            });
        }

        let request = match Request::parse(&frame) {
            Ok(request) => request,
            Err(ParseError::UnknownPacket(byte)) => {
                return Dispatch::violation(ProtocolViolation::UnknownPacket(byte));
            }
            Err(e) => {
                debug!("Malformed payload from {}: {}", from, e);
                return Dispatch::reply(from, OutboundFrame::failure(MSG_MALFORMED));
            }
        };

        match (request, state) {
            (Request::Authenticate(credentials), _) => {
                self.handle_auth(sessions, from, credentials)
            }
            (Request::ListMatches, _) => Self::handle_list(registry, from),
            (Request::CreateMatch, _) => Self::handle_create(sessions, registry, from),
            (Request::JoinMatch(id), _) => Self::handle_join(sessions, registry, from, id),
            (Request::Quit, SessionState::InLobby(id)) => {
                Self::handle_quit(sessions, registry, from, id)
            }
            (Request::GameOver, SessionState::InMatch(id)) => {
                self.handle_game_over(sessions, registry, from, id)
            }
            (request, state) => Dispatch::violation(ProtocolViolation::IllegalInState {
                packet: request.packet_type(),
                state: state.name(),
            }),
        }
    }

    /// Tear down a closed session: withdraw its hosted match, or forfeit its
    /// active match to the opponent. Returns notifications for other sessions.
    pub fn disconnect(
        &mut self,
        sessions: &mut SessionTable,
        registry: &mut MatchRegistry,
        id: SessionId,
    ) -> Vec<OutboundEvent> {
        let Some(mut session) = sessions.close(id) else {
            return Vec::new();
        };

        match session.state() {
            SessionState::InLobby(match_id) => {
                match registry.abandon(match_id) {
                    Ok(_) => info!("Match {} abandoned: host {} disconnected", match_id, id),
                    Err(e) => warn!("Could not abandon match {} for {}: {}", match_id, id, e),
                }
                Vec::new()
            }
            SessionState::InMatch(match_id) => {
                let Some(leaver) = session.identity().cloned() else {
                    return Vec::new();
                };
                let side = registry.get(match_id).and_then(|m| m.side_of(&leaver));
                let Some(side) = side else {
                    error!("{} was in match {} but is not seated in it", id, match_id);
                    return Vec::new();
                };

                match registry.resolve(match_id, side.opponent()) {
                    Ok(result) => {
                        // Forced loss for the leaver; their record goes with the session
                        match session.finish_match(false) {
                            Ok(_) => info!(
                                "Match {} forfeited by {} ({}), final score {}",
                                match_id,
                                leaver,
                                id,
                                session.stats().score
                            ),
                            Err(e) => error!("{} could not forfeit match {}: {}", id, match_id, e),
                        }
                        settle(sessions, &result, None, &format!("{} disconnected", leaver))
                    }
                    Err(e) => {
                        error!("Could not resolve match {} after {} left: {}", match_id, id, e);
                        Vec::new()
                    }
                }
            }
            SessionState::Unauthenticated | SessionState::Idle => Vec::new(),
        }
    }

    fn handle_auth(
        &mut self,
        sessions: &mut SessionTable,
        from: SessionId,
        credentials: Credentials,
    ) -> Dispatch {
        let Credentials { username, password } = credentials;

        if !self.authenticator.verify(&username, &password) {
            warn!("Authentication failed for {} as {}", from, username);
            return Dispatch::reply(from, OutboundFrame::failure(MSG_AUTH_FAILED));
        }

        match sessions.bind_identity(from, username.clone()) {
            Ok(()) => {
                info!("{} authenticated as {}", from, username);
                Dispatch::reply(from, OutboundFrame::success(MSG_AUTH_OK))
            }
            Err(SessionError::IdentityInUse(name)) => {
                warn!("{} tried to log in as {}, already bound to another session", from, name);
                Dispatch::reply(from, OutboundFrame::failure(MSG_ALREADY_LOGGED_IN))
            }
            Err(e) => internal_failure(from, e),
        }
    }

    fn handle_list(registry: &MatchRegistry, from: SessionId) -> Dispatch {
        let open = registry.list();
        let mut listing = String::new();
        let mut shown = 0;

        // Whole entries only; a cut line would name the wrong host
        for (id, host) in &open {
            let entry = format!("{}:{}", id, host);
            let separator = usize::from(!listing.is_empty());
            if listing.len() + separator + entry.len() > MAX_MESSAGE_LEN {
                break;
            }
            if separator == 1 {
                listing.push('\n');
            }
            listing.push_str(&entry);
            shown += 1;
        }

        if shown < open.len() {
            debug!("Listing for {} shows {} of {} open matches", from, shown, open.len());
        }
        Dispatch::reply(from, OutboundFrame::success(&listing))
    }

    fn handle_create(
        sessions: &mut SessionTable,
        registry: &mut MatchRegistry,
        from: SessionId,
    ) -> Dispatch {
        let Some(host) = identity_of(sessions, from) else {
            return internal_failure(from, SessionError::UnknownSession(from));
        };

        let match_id = match registry.create(host.clone()) {
            Ok(id) => id,
            Err(e) => {
                debug!("{} could not create a match: {}", host, e);
                return Dispatch::reply(from, OutboundFrame::failure(e.code()));
            }
        };

        if let Some(Err(e)) = sessions.get_mut(from).map(|s| s.host(match_id)) {
            let _ = registry.abandon(match_id);
            return internal_failure(from, e);
        }

        info!("Match {} created by {}", match_id, host);
        Dispatch::reply(from, OutboundFrame::success(&format!("Match {} created", match_id)))
    }

    fn handle_join(
        sessions: &mut SessionTable,
        registry: &mut MatchRegistry,
        from: SessionId,
        match_id: MatchId,
    ) -> Dispatch {
        let Some(guest) = identity_of(sessions, from) else {
            return internal_failure(from, SessionError::UnknownSession(from));
        };
        let host_session = registry
            .get(match_id)
            .and_then(|m| sessions.session_of(&m.host));

        let host = match registry.join(match_id, guest.clone()) {
            Ok(host) => host,
            Err(e) => {
                debug!("{} could not join match {}: {}", guest, match_id, e);
                return Dispatch::reply(from, OutboundFrame::failure(e.code()));
            }
        };

        let mut events = Vec::with_capacity(2);
        for id in std::iter::once(from).chain(host_session) {
            if let Some(Err(e)) = sessions.get_mut(id).map(|s| s.enter_match(match_id)) {
                error!("{} could not enter match {}: {}", id, match_id, e);
            }
        }
        match host_session {
            Some(host_id) => events.push(OutboundEvent::new(
                host_id,
                OutboundFrame::new(
                    Status::OpponentJoined,
                    &format!("{} joined match {}", guest, match_id),
                ),
            )),
            None => error!("Host {} of match {} has no live session", host, match_id),
        }
        events.push(OutboundEvent::new(
            from,
            OutboundFrame::success(&format!("Joined match {} against {}", match_id, host)),
        ));

        info!("Match {} active: {} vs {}", match_id, host, guest);
        Dispatch::from_events(events)
    }

    fn handle_quit(
        sessions: &mut SessionTable,
        registry: &mut MatchRegistry,
        from: SessionId,
        match_id: MatchId,
    ) -> Dispatch {
        if let Err(e) = registry.abandon(match_id) {
            debug!("{} could not withdraw match {}: {}", from, match_id, e);
            return Dispatch::reply(from, OutboundFrame::failure(e.code()));
        }
        if let Some(Err(e)) = sessions.get_mut(from).map(|s| s.leave_lobby()) {
            return internal_failure(from, e);
        }

        info!("Match {} withdrawn by {}", match_id, from);
        Dispatch::reply(from, OutboundFrame::success(&format!("Match {} closed", match_id)))
    }

    fn handle_game_over(
        &mut self,
        sessions: &mut SessionTable,
        registry: &mut MatchRegistry,
        from: SessionId,
        match_id: MatchId,
    ) -> Dispatch {
        let players = registry
            .get(match_id)
            .and_then(|m| Some((m.host.clone(), m.guest.clone()?)));
        let Some((host, guest)) = players else {
            return Dispatch::reply(from, OutboundFrame::failure("NotFound"));
        };

        let winner = self.resolver.resolve(&host, &guest);
        let result = match registry.resolve(match_id, winner) {
            Ok(result) => result,
            Err(e) => return Dispatch::reply(from, OutboundFrame::failure(e.code())),
        };

        info!("Match {} over: {} beat {}", match_id, result.winner, result.loser);
        Dispatch::from_events(settle(sessions, &result, Some(from), "game over"))
    }
}

/// Apply a decided match to whichever participants are still connected and
/// build their notifications. `reporter` gets a Success reply; everyone else
/// gets an unsolicited MatchOutcome.
fn settle(
    sessions: &mut SessionTable,
    result: &MatchResult,
    reporter: Option<SessionId>,
    reason: &str,
) -> Vec<OutboundEvent> {
    let match_id = result.record.id;
    let mut events = Vec::with_capacity(2);

    for (name, won) in [(&result.winner, true), (&result.loser, false)] {
        let Some(id) = sessions.session_of(name) else {
            continue;
        };
        let Some(session) = sessions.get_mut(id) else {
            continue;
        };
        if let Err(e) = session.finish_match(won) {
            error!("{} could not leave match {}: {}", id, match_id, e);
            continue;
        }

        let score = session.stats().score;
        let message = if won {
            format!("Match {} ({}): you beat {}, score {}", match_id, reason, result.loser, score)
        } else {
            format!("Match {} ({}): {} beat you, score {}", match_id, reason, result.winner, score)
        };
        let status = if Some(id) == reporter {
            Status::Success
        } else {
            Status::MatchOutcome
        };
        events.push(OutboundEvent::new(id, OutboundFrame::new(status, &message)));
    }

    events
}

fn identity_of(sessions: &SessionTable, id: SessionId) -> Option<Username> {
    sessions.get(id).and_then(|s| s.identity().cloned())
}

fn internal_failure(from: SessionId, err: SessionError) -> Dispatch {
    error!("Inconsistent session state for {}: {}", from, err);
    Dispatch::reply(from, OutboundFrame::failure("InvalidState"))
}

// =============================================================================
// TESTS
// =============================================================================
