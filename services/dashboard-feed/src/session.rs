//! Session handshake state machine
//!
//! The backend opens every connection by sending a bare session-identity
//! token (a UUID, not JSON). Until that token arrives no subscription
//! traffic may be sent. The state is an explicit value threaded through the
//! frame handler, so ordering cases can be exercised without a socket.

use std::fmt;

use uuid::Uuid;

/// Handshake state for one connection lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    Unauthenticated,
    Authenticated { client_id: Uuid },
}

/// What a frame did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The frame was the identity token and the session just authenticated
    Authenticated(Uuid),
    /// A valid token arrived while already authenticated
    Ignored,
    /// The frame is not an identity token
    NotIdentity,
}

impl Session {
    /// Give the handshake first refusal on an inbound frame
    ///
    /// Identity parsing is attempted on every frame. The identity is set at
    /// most once per connection lifetime; later tokens, duplicate or not,
    /// leave the session untouched.
    pub fn accept(self, raw: &str) -> (Session, HandshakeOutcome) {
        let Some(token) = parse_identity(raw) else {
            return (self, HandshakeOutcome::NotIdentity);
        };

        match self {
            Session::Unauthenticated => (
                Session::Authenticated { client_id: token },
                HandshakeOutcome::Authenticated(token),
            ),
            Session::Authenticated { client_id } => {
                if client_id != token {
                    tracing::debug!(
                        "Ignoring new identity {} while authenticated as {}",
                        token,
                        client_id
                    );
                }
                (self, HandshakeOutcome::Ignored)
            }
        }
    }

    /// State after the transport reopened or closed
    pub fn reset(self) -> Session {
        Session::Unauthenticated
    }

    pub fn client_id(&self) -> Option<Uuid> {
        match self {
            Session::Unauthenticated => None,
            Session::Authenticated { client_id } => Some(*client_id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Session::Unauthenticated => write!(f, "Unauthenticated"),
            Session::Authenticated { client_id } => write!(f, "Authenticated({})", client_id),
        }
    }
}

/// Interpret a frame as a session-identity token
///
/// Accepts a bare hyphenated UUID, optionally surrounded by whitespace or
/// JSON quotes. The simple, braced and URN forms are not identities.
pub fn parse_identity(raw: &str) -> Option<Uuid> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    if unquoted.len() != HYPHENATED_LEN {
        return None;
    }
    Uuid::try_parse(unquoted).ok()
}

const HYPHENATED_LEN: usize = 36;
