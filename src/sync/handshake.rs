//! Link handshake state machine.
//!
//! Takes a raw connection from unauthenticated to registered:
//!
//! ```text
//! PASS <password> TS 6 :<sid>
//! CAPAB :<tokens>
//! SERVER <name> 1 :<description>
//! ```
//!
//! validated against the configured link blocks. The machine owns no I/O;
//! the transport feeds it frames and writes back whatever it returns.
//! Once complete, the engine registers the peer and sends its burst.

use std::collections::HashSet;

use meshirc_proto::{Message, Sid};
use thiserror::Error;

use crate::config::Config;

/// Capability tokens we advertise ourselves.
pub const LOCAL_CAPS: &str = "EUID KLN UNKLN BAN CLUSTER ENCAP";

/// Handshake progression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing received yet.
    Start,
    /// PASS seen; waiting for CAPAB/SERVER.
    Authenticating,
    /// Registered; the engine takes over.
    Done,
}

/// Terminal handshake failures; the transport closes the socket with the
/// rendered reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("unexpected {0} during handshake")]
    UnexpectedCommand(String),
    #[error("no link block for server {0}")]
    UnknownServer(String),
    #[error("link password mismatch")]
    BadPassword,
    #[error("peer SID {got} does not match configured {want}")]
    SidMismatch {
        got: String,
        want: String,
    },
    #[error("malformed {0} frame")]
    Malformed(&'static str),
}

/// Result of feeding one frame into the machine.
#[derive(Debug, Default)]
pub struct HandshakeStep {
    /// Frames to write to the peer.
    pub reply: Vec<Message>,
    /// Set when registration completed with this frame.
    pub registered: Option<PeerIdentity>,
}

/// What the handshake learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub sid: Sid,
    pub name: String,
    pub description: String,
    pub caps: HashSet<String>,
}

/// Per-connection handshake machine.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    /// We dialed out (and already introduced ourselves).
    outbound: bool,
    pass: Option<String>,
    sid: Option<Sid>,
    caps: HashSet<String>,
}

impl Handshake {
    /// Machine for an accepted (inbound) connection.
    pub fn inbound() -> Self {
        Self {
            state: HandshakeState::Start,
            outbound: false,
            pass: None,
            sid: None,
            caps: HashSet::new(),
        }
    }

    /// Machine for a connection we dialed. The caller sends
    /// [`Handshake::introduction`] first.
    pub fn outbound() -> Self {
        Self {
            outbound: true,
            ..Self::inbound()
        }
    }

    /// Our own side of the exchange.
    pub fn introduction(config: &Config, link_password: &str) -> Vec<Message> {
        vec![
            Message::new(
                None,
                "PASS",
                [link_password, "TS", "6", config.server.sid.as_str()],
            ),
            Message::new(None, "CAPAB", [LOCAL_CAPS]),
            Message::new(
                None,
                "SERVER",
                [
                    config.server.name.as_str(),
                    "1",
                    config.server.description.as_str(),
                ],
            ),
        ]
    }

    /// Whether registration finished.
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Feed one frame. `Ok` carries frames to write and, possibly, the
    /// registered peer identity; `Err` means the connection must close.
    pub fn step(&mut self, config: &Config, msg: &Message) -> Result<HandshakeStep, HandshakeError> {
        match msg.command.as_str() {
            "PASS" => {
                // PASS <password> TS <ver> :<sid>
                let (Some(pass), Some(sid)) = (msg.arg(0), msg.arg(3)) else {
                    return Err(HandshakeError::Malformed("PASS"));
                };
                let sid =
                    Sid::from_ts6(sid).map_err(|_| HandshakeError::Malformed("PASS"))?;
                self.pass = Some(pass.to_string());
                self.sid = Some(sid);
                self.state = HandshakeState::Authenticating;
                Ok(HandshakeStep::default())
            }
            "CAPAB" => {
                if let Some(tokens) = msg.arg(0) {
                    self.caps
                        .extend(tokens.split_whitespace().map(str::to_string));
                }
                Ok(HandshakeStep::default())
            }
            "SERVER" => {
                let Some(name) = msg.arg(0) else {
                    return Err(HandshakeError::Malformed("SERVER"));
                };
                let description = msg.arg(2).unwrap_or("").to_string();
                let block = config
                    .link_for(name)
                    .ok_or_else(|| HandshakeError::UnknownServer(name.to_string()))?;
                let pass = self.pass.as_deref().unwrap_or("");
                if pass != block.password {
                    return Err(HandshakeError::BadPassword);
                }
                let sid = self
                    .sid
                    .ok_or(HandshakeError::Malformed("SERVER"))?;
                if let Some(want) = &block.sid {
                    if *want != sid.to_string() {
                        return Err(HandshakeError::SidMismatch {
                            got: sid.to_string(),
                            want: want.clone(),
                        });
                    }
                }

                let mut step = HandshakeStep::default();
                if !self.outbound {
                    // Inbound: answer with our own introduction.
                    step.reply = Self::introduction(config, &block.password);
                }
                self.state = HandshakeState::Done;
                step.registered = Some(PeerIdentity {
                    sid,
                    name: name.to_string(),
                    description,
                    caps: std::mem::take(&mut self.caps),
                });
                Ok(step)
            }
            other => {
                if self.state == HandshakeState::Start {
                    Err(HandshakeError::UnexpectedCommand(other.to_string()))
                } else {
                    // Stray frames between PASS and SERVER are dropped.
                    Ok(HandshakeStep::default())
                }
            }
        }
    }
}
