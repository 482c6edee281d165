//! Connect-sequence handshake for socket-backed channel gateways.
//!
//! Gateways that speak to a sidecar process (WhatsApp, Signal) open a
//! socket, announce themselves, and must not forward traffic until the
//! sidecar acknowledges. The sequence is an explicit state machine that
//! dispatches on state; handlers are never swapped mid-connect.

use crate::error::{Error, Result};

/// Where the connect sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Socket open, hello not yet sent.
    Connecting,
    /// Hello sent, waiting for the gateway's ack.
    AwaitingAck,
    /// Ack received; traffic may flow.
    Connected,
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::AwaitingAck => "awaiting-ack",
            Self::Connected => "connected",
        })
    }
}

/// A frame received from the gateway during or after connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Acknowledges our hello; carries the gateway session id.
    Ack { session_id: String },
    /// Any post-handshake message.
    Message(String),
}

/// What the caller should do after feeding a frame in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Handshake completed; the session id is now known.
    Established { session_id: String },
    /// A regular message, only emitted once connected.
    Message(String),
}

/// Connect handshake: `connecting → awaiting-ack → connected`.
///
/// Transitions are monotonic; an out-of-order frame is an error rather
/// than a silently dropped callback.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    session_id: Option<String>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Connecting,
            session_id: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Session id reported by the gateway, once connected.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Mark the hello as sent. Valid only from `Connecting`.
    pub fn hello_sent(&mut self) -> Result<()> {
        match self.state {
            HandshakeState::Connecting => {
                self.state = HandshakeState::AwaitingAck;
                Ok(())
            },
            state => Err(Error::Handshake {
                state: state.to_string(),
                frame: "hello".into(),
            }),
        }
    }

    /// Feed one inbound frame through the state machine.
    pub fn on_frame(&mut self, frame: Frame) -> Result<HandshakeEvent> {
        match (self.state, frame) {
            (HandshakeState::AwaitingAck, Frame::Ack { session_id }) => {
                self.state = HandshakeState::Connected;
                self.session_id = Some(session_id.clone());
                tracing::debug!(session_id, "channel gateway handshake established");
                Ok(HandshakeEvent::Established { session_id })
            },
            (HandshakeState::Connected, Frame::Message(body)) => {
                Ok(HandshakeEvent::Message(body))
            },
            (state, frame) => Err(Error::Handshake {
                state: state.to_string(),
                frame: match frame {
                    Frame::Ack { .. } => "ack".into(),
                    Frame::Message(_) => "message".into(),
                },
            }),
        }
    }
}
