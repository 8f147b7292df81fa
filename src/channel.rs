//! In-memory duplex message channels.
//!
//! A [`Channel`](channel) links exactly two [`Endpoint`]s. Each endpoint is
//! exclusively owned; handing one to another worker (as the connection broker
//! does) moves it inside a [`Payload::Endpoint`] message, it is never
//! duplicated. A dropped peer endpoint surfaces as [`ChannelError::Closed`]
//! on the next receive attempt, which is the basis for failure detection in
//! the worker runtime.

use std::{
    collections::BTreeMap,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    time::Duration,
};

use crate::error::ChannelError;

/// A single command/payload pair exchanged between two endpoints.
///
/// A reply to command `X` is conventionally another message with command `X`
/// carrying the result payload.
#[derive(Debug)]
pub struct Message {
    /// Command name. Four names (`quit`, `close`, `connect`, `alive`) are
    /// interpreted by the worker runtime itself; everything else goes to the
    /// per-worker command table.
    pub command: String,
    /// Loosely-typed argument value, opaque to the transport.
    pub payload: Payload,
}

impl Message {
    /// Builds a message from a command name and payload.
    pub fn new(command: impl Into<String>, payload: Payload) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }
}

/// Application-defined message argument.
///
/// The transport does not interpret payloads; the worker runtime only looks
/// inside them for the built-in `connect` delivery, which carries a peer name
/// and a moved [`Endpoint`].
#[derive(Debug, Default)]
pub enum Payload {
    /// No argument.
    #[default]
    None,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered sequence of payloads.
    List(Vec<Payload>),
    /// String-keyed record.
    Map(BTreeMap<String, Payload>),
    /// One half of a channel, transferred by move.
    Endpoint(Endpoint),
}

impl Payload {
    /// Convenience constructor for text payloads.
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    /// Returns the text content, if this payload is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Splits a two-element list into its parts.
    pub fn into_pair(self) -> Option<(Payload, Payload)> {
        match self {
            Payload::List(mut items) if items.len() == 2 => {
                let second = items.pop()?;
                let first = items.pop()?;
                Some((first, second))
            }
            _ => None,
        }
    }

    /// Extracts a moved endpoint, if this payload carries one.
    pub fn into_endpoint(self) -> Option<Endpoint> {
        match self {
            Payload::Endpoint(endpoint) => Some(endpoint),
            _ => None,
        }
    }
}

impl PartialEq for Payload {
    /// Structural equality. Endpoints are exclusively owned, so two endpoint
    /// payloads are never equal.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::None, Payload::None) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a == b,
            (Payload::Text(a), Payload::Text(b)) => a == b,
            (Payload::List(a), Payload::List(b)) => a == b,
            (Payload::Map(a), Payload::Map(b)) => a == b,
            _ => false,
        }
    }
}

/// One exclusively-owned half of a duplex channel.
#[derive(Debug)]
pub struct Endpoint {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl Endpoint {
    /// Sends a message to the peer endpoint. Never blocks past local
    /// buffering; fails with [`ChannelError::Closed`] once the peer endpoint
    /// has been dropped.
    pub fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.tx.send(message).map_err(|_| ChannelError::Closed)
    }

    /// Non-blocking receive. `Ok(None)` means no message is pending;
    /// [`ChannelError::Closed`] means the peer endpoint is gone.
    pub fn try_receive(&self) -> Result<Option<Message>, ChannelError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    /// Blocking receive.
    pub fn receive(&self) -> Result<Message, ChannelError> {
        self.rx.recv().map_err(|_| ChannelError::Closed)
    }

    /// Blocking receive with an upper bound on the wait.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Message, ChannelError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }
}

/// Creates a channel and returns its two linked endpoints.
pub fn channel() -> (Endpoint, Endpoint) {
    let (tx_a, rx_a) = mpsc::channel();
    let (tx_b, rx_b) = mpsc::channel();
    (
        Endpoint { tx: tx_a, rx: rx_b },
        Endpoint { tx: tx_b, rx: rx_a },
    )
}
