//! Error kinds surfaced by the transport and the command API.

use std::io;
use thiserror::Error;

/// Failure of a transport primitive or a session command.
///
/// Commands never panic on I/O trouble; every failure ends up as one of these
/// variants in the returned `Result`.
#[derive(Debug, Error)]
pub enum IrcError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("not registered")]
    NotRegistered,

    #[error("already connected")]
    AlreadyConnected,

    /// The session was disconnected; a new one is needed to reconnect.
    #[error("session is closed")]
    SessionClosed,

    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("nickname {nick} rejected: {reason}")]
    NicknameCollision { nick: String, reason: String },

    /// The connection dropped while a command was waiting for its reply.
    #[error("connection lost before the server answered")]
    ConnectionLost,

    /// A newer command of the same kind replaced this one while it waited.
    #[error("superseded by a newer request")]
    Superseded,
}

/// Why an inbound line could not be decoded for the category it matched.
///
/// Only the dispatcher sees these: they are logged and the line is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing sender prefix")]
    MissingSender,

    #[error("missing {0} parameter")]
    MissingField(&'static str),

    #[error("empty message text")]
    EmptyText,
}
