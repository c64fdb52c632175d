//! Client-side session engine for a line-oriented IRC-like chat protocol.
//!
//! [`irc::Session`] owns one connection: it registers, joins and leaves
//! channels, sends messages and keeps a live model of channel membership fed
//! by a background receive task. Front ends observe it through the typed
//! publishers in [`irc::Events`].

pub mod config;
pub mod irc;
pub mod logging;
