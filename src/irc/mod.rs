//! IRC protocol layer: transport, line classification, session state and the
//! command API.

pub mod commands;
pub mod error;
pub mod message;
pub mod parser;
pub mod publisher;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{IrcError, ParseError};
pub use publisher::{ChatMessage, EventPublisher, Events, MembershipAction, MembershipChange, NamesReply};
pub use session::Session;
pub use state::{is_valid_channel_name, ConnectionStatus};
