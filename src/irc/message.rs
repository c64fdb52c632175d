//! Outbound protocol commands and their wire encoding.

use std::fmt;

/// A command the client writes to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nick(String),
    User { nick: String, userinfo: String },
    Join(String),
    Part(String),
    Privmsg { target: String, text: String },
    Names(String),
    /// Reply to a server PING; the token is echoed verbatim.
    Pong(String),
    Ping(String),
    Quit(String),
}

impl Command {
    /// Encoded line including the terminating newline.
    pub fn to_wire(&self) -> String {
        format!("{self}\n")
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Nick(_) => "NICK",
            Command::User { .. } => "USER",
            Command::Join(_) => "JOIN",
            Command::Part(_) => "PART",
            Command::Privmsg { .. } => "PRIVMSG",
            Command::Names(_) => "NAMES",
            Command::Pong(_) => "PONG",
            Command::Ping(_) => "PING",
            Command::Quit(_) => "QUIT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Nick(nick) => write!(f, "NICK {nick}"),
            Command::User { nick, userinfo } => write!(f, "USER {nick} 0 * :{userinfo}"),
            Command::Join(channel) => write!(f, "JOIN {channel}"),
            Command::Part(channel) => write!(f, "PART {channel}"),
            Command::Privmsg { target, text } => write!(f, "PRIVMSG {target} :{text}"),
            Command::Names(channel) => write!(f, "NAMES {channel}"),
            Command::Pong(token) if token.is_empty() => write!(f, "PONG"),
            Command::Pong(token) => write!(f, "PONG {token}"),
            Command::Ping(token) => write!(f, "PING :{token}"),
            Command::Quit(message) => write!(f, "QUIT :{message}"),
        }
    }
}
