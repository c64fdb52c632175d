//! User slash-command parser.
//!
//! Parses `/command arg1 arg2 ...` input lines into typed [`ParsedCommand`]
//! values that the front end maps onto [`crate::irc::Session`] calls.

/// A parsed user command. Each variant corresponds to a `/command`.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedCommand {
    Join { channel: String },
    Part { channel: Option<String> },
    Nick { nick: String },
    Msg { target: String, text: String },
    Names { channel: Option<String> },
    Ping,
    Quit { message: Option<String> },
    Help,
}

/// Parse a slash-command string into a [`ParsedCommand`].
///
/// Returns `None` if the input does not start with `/` or is not a recognized
/// command. Commands are case-insensitive.
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;

    let parts: Vec<&str> = body.splitn(3, ' ').collect();
    let cmd = parts.first()?.to_lowercase();

    match cmd.as_str() {
        "join" | "j" => {
            let channel = parts.get(1)?.to_string();
            let channel = if channel.starts_with('#') {
                channel
            } else {
                format!("#{}", channel)
            };
            Some(ParsedCommand::Join { channel })
        }
        "part" | "leave" => {
            let channel = parts.get(1).map(|s| s.to_string());
            Some(ParsedCommand::Part { channel })
        }
        "nick" => {
            let nick = parts.get(1)?.to_string();
            Some(ParsedCommand::Nick { nick })
        }
        "msg" | "query" => {
            let target = parts.get(1)?.to_string();
            let text = parts.get(2).unwrap_or(&"").to_string();
            if text.is_empty() {
                return None;
            }
            Some(ParsedCommand::Msg { target, text })
        }
        "names" | "who" => {
            let channel = parts.get(1).map(|s| s.to_string());
            Some(ParsedCommand::Names { channel })
        }
        "ping" => Some(ParsedCommand::Ping),
        "quit" | "exit" => {
            let message = body
                .split_once(' ')
                .map(|(_, m)| m.trim().to_string())
                .filter(|m| !m.is_empty());
            Some(ParsedCommand::Quit { message })
        }
        "help" | "h" => Some(ParsedCommand::Help),
        _ => None,
    }
}

pub const HELP_TEXT: &[&str] = &[
    "/join <#channel>        join a channel",
    "/part [#channel]        leave a channel (default: current)",
    "/nick <nick>            change nickname",
    "/msg <target> <text>    send a message to a user or channel",
    "/names [#channel]       refresh the member list",
    "/ping                   measure round-trip time to the server",
    "/quit [message]         disconnect and exit",
];
