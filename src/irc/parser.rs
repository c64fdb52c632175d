//! Inbound line classifier.
//!
//! Server lines are treated as semi-structured text rather than parsed with a
//! full grammar. [`classify`] checks categories in a fixed priority order and
//! the first match wins:
//!
//! 1. line starts with `PING`
//! 2. line contains `PRIVMSG`
//! 3. line contains `JOIN`
//! 4. line contains `PART`
//! 5. line contains a `353` (name list) token
//! 6. command token `366`, `001`, `432`/`433`/`436`, `NICK` or `PONG`
//!
//! Anything else is informational and ignored. Each field is pulled out by its
//! own small function returning `Option`, so a missing field turns into a
//! [`ParseError`] for that line only.

use crate::irc::error::ParseError;
use crate::irc::state::strip_nick_prefix;

/// One decoded server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingEvent {
    Ping {
        token: String,
    },
    PrivateMessage {
        sender: String,
        target: String,
        is_private: bool,
        text: String,
    },
    Join {
        user: String,
        channel: String,
    },
    Part {
        user: String,
        channel: String,
    },
    /// A chunk of a channel's member list. `complete` is set when the same
    /// line also carried the 366 terminator.
    NamesReply {
        channel: String,
        names: Vec<String>,
        complete: bool,
    },
    EndOfNames {
        channel: String,
    },
    Welcome {
        nick: String,
    },
    NicknameRejected {
        nick: String,
        reason: String,
    },
    NickChanged {
        old: String,
        new: String,
    },
    Pong {
        token: String,
    },
}

/// Classify a single line (without its trailing CR/LF).
///
/// `Ok(None)` means the line is valid but not something the session acts on.
pub fn classify(line: &str) -> Result<Option<IncomingEvent>, ParseError> {
    if line.starts_with("PING") {
        return Ok(Some(parse_ping(line)));
    }
    if line.contains("PRIVMSG") {
        return parse_privmsg(line).map(Some);
    }
    if line.contains("JOIN") {
        return parse_join(line).map(Some);
    }
    if line.contains("PART") {
        return parse_part(line).map(Some);
    }
    if line.contains("353") {
        if let Some(event) = parse_names(line)? {
            return Ok(Some(event));
        }
    }

    match command_token(line) {
        Some("366") => parse_end_of_names(line).map(Some),
        Some("001") => parse_welcome(line).map(Some),
        Some("432" | "433" | "436") => parse_nick_rejected(line).map(Some),
        Some(cmd) if cmd.eq_ignore_ascii_case("NICK") => parse_nick_change(line).map(Some),
        Some(cmd) if cmd.eq_ignore_ascii_case("PONG") => Ok(Some(parse_pong(line))),
        _ => Ok(None),
    }
}

fn parse_ping(line: &str) -> IncomingEvent {
    IncomingEvent::Ping {
        token: line["PING".len()..].trim_start().to_string(),
    }
}

fn parse_privmsg(line: &str) -> Result<IncomingEvent, ParseError> {
    let sender = sender(line).ok_or(ParseError::MissingSender)?;
    let rest = after_keyword(line, "PRIVMSG").ok_or(ParseError::MissingField("target"))?;
    let target = first_token(rest).ok_or(ParseError::MissingField("target"))?;
    let text = rest[target.len()..]
        .strip_prefix(" :")
        .ok_or(ParseError::MissingField("text"))?;
    if text.is_empty() {
        return Err(ParseError::EmptyText);
    }

    Ok(IncomingEvent::PrivateMessage {
        sender: sender.to_string(),
        target: target.to_string(),
        is_private: !target.starts_with('#'),
        text: text.to_string(),
    })
}

fn parse_join(line: &str) -> Result<IncomingEvent, ParseError> {
    let (user, channel) = user_and_channel(line, "JOIN")?;
    Ok(IncomingEvent::Join { user, channel })
}

fn parse_part(line: &str) -> Result<IncomingEvent, ParseError> {
    let (user, channel) = user_and_channel(line, "PART")?;
    Ok(IncomingEvent::Part { user, channel })
}

fn user_and_channel(line: &str, keyword: &str) -> Result<(String, String), ParseError> {
    let user = sender(line).ok_or(ParseError::MissingSender)?;
    let channel = after_keyword(line, keyword)
        .and_then(first_token)
        .map(|c| c.trim_start_matches(':'))
        .filter(|c| !c.is_empty())
        .ok_or(ParseError::MissingField("channel"))?;
    Ok((user.to_string(), channel.to_string()))
}

/// `:server 353 <nick> <symbol> <channel> :<names...>`
///
/// The name list may be followed by a ` 366 ` terminator on the same line,
/// in which case the list ends there.
fn parse_names(line: &str) -> Result<Option<IncomingEvent>, ParseError> {
    let tokens: Vec<(usize, &str)> = tokens_with_offsets(line).collect();
    let Some(idx) = tokens.iter().position(|(_, t)| *t == "353") else {
        return Ok(None);
    };
    let &(chan_off, channel) = tokens
        .get(idx + 3)
        .ok_or(ParseError::MissingField("channel"))?;

    let after_channel = chan_off + channel.len();
    let terminator = line[after_channel..]
        .find(" 366 ")
        .map(|i| after_channel + i);
    let region = &line[after_channel..terminator.unwrap_or(line.len())];

    let list = region
        .split_once(':')
        .map(|(_, names)| names)
        .ok_or(ParseError::MissingField("names"))?;
    // A concatenated terminator line starts with its own ':' prefix.
    let list = list.split(':').next().unwrap_or_default();

    let names = list
        .split_whitespace()
        .map(strip_nick_prefix)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Some(IncomingEvent::NamesReply {
        channel: channel.to_string(),
        names,
        complete: terminator.is_some(),
    }))
}

/// `:server 366 <nick> <channel> :End of /NAMES list.`
fn parse_end_of_names(line: &str) -> Result<IncomingEvent, ParseError> {
    let channel = command_param(line, 1).ok_or(ParseError::MissingField("channel"))?;
    Ok(IncomingEvent::EndOfNames {
        channel: channel.to_string(),
    })
}

/// `:server 001 <nick> :Welcome ...`
fn parse_welcome(line: &str) -> Result<IncomingEvent, ParseError> {
    let nick = command_param(line, 0).ok_or(ParseError::MissingField("nick"))?;
    Ok(IncomingEvent::Welcome {
        nick: nick.to_string(),
    })
}

/// `:server 433 <current> <attempted> :Nickname is already in use`
fn parse_nick_rejected(line: &str) -> Result<IncomingEvent, ParseError> {
    let nick = command_param(line, 1).ok_or(ParseError::MissingField("nick"))?;
    let reason = trailing(line).unwrap_or("nickname rejected");
    Ok(IncomingEvent::NicknameRejected {
        nick: nick.trim_start_matches(':').to_string(),
        reason: reason.to_string(),
    })
}

/// `:old!user@host NICK :new`
fn parse_nick_change(line: &str) -> Result<IncomingEvent, ParseError> {
    let old = sender(line).ok_or(ParseError::MissingSender)?;
    let new = command_param(line, 0)
        .map(|n| n.trim_start_matches(':'))
        .filter(|n| !n.is_empty())
        .ok_or(ParseError::MissingField("nick"))?;
    Ok(IncomingEvent::NickChanged {
        old: old.to_string(),
        new: new.to_string(),
    })
}

/// `:server PONG server :token`
fn parse_pong(line: &str) -> IncomingEvent {
    let token = trailing(line)
        .or_else(|| tokens_with_offsets(line).last().map(|(_, t)| t))
        .unwrap_or_default();
    IncomingEvent::Pong {
        token: token.to_string(),
    }
}

/// Nickname between the first `:` and the following `!` of a prefix token.
fn sender(line: &str) -> Option<&str> {
    line.match_indices(':').find_map(|(i, _)| {
        let token = line[i + 1..].split(char::is_whitespace).next()?;
        let bang = token.rfind('!')?;
        (bang > 0).then(|| &token[..bang])
    })
}

/// Text following the first `<keyword> ` in the line.
fn after_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let needle = format!("{keyword} ");
    let start = line.find(&needle)? + needle.len();
    Some(&line[start..])
}

fn first_token(s: &str) -> Option<&str> {
    s.split(char::is_whitespace).next().filter(|t| !t.is_empty())
}

/// Space-separated tokens with their byte offsets.
fn tokens_with_offsets(line: &str) -> impl Iterator<Item = (usize, &str)> {
    line.split(' ')
        .scan(0usize, |offset, token| {
            let start = *offset;
            *offset += token.len() + 1;
            Some((start, token))
        })
        .filter(|(_, t)| !t.is_empty())
}

/// The command (or numeric) of a line, skipping an optional `:prefix`.
fn command_token(line: &str) -> Option<&str> {
    let mut tokens = line.split(' ').filter(|t| !t.is_empty());
    let first = tokens.next()?;
    if first.starts_with(':') {
        tokens.next()
    } else {
        Some(first)
    }
}

/// The `n`th parameter after the command token.
fn command_param(line: &str, n: usize) -> Option<&str> {
    let mut tokens = line.split(' ').filter(|t| !t.is_empty());
    let first = tokens.next()?;
    if first.starts_with(':') {
        tokens.next()?;
    }
    tokens.nth(n)
}

/// Trailing parameter: everything after the first ` :`.
fn trailing(line: &str) -> Option<&str> {
    line.split_once(" :").map(|(_, rest)| rest)
}
