//! Protocol session: command API, receive loop and dispatch.
//!
//! All inbound bytes are read by a single receive task. Commands that need a
//! server acknowledgement (registration, nickname change, keepalive) park a
//! oneshot sender in a pending slot *before* writing, and the receive task
//! fills it when the matching reply arrives. Nothing but the receive task ever
//! reads from the stream.

use crate::irc::error::IrcError;
use crate::irc::message::Command;
use crate::irc::parser::{self, IncomingEvent};
use crate::irc::publisher::{ChatMessage, Events, MembershipAction, MembershipChange, NamesReply};
use crate::irc::state::{is_valid_channel_name, ConnectionStatus, SessionState};
use crate::irc::transport::{Transport, TransportReader};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Which command a pending acknowledgement belongs to. Keepalive waiters are
/// keyed by their token so concurrent pings do not collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AckKey {
    Register,
    Nick,
    Pong(String),
}

#[derive(Debug)]
enum AckOutcome {
    Accepted(String),
    Rejected { nick: String, reason: String },
    /// A newer command of the same kind took over the slot.
    Superseded,
}

struct Inner {
    transport: Transport,
    state: Mutex<SessionState>,
    acks: Mutex<HashMap<AckKey, oneshot::Sender<AckOutcome>>>,
    events: Events,
    receive_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// One client connection to a server.
///
/// Cheap to clone; clones share the same connection. A session connects at
/// most once: after [`Session::disconnect`] build a new one.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(host: impl Into<String>, port: u16, userinfo: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Transport::new(host, port),
                state: Mutex::new(SessionState::new(userinfo)),
                acks: Mutex::new(HashMap::new()),
                events: Events::default(),
                receive_task: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Subscription points for messages, membership changes and names replies.
    pub fn events(&self) -> &Events {
        &self.inner.events
    }

    pub fn host(&self) -> &str {
        self.inner.transport.host()
    }

    pub fn port(&self) -> u16 {
        self.inner.transport.port()
    }

    pub fn userinfo(&self) -> String {
        self.inner.lock_state().userinfo.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock_state().status
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().is_connected()
    }

    pub fn nickname(&self) -> Option<String> {
        self.inner.lock_state().nickname.clone()
    }

    pub fn joined_channels(&self) -> Vec<String> {
        self.inner.lock_state().joined_channels()
    }

    /// Known members of `channel`, sorted case-insensitively.
    pub fn members(&self, channel: &str) -> Option<Vec<String>> {
        self.inner.lock_state().members(channel)
    }

    /// Open the connection and start the receive task.
    ///
    /// Returns once the receive task is running.
    pub async fn connect(&self) -> Result<(), IrcError> {
        let mut task = self.inner.receive_task.lock().await;
        match self.status() {
            ConnectionStatus::Disconnected => {}
            ConnectionStatus::Closed => return Err(IrcError::SessionClosed),
            ConnectionStatus::Connected | ConnectionStatus::Registered => {
                return Err(IrcError::AlreadyConnected)
            }
        }

        let reader = match self.inner.transport.connect().await {
            Ok(reader) => reader,
            Err(e) => {
                warn!("{e}");
                return Err(e);
            }
        };
        self.inner.lock_state().status = ConnectionStatus::Connected;

        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move {
            let _ = ready_tx.send(());
            receive_loop(inner, reader).await;
        }));
        let _ = ready_rx.await;

        info!(host = self.host(), port = self.port(), "connected");
        Ok(())
    }

    /// Send `NICK` and `USER`, then wait for the welcome reply.
    ///
    /// On an already registered session this is a nickname change.
    pub async fn register(&self, nickname: &str) -> Result<(), IrcError> {
        match self.status() {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Registered => return self.set_nickname(nickname).await,
            _ => return Err(IrcError::NotConnected),
        }

        let rx = self.inner.expect_ack(AckKey::Register)?;
        let userinfo = self.userinfo();
        let sent = match self.inner.send(Command::Nick(nickname.to_string())).await {
            Ok(()) => {
                self.inner
                    .send(Command::User {
                        nick: nickname.to_string(),
                        userinfo,
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.inner.cancel_ack(AckKey::Register);
            return Err(e);
        }

        let nick = wait_for_ack(rx).await?;
        info!(%nick, "registered");
        Ok(())
    }

    /// Join `channel` and ask for its member list.
    pub async fn join_channel(&self, channel: &str) -> Result<(), IrcError> {
        if !is_valid_channel_name(channel) {
            return Err(IrcError::InvalidChannelName(channel.to_string()));
        }
        self.require_connected()?;

        self.inner.send(Command::Join(channel.to_string())).await?;
        self.inner.lock_state().mark_joined(channel);
        debug!(channel, "join requested");
        self.request_membership(channel).await
    }

    /// Leave `channel`.
    ///
    /// The channel is dropped from the joined set before anything is written,
    /// whatever the outcome of the write.
    pub async fn leave_channel(&self, channel: &str) -> Result<(), IrcError> {
        self.inner.lock_state().mark_left(channel);
        self.require_connected()?;
        self.inner.send(Command::Part(channel.to_string())).await
    }

    /// Send `text` to a channel or user. The text is written as given.
    pub async fn send_message(&self, target: &str, text: &str) -> Result<(), IrcError> {
        self.require_connected()?;
        self.inner
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await
    }

    /// Ask for the member list of `channel`; the answer arrives as a names
    /// reply event.
    pub async fn request_membership(&self, channel: &str) -> Result<(), IrcError> {
        self.require_connected()?;
        self.inner.send(Command::Names(channel.to_string())).await
    }

    /// Change nickname and wait for the server to confirm or reject it.
    ///
    /// The stored nickname is left alone when the server rejects the change.
    pub async fn set_nickname(&self, new_nick: &str) -> Result<(), IrcError> {
        match self.status() {
            ConnectionStatus::Registered => {}
            ConnectionStatus::Connected => return Err(IrcError::NotRegistered),
            _ => return Err(IrcError::NotConnected),
        }
        if self.nickname().as_deref() == Some(new_nick) {
            return Ok(());
        }

        let rx = self.inner.expect_ack(AckKey::Nick)?;
        if let Err(e) = self.inner.send(Command::Nick(new_nick.to_string())).await {
            self.inner.cancel_ack(AckKey::Nick);
            return Err(e);
        }

        let nick = wait_for_ack(rx).await?;
        info!(%nick, "nickname changed");
        Ok(())
    }

    /// Keepalive: send `PING` and wait for the matching `PONG`.
    ///
    /// Returns the round-trip time. There is no timeout here; wrap the call
    /// in `tokio::time::timeout` for a bounded wait.
    pub async fn ping(&self, token: &str) -> Result<Duration, IrcError> {
        self.require_connected()?;
        let key = AckKey::Pong(token.to_string());
        let rx = self.inner.expect_ack(key.clone())?;
        let started = Instant::now();
        if let Err(e) = self.inner.send(Command::Ping(token.to_string())).await {
            self.inner.cancel_ack(key);
            return Err(e);
        }
        wait_for_ack(rx).await?;
        Ok(started.elapsed())
    }

    /// Say goodbye to the server, then disconnect.
    pub async fn quit(&self, message: &str) {
        if self.is_connected() {
            if let Err(e) = self.inner.send(Command::Quit(message.to_string())).await {
                debug!("QUIT not delivered: {e}");
            }
        }
        self.disconnect().await;
    }

    /// Close the connection and wait for the receive task to finish.
    ///
    /// Calling this again is a no-op. A `connect` still in flight finishes
    /// first and is then torn down.
    pub async fn disconnect(&self) {
        let mut task = self.inner.receive_task.lock().await;
        let was_open = {
            let mut state = self.inner.lock_state();
            let was_open = state.status != ConnectionStatus::Closed;
            state.close();
            was_open
        };
        self.inner.fail_pending();
        self.inner.transport.disconnect().await;

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                warn!("receive task ended abnormally: {e}");
            }
        }
        if was_open {
            info!(host = self.host(), "disconnected");
        }
    }

    fn require_connected(&self) -> Result<(), IrcError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(IrcError::NotConnected)
        }
    }
}

async fn wait_for_ack(rx: oneshot::Receiver<AckOutcome>) -> Result<String, IrcError> {
    match rx.await {
        Ok(AckOutcome::Accepted(nick)) => Ok(nick),
        Ok(AckOutcome::Rejected { nick, reason }) => {
            warn!(%nick, %reason, "nickname rejected");
            Err(IrcError::NicknameCollision { nick, reason })
        }
        Ok(AckOutcome::Superseded) => Err(IrcError::Superseded),
        Err(_) => Err(IrcError::ConnectionLost),
    }
}

/// Read until the stream ends, dispatching one line at a time.
async fn receive_loop(inner: Arc<Inner>, mut reader: TransportReader) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        match reader.receive().await {
            Ok(Some(chunk)) => {
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buf.drain(..=pos).collect();
                    inner.handle_raw(&raw).await;
                }
            }
            Ok(None) => {
                if !buf.is_empty() {
                    let raw = std::mem::take(&mut buf);
                    inner.handle_raw(&raw).await;
                }
                if inner.transport.is_open() {
                    info!("server closed the connection");
                } else {
                    debug!("receive loop stopped by disconnect");
                }
                break;
            }
            Err(e) => {
                warn!("connection lost: {e}");
                break;
            }
        }
    }

    inner.lock_state().close();
    inner.fail_pending();
    inner.transport.disconnect().await;
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_acks(&self) -> MutexGuard<'_, HashMap<AckKey, oneshot::Sender<AckOutcome>>> {
        self.acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, command: Command) -> Result<(), IrcError> {
        debug!(command = command.name(), "-> {command}");
        self.transport.send(command.to_wire().as_bytes()).await
    }

    /// Park a waiter for `key`. A waiter already parked under the same key is
    /// told it was superseded.
    fn expect_ack(&self, key: AckKey) -> Result<oneshot::Receiver<AckOutcome>, IrcError> {
        let (tx, rx) = oneshot::channel();
        let previous = self.lock_acks().insert(key.clone(), tx);
        if let Some(previous) = previous {
            debug!(?key, "pending acknowledgement superseded");
            let _ = previous.send(AckOutcome::Superseded);
        }
        // The receive loop closes the state before clearing the slots, so a
        // slot inserted after that clear is caught here.
        if !self.lock_state().is_connected() {
            self.cancel_ack(key);
            return Err(IrcError::NotConnected);
        }
        Ok(rx)
    }

    fn cancel_ack(&self, key: AckKey) {
        self.lock_acks().remove(&key);
    }

    fn resolve(&self, key: AckKey, outcome: AckOutcome) -> bool {
        match self.lock_acks().remove(&key) {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    fn fail_pending(&self) {
        self.lock_acks().clear();
    }

    async fn handle_raw(&self, raw: &[u8]) {
        let decoded = String::from_utf8_lossy(raw);
        let line = decoded.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return;
        }
        trace!("<- {line}");
        match parser::classify(line) {
            Ok(Some(event)) => self.dispatch(event).await,
            Ok(None) => {}
            Err(e) => warn!(line, "dropping line: {e}"),
        }
    }

    async fn dispatch(&self, event: IncomingEvent) {
        match event {
            IncomingEvent::Ping { token } => {
                if let Err(e) = self.send(Command::Pong(token)).await {
                    warn!("failed to answer PING: {e}");
                }
            }
            IncomingEvent::PrivateMessage {
                sender,
                target,
                is_private,
                text,
            } => {
                self.events.messages.publish(&ChatMessage {
                    sender,
                    target,
                    is_private,
                    text,
                });
            }
            IncomingEvent::Join { user, channel } => {
                self.lock_state().add_member(&channel, &user);
                debug!(%user, %channel, "joined");
                self.events.membership.publish(&MembershipChange {
                    user,
                    channel,
                    action: MembershipAction::Joined,
                });
            }
            IncomingEvent::Part { user, channel } => {
                self.lock_state().remove_member(&channel, &user);
                debug!(%user, %channel, "left");
                self.events.membership.publish(&MembershipChange {
                    user,
                    channel,
                    action: MembershipAction::Left,
                });
            }
            IncomingEvent::NamesReply {
                channel,
                names,
                complete,
            } => {
                let committed = {
                    let mut state = self.lock_state();
                    state.buffer_names(&channel, names);
                    complete.then(|| state.commit_names(&channel))
                };
                if let Some(names) = committed {
                    self.publish_names(channel, names);
                }
            }
            IncomingEvent::EndOfNames { channel } => {
                let names = self.lock_state().commit_names(&channel);
                self.publish_names(channel, names);
            }
            IncomingEvent::Welcome { nick } => {
                {
                    let mut state = self.lock_state();
                    if state.is_connected() {
                        state.status = ConnectionStatus::Registered;
                        state.nickname = Some(nick.clone());
                    }
                }
                self.resolve(AckKey::Register, AckOutcome::Accepted(nick));
            }
            IncomingEvent::NicknameRejected { nick, reason } => {
                let key = if self.lock_acks().contains_key(&AckKey::Nick) {
                    AckKey::Nick
                } else {
                    AckKey::Register
                };
                if !self.resolve(key, AckOutcome::Rejected { nick, reason }) {
                    debug!("nickname rejection with nothing waiting");
                }
            }
            IncomingEvent::NickChanged { old, new } => {
                let own = {
                    let mut state = self.lock_state();
                    state.rename_member(&old, &new);
                    let own = state.is_own_nick(&old);
                    if own {
                        state.nickname = Some(new.clone());
                    }
                    own
                };
                // Only our own rename answers a pending NICK.
                if own {
                    self.resolve(AckKey::Nick, AckOutcome::Accepted(new));
                }
            }
            IncomingEvent::Pong { token } => {
                let key = AckKey::Pong(token.clone());
                if !self.resolve(key, AckOutcome::Accepted(token)) {
                    trace!("unsolicited PONG");
                }
            }
        }
    }

    fn publish_names(&self, channel: String, names: Vec<String>) {
        debug!(%channel, count = names.len(), "member list updated");
        self.events.names.publish(&NamesReply { channel, names });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// A session marked registered without a handshake, plus the server end.
    async fn registered_session() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let session = Session::new("127.0.0.1", port, "Test User");
        let (connect, accepted) = tokio::join!(session.connect(), listener.accept());
        connect.unwrap();
        let (peer, _) = accepted.unwrap();
        {
            let mut state = session.inner.lock_state();
            state.status = ConnectionStatus::Registered;
            state.nickname = Some("alice".into());
        }
        (session, peer)
    }

    #[tokio::test]
    async fn test_leave_channel_forgets_channel_when_write_fails() {
        let (session, _peer) = registered_session().await;
        session.join_channel("#rust").await.unwrap();
        session.inner.transport.shutdown_write().await;

        let result = session.leave_channel("#rust").await;
        assert!(matches!(result, Err(IrcError::Write(_))));
        assert!(session.joined_channels().is_empty());
        assert_eq!(session.status(), ConnectionStatus::Registered);
    }

    #[tokio::test]
    async fn test_replaced_waiter_is_superseded() {
        let (session, _peer) = registered_session().await;
        let key = AckKey::Pong("tok".into());
        let first = session.inner.expect_ack(key.clone()).unwrap();
        let second = session.inner.expect_ack(key.clone()).unwrap();

        assert!(matches!(wait_for_ack(first).await, Err(IrcError::Superseded)));
        assert!(session.inner.resolve(key, AckOutcome::Accepted("tok".into())));
        assert_eq!(wait_for_ack(second).await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_foreign_rename_does_not_answer_nick_change() {
        let (session, _peer) = registered_session().await;
        let rx = session.inner.expect_ack(AckKey::Nick).unwrap();
        session
            .inner
            .dispatch(IncomingEvent::NickChanged {
                old: "carol".into(),
                new: "bob".into(),
            })
            .await;
        assert!(session.inner.lock_acks().contains_key(&AckKey::Nick));
        assert_eq!(session.nickname().as_deref(), Some("alice"));

        session
            .inner
            .dispatch(IncomingEvent::NickChanged {
                old: "alice".into(),
                new: "bob".into(),
            })
            .await;
        assert_eq!(wait_for_ack(rx).await.unwrap(), "bob");
        assert_eq!(session.nickname().as_deref(), Some("bob"));
    }
}
