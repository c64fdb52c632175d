//! Session tests against an in-process fake server.
//!
//! Each test binds a listener on 127.0.0.1:0, connects a real [`Session`] to
//! it and scripts the server side line by line.

use std::time::Duration;

use ircline::irc::{
    ChatMessage, ConnectionStatus, IrcError, MembershipAction, MembershipChange, NamesReply,
    Session,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// The server end of one accepted connection.
struct FakeServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a client line")
            .expect("read failed")
            .expect("client closed the connection")
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Read the NICK/USER pair and answer with a welcome.
    async fn welcome(&mut self, nick: &str) {
        assert_eq!(self.recv().await, format!("NICK {nick}"));
        assert_eq!(self.recv().await, format!("USER {nick} 0 * :Test User"));
        self.send(&format!(":irc.test 001 {nick} :Welcome to the test network"))
            .await;
    }
}

async fn connected() -> (Session, FakeServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let session = Session::new("127.0.0.1", port, "Test User");

    let (connect, accepted) = tokio::join!(session.connect(), listener.accept());
    connect.unwrap();
    let (stream, _) = accepted.unwrap();
    let (reader, writer) = stream.into_split();
    let server = FakeServer {
        lines: BufReader::new(reader).lines(),
        writer,
    };
    (session, server)
}

async fn registered(nick: &str) -> (Session, FakeServer) {
    let (session, mut server) = connected().await;
    let (result, _) = tokio::join!(session.register(nick), server.welcome(nick));
    result.unwrap();
    (session, server)
}

/// Poll `cond` until it holds or the wait runs out.
async fn eventually(mut cond: impl FnMut() -> bool, description: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timeout waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>, description: &str) -> T {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("Channel closed while waiting for: {description}"),
        Err(_) => panic!("Timeout waiting for: {description}"),
    }
}

// ── Registration ────────────────────────────────────────────────────

#[tokio::test]
async fn register_completes_on_welcome() {
    let (session, _server) = registered("alice").await;
    assert_eq!(session.status(), ConnectionStatus::Registered);
    assert_eq!(session.nickname().as_deref(), Some("alice"));
    assert!(session.is_connected());
}

#[tokio::test]
async fn register_reports_nickname_collision() {
    let (session, mut server) = connected().await;
    let script = async {
        server.recv().await;
        server.recv().await;
        server
            .send(":irc.test 433 * alice :Nickname is already in use")
            .await;
    };
    let (result, _) = tokio::join!(session.register("alice"), script);

    match result {
        Err(IrcError::NicknameCollision { nick, reason }) => {
            assert_eq!(nick, "alice");
            assert_eq!(reason, "Nickname is already in use");
        }
        other => panic!("expected a collision, got {other:?}"),
    }
    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert_eq!(session.nickname(), None);
}

#[tokio::test]
async fn register_before_connect_fails() {
    let session = Session::new("127.0.0.1", 1, "Test User");
    assert!(matches!(
        session.register("alice").await,
        Err(IrcError::NotConnected)
    ));
}

// ── Nickname changes ────────────────────────────────────────────────

#[tokio::test]
async fn set_nickname_waits_for_confirmation() {
    let (session, mut server) = registered("alice").await;
    let script = async {
        assert_eq!(server.recv().await, "NICK bob");
        server.send(":alice!alice@host NICK :bob").await;
    };
    let (result, _) = tokio::join!(session.set_nickname("bob"), script);
    result.unwrap();
    assert_eq!(session.nickname().as_deref(), Some("bob"));
}

#[tokio::test]
async fn set_nickname_collision_keeps_old_nick() {
    let (session, mut server) = registered("alice").await;
    let script = async {
        assert_eq!(server.recv().await, "NICK bob");
        server
            .send(":irc.test 433 alice bob :Nickname is already in use")
            .await;
    };
    let (result, _) = tokio::join!(session.set_nickname("bob"), script);
    assert!(matches!(result, Err(IrcError::NicknameCollision { ref nick, .. }) if nick == "bob"));
    assert_eq!(session.nickname().as_deref(), Some("alice"));
}

#[tokio::test]
async fn someone_else_taking_the_nick_is_not_our_confirmation() {
    let (session, mut server) = registered("alice").await;
    let script = async {
        assert_eq!(server.recv().await, "NICK bob");
        server.send(":carol!carol@host NICK :bob").await;
        server
            .send(":irc.test 433 alice bob :Nickname is already in use")
            .await;
    };
    let (result, _) = tokio::join!(session.set_nickname("bob"), script);
    assert!(matches!(result, Err(IrcError::NicknameCollision { ref nick, .. }) if nick == "bob"));
    assert_eq!(session.nickname().as_deref(), Some("alice"));
}

#[tokio::test]
async fn set_nickname_requires_registration() {
    let (session, _server) = connected().await;
    assert!(matches!(
        session.set_nickname("bob").await,
        Err(IrcError::NotRegistered)
    ));
}

// ── Inbound traffic ─────────────────────────────────────────────────

#[tokio::test]
async fn answers_server_ping() {
    let (_session, mut server) = registered("alice").await;
    server.send("PING :abc123").await;
    assert_eq!(server.recv().await, "PONG :abc123");
}

#[tokio::test]
async fn publishes_channel_and_private_messages() {
    let (session, mut server) = registered("alice").await;
    let (tx, mut rx) = mpsc::unbounded_channel::<ChatMessage>();
    session.events().messages.subscribe(move |msg: &ChatMessage| {
        let _ = tx.send(msg.clone());
    });

    server.send(":bob!bob@host PRIVMSG #rust :hello: world").await;
    server.send(":carol!carol@host PRIVMSG alice :psst").await;

    let msg = next_event(&mut rx, "channel message").await;
    assert_eq!(msg.sender, "bob");
    assert_eq!(msg.target, "#rust");
    assert!(!msg.is_private);
    assert_eq!(msg.text, "hello: world");

    let msg = next_event(&mut rx, "private message").await;
    assert_eq!(msg.sender, "carol");
    assert_eq!(msg.target, "alice");
    assert!(msg.is_private);
    assert_eq!(msg.text, "psst");
}

#[tokio::test]
async fn malformed_line_does_not_stop_the_session() {
    let (session, mut server) = registered("alice").await;
    let (tx, mut rx) = mpsc::unbounded_channel::<ChatMessage>();
    session.events().messages.subscribe(move |msg: &ChatMessage| {
        let _ = tx.send(msg.clone());
    });

    server.send("PRIVMSG #rust :no sender here").await;
    server.send(":bob!bob@host PRIVMSG #rust :still here").await;

    let msg = next_event(&mut rx, "message after a bad line").await;
    assert_eq!(msg.text, "still here");
    assert!(session.is_connected());
}

#[tokio::test]
async fn tracks_membership_from_join_and_part() {
    let (session, mut server) = registered("alice").await;
    let (tx, mut rx) = mpsc::unbounded_channel::<MembershipChange>();
    session
        .events()
        .membership
        .subscribe(move |change: &MembershipChange| {
            let _ = tx.send(change.clone());
        });

    server.send(":bob!bob@host JOIN :#rust").await;
    let change = next_event(&mut rx, "join").await;
    assert_eq!(change.user, "bob");
    assert_eq!(change.channel, "#rust");
    assert_eq!(change.action, MembershipAction::Joined);
    assert_eq!(session.members("#rust"), Some(vec!["bob".to_string()]));

    server.send(":bob!bob@host PART #rust :bye").await;
    let change = next_event(&mut rx, "part").await;
    assert_eq!(change.action, MembershipAction::Left);
    assert_eq!(session.members("#rust"), Some(vec![]));
}

#[tokio::test]
async fn names_reply_replaces_member_list() {
    let (session, mut server) = registered("alice").await;
    let (tx, mut rx) = mpsc::unbounded_channel::<NamesReply>();
    session.events().names.subscribe(move |reply: &NamesReply| {
        let _ = tx.send(reply.clone());
    });

    server.send(":irc.test 353 alice = #rust :@alice +bob").await;
    server.send(":irc.test 353 alice = #rust :Carol").await;
    server
        .send(":irc.test 366 alice #rust :End of /NAMES list.")
        .await;
    let reply = next_event(&mut rx, "first names reply").await;
    assert_eq!(reply.channel, "#rust");
    assert_eq!(reply.names, vec!["alice", "bob", "Carol"]);
    assert_eq!(
        session.members("#rust"),
        Some(vec!["alice".to_string(), "bob".to_string(), "Carol".to_string()])
    );

    server.send(":irc.test 353 alice = #rust :dave").await;
    server
        .send(":irc.test 366 alice #rust :End of /NAMES list.")
        .await;
    next_event(&mut rx, "second names reply").await;
    assert_eq!(session.members("#rust"), Some(vec!["dave".to_string()]));
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn join_channel_sends_join_and_names() {
    let (session, mut server) = registered("alice").await;
    session.join_channel("#rust").await.unwrap();
    assert_eq!(server.recv().await, "JOIN #rust");
    assert_eq!(server.recv().await, "NAMES #rust");
    assert_eq!(session.joined_channels(), vec!["#rust".to_string()]);
}

#[tokio::test]
async fn join_channel_rejects_invalid_name() {
    let (session, _server) = registered("alice").await;
    for name in ["rust", "#", "#has space"] {
        assert!(matches!(
            session.join_channel(name).await,
            Err(IrcError::InvalidChannelName(_))
        ));
    }
    assert!(session.joined_channels().is_empty());
}

#[tokio::test]
async fn send_message_writes_privmsg() {
    let (session, mut server) = registered("alice").await;
    session.send_message("#rust", "hi there").await.unwrap();
    assert_eq!(server.recv().await, "PRIVMSG #rust :hi there");
}

#[tokio::test]
async fn leave_channel_sends_part() {
    let (session, mut server) = registered("alice").await;
    session.join_channel("#rust").await.unwrap();
    server.recv().await;
    server.recv().await;

    session.leave_channel("#rust").await.unwrap();
    assert_eq!(server.recv().await, "PART #rust");
    assert!(session.joined_channels().is_empty());
}

#[tokio::test]
async fn leave_channel_forgets_channel_after_connection_loss() {
    let (session, mut server) = registered("alice").await;
    session.join_channel("#rust").await.unwrap();
    server.recv().await;
    server.recv().await;

    drop(server);
    eventually(|| !session.is_connected(), "connection loss").await;

    assert!(matches!(
        session.leave_channel("#rust").await,
        Err(IrcError::NotConnected)
    ));
    assert!(session.joined_channels().is_empty());
}

#[tokio::test]
async fn ping_measures_round_trip() {
    let (session, mut server) = registered("alice").await;
    let script = async {
        assert_eq!(server.recv().await, "PING :tok1");
        server.send(":irc.test PONG irc.test :tok1").await;
    };
    let (result, _) = tokio::join!(session.ping("tok1"), script);
    assert!(result.unwrap() < WAIT);
}

#[tokio::test]
async fn concurrent_pings_each_get_their_pong() {
    let (session, mut server) = registered("alice").await;
    let script = async {
        let mut sent = vec![server.recv().await, server.recv().await];
        sent.sort();
        assert_eq!(sent, vec!["PING :keepalive", "PING :user"]);
        server.send(":irc.test PONG irc.test :user").await;
        server.send(":irc.test PONG irc.test :keepalive").await;
    };
    let (keepalive, user, _) =
        tokio::join!(session.ping("keepalive"), session.ping("user"), script);
    keepalive.unwrap();
    user.unwrap();
    assert!(session.is_connected());
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn pending_ping_fails_when_server_closes() {
    let (session, mut server) = registered("alice").await;
    let script = async move {
        assert_eq!(server.recv().await, "PING :tok2");
        drop(server);
    };
    let (result, _) = tokio::join!(session.ping("tok2"), script);
    assert!(matches!(result, Err(IrcError::ConnectionLost)));
    eventually(|| !session.is_connected(), "closed status").await;
    assert_eq!(session.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn server_close_shuts_our_side_down() {
    let (session, mut server) = registered("alice").await;
    server.writer.shutdown().await.unwrap();
    eventually(|| !session.is_connected(), "closed status").await;

    let next = timeout(WAIT, server.lines.next_line())
        .await
        .expect("client kept its side of the stream open");
    assert!(matches!(next, Ok(None)));
}

#[tokio::test]
async fn disconnect_during_connect_closes_the_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let session = Session::new("127.0.0.1", port, "Test User");

    let (connect, _, accepted) = tokio::join!(
        session.connect(),
        session.disconnect(),
        listener.accept()
    );
    connect.unwrap();
    let (stream, _) = accepted.unwrap();
    assert_eq!(session.status(), ConnectionStatus::Closed);

    let mut lines = BufReader::new(stream).lines();
    let next = timeout(WAIT, lines.next_line())
        .await
        .expect("client kept the stream open");
    assert!(matches!(next, Ok(None)));
}

#[tokio::test]
async fn quit_sends_message_then_closes() {
    let (session, mut server) = registered("alice").await;
    session.quit("gone fishing").await;
    assert_eq!(server.recv().await, "QUIT :gone fishing");
    assert_eq!(session.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_final() {
    let (session, _server) = registered("alice").await;
    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.status(), ConnectionStatus::Closed);
    assert!(!session.is_connected());
    assert!(matches!(
        session.send_message("#rust", "hi").await,
        Err(IrcError::NotConnected)
    ));
    assert!(matches!(
        session.connect().await,
        Err(IrcError::SessionClosed)
    ));
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (session, _server) = connected().await;
    assert!(matches!(
        session.connect().await,
        Err(IrcError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = Session::new("127.0.0.1", port, "Test User");
    assert!(matches!(
        session.connect().await,
        Err(IrcError::Connect { .. })
    ));
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
}
