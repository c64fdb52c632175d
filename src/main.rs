use anyhow::{Context, Result};
use chrono::Local;
use ircline::config::{self, AppConfig};
use ircline::irc::commands::{parse_command, ParsedCommand, HELP_TEXT};
use ircline::irc::{ChatMessage, MembershipAction, MembershipChange, NamesReply, Session};
use ircline::logging;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug)]
enum AppEvent {
    /// A line typed on stdin
    Input(String),
    InputClosed,
    Message(ChatMessage),
    Membership(MembershipChange),
    Names(NamesReply),
    KeepaliveFailed(String),
    Tick,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load_config()?;
    logging::init(&cfg.logging)?;

    // First run: persist the defaults, generated nickname included.
    let path = config::config_path();
    if !path.exists() {
        match config::save_config(&cfg) {
            Ok(()) => info!(path = %path.display(), "wrote default config"),
            Err(e) => warn!("could not write default config: {e:#}"),
        }
    }

    if let Err(e) = run_app(cfg).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_app(cfg: AppConfig) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();

    let session = Session::new(
        cfg.server.host.clone(),
        cfg.server.port,
        cfg.server.userinfo.clone(),
    );
    forward_events(&session, &event_tx);

    println!("Connecting to {}:{}...", cfg.server.host, cfg.server.port);
    session
        .connect()
        .await
        .with_context(|| format!("Connection to {}:{} failed", cfg.server.host, cfg.server.port))?;
    session
        .register(&cfg.server.nickname)
        .await
        .context("Registration failed")?;
    println!("Registered as {}", cfg.server.nickname);

    let mut current: Option<String> = None;
    for channel in &cfg.server.channels {
        match session.join_channel(channel).await {
            Ok(()) => current = Some(channel.clone()),
            Err(e) => println!("!!! Join {} failed: {}", channel, e),
        }
    }

    // Spawn stdin reader task
    let input_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if input_tx.send(AppEvent::Input(line)).is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = input_tx.send(AppEvent::InputClosed);
                    break;
                }
            }
        }
    });

    // Spawn keepalive task
    if cfg.behavior.keepalive_secs > 0 {
        let ka_tx = event_tx.clone();
        let ka_session = session.clone();
        let every = Duration::from_secs(cfg.behavior.keepalive_secs);
        let limit = Duration::from_secs(cfg.behavior.ping_timeout_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !ka_session.is_connected() {
                    break;
                }
                let reason = match tokio::time::timeout(limit, ka_session.ping("keepalive")).await {
                    Ok(Ok(_)) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("no reply within {}s", limit.as_secs()),
                };
                let _ = ka_tx.send(AppEvent::KeepaliveFailed(reason));
                break;
            }
        });
    }

    // Spawn tick task for connection-loss detection
    let tick_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if tick_tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    });

    let ts_format = cfg.behavior.timestamp_format.clone();
    let stamp = move || Local::now().format(&ts_format).to_string();

    while let Some(event) = event_rx.recv().await {
        match event {
            AppEvent::Input(line) => {
                if handle_input(&session, &line, &mut current).await {
                    break;
                }
            }
            AppEvent::InputClosed => break,
            AppEvent::Message(msg) => {
                if msg.is_private {
                    println!("[{}] *{}* {}", stamp(), msg.sender, msg.text);
                } else {
                    println!("[{}] {} <{}> {}", stamp(), msg.target, msg.sender, msg.text);
                }
            }
            AppEvent::Membership(change) => {
                let verb = match change.action {
                    MembershipAction::Joined => "joined",
                    MembershipAction::Left => "left",
                };
                println!("[{}] *** {} has {} {}", stamp(), change.user, verb, change.channel);
            }
            AppEvent::Names(reply) => {
                println!(
                    "[{}] *** {} ({}): {}",
                    stamp(),
                    reply.channel,
                    reply.names.len(),
                    reply.names.join(" ")
                );
            }
            AppEvent::KeepaliveFailed(reason) => {
                println!("!!! Keepalive failed: {}", reason);
                break;
            }
            AppEvent::Tick => {
                if !session.is_connected() {
                    println!("*** Connection closed by server");
                    break;
                }
            }
        }
    }

    session.quit(&cfg.behavior.quit_message).await;
    Ok(())
}

/// Bridge the session's synchronous publishers into the app event channel.
fn forward_events(session: &Session, event_tx: &mpsc::UnboundedSender<AppEvent>) {
    let tx = event_tx.clone();
    session.events().messages.subscribe(move |msg: &ChatMessage| {
        let _ = tx.send(AppEvent::Message(msg.clone()));
    });
    let tx = event_tx.clone();
    session.events().membership.subscribe(move |change: &MembershipChange| {
        let _ = tx.send(AppEvent::Membership(change.clone()));
    });
    let tx = event_tx.clone();
    session.events().names.subscribe(move |reply: &NamesReply| {
        let _ = tx.send(AppEvent::Names(reply.clone()));
    });
}

/// Run one line of user input. Returns `true` when the user asked to quit.
async fn handle_input(session: &Session, line: &str, current: &mut Option<String>) -> bool {
    let line = line.trim_end();
    if line.is_empty() {
        return false;
    }

    let Some(cmd) = parse_command(line) else {
        if line.starts_with('/') {
            println!("!!! Unknown command (try /help)");
            return false;
        }
        match current.as_deref() {
            Some(channel) => match session.send_message(channel, line).await {
                Ok(()) => println!(
                    "{} <{}> {}",
                    channel,
                    session.nickname().unwrap_or_default(),
                    line
                ),
                Err(e) => println!("!!! Send failed: {}", e),
            },
            None => println!("!!! Not in a channel (use /join #channel)"),
        }
        return false;
    };

    match cmd {
        ParsedCommand::Join { channel } => {
            let joined = session.join_channel(&channel).await;
            match joined {
                Ok(()) => *current = Some(channel),
                Err(e) => println!("!!! Join failed: {}", e),
            }
        }
        ParsedCommand::Part { channel } => {
            let Some(channel) = channel.or_else(|| current.clone()) else {
                println!("!!! Not in a channel");
                return false;
            };
            if let Err(e) = session.leave_channel(&channel).await {
                println!("!!! Part failed: {}", e);
            }
            if current.as_deref() == Some(channel.as_str()) {
                *current = session.joined_channels().into_iter().next();
            }
        }
        ParsedCommand::Nick { nick } => match session.set_nickname(&nick).await {
            Ok(()) => println!("*** You are now known as {}", nick),
            Err(e) => println!("!!! Nick change failed: {}", e),
        },
        ParsedCommand::Msg { target, text } => {
            if let Err(e) = session.send_message(&target, &text).await {
                println!("!!! Send failed: {}", e);
            }
        }
        ParsedCommand::Names { channel } => {
            match channel.or_else(|| current.clone()) {
                Some(channel) => {
                    if let Err(e) = session.request_membership(&channel).await {
                        println!("!!! Names failed: {}", e);
                    }
                }
                None => println!("!!! Not in a channel"),
            }
        }
        ParsedCommand::Ping => {
            match tokio::time::timeout(Duration::from_secs(30), session.ping("ircline")).await {
                Ok(Ok(rtt)) => println!("*** Pong in {} ms", rtt.as_millis()),
                Ok(Err(e)) => println!("!!! Ping failed: {}", e),
                Err(_) => println!("!!! Ping timed out"),
            }
        }
        ParsedCommand::Quit { message } => {
            if let Some(message) = message {
                session.quit(&message).await;
            }
            return true;
        }
        ParsedCommand::Help => {
            for help in HELP_TEXT {
                println!("  {}", help);
            }
        }
    }
    false
}
