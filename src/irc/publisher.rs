//! Synchronous one-to-many event delivery.
//!
//! A session owns three independent publishers, one per event category, each
//! with its own typed payload (see [`Events`]).

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Identifies a subscriber within one publisher, in subscription order.
pub type SubscriptionId = usize;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks for one kind of event.
pub struct EventPublisher<T> {
    subscribers: Mutex<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T> EventPublisher<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Append a callback. Subscribing the same closure twice delivers twice.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = subs.len();
        subs.push((id, Arc::new(callback)));
        id
    }

    /// Deliver `event` to every subscriber, in order, on the calling task.
    ///
    /// A panicking callback is logged and skipped; later callbacks still run.
    pub fn publish(&self, event: &T) {
        // Snapshot so callbacks may subscribe without deadlocking.
        let snapshot: Vec<(SubscriptionId, Callback<T>)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, callback) in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(subscriber = id, "event subscriber panicked");
            }
        }
    }
}

impl<T> Default for EventPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A channel or private message received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub target: String,
    pub is_private: bool,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    Joined,
    Left,
}

/// A user entered or left a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub user: String,
    pub channel: String,
    pub action: MembershipAction,
}

/// The authoritative member list of a channel, as just committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamesReply {
    pub channel: String,
    pub names: Vec<String>,
}

/// The three subscription points a session exposes.
#[derive(Default)]
pub struct Events {
    pub messages: EventPublisher<ChatMessage>,
    pub membership: EventPublisher<MembershipChange>,
    pub names: EventPublisher<NamesReply>,
}
