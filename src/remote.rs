//! Network collaborators consumed by the synchronizer.
//!
//! Transports live outside this crate. Adapters implement the three traits
//! below with blocking calls; the synchronizer runs them on helper threads
//! and bounds them with its request timeout.

use crate::error::{FeedError, Result};
use crate::session::Session;
use crate::types::{FeedItem, ItemId, RemoteEvent, SubjectId};
use crate::writer::Command;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pulls the full current feed for a subject.
pub trait SnapshotFetcher: Send + Sync + 'static {
    /// Must be idempotent. Fails with `Auth` or `Network`.
    fn fetch_snapshot(&self, session: &Session) -> Result<Vec<FeedItem>>;
}

/// Server-side mutations issued after an optimistic local change.
///
/// Repeating a call for an already-processed id must not fail; an adapter
/// may report `Conflict` for a vanished item, which counts as success.
pub trait MutationClient: Send + Sync + 'static {
    fn mark_read(&self, session: &Session, id: &ItemId) -> Result<()>;

    fn delete(&self, session: &Session, id: &ItemId) -> Result<()>;

    /// Create an item from `payload` and return the server's copy, with the
    /// id the channel will later echo it under.
    fn send(&self, session: &Session, payload: &Value) -> Result<FeedItem>;
}

/// Persistent push connection.
///
/// Delivery is unordered and may repeat events after a transport retry.
/// Loss of the connection must be reported through
/// [`ChannelSink::disconnected`]; the synchronizer then drives
/// [`reconnect`](PushChannel::reconnect) and [`join`](PushChannel::join).
pub trait PushChannel: Send + Sync + 'static {
    /// Handshake with the session credential. Inbound events go to `sink`.
    fn connect(&self, session: &Session, sink: ChannelSink) -> Result<()>;

    /// Subscribe to the subject's events. Issued after every connect.
    fn join(&self, subject: &SubjectId) -> Result<()>;

    fn reconnect(&self, session: &Session) -> Result<()>;

    /// Tear the connection down. Must be idempotent.
    fn close(&self);
}

/// Where a push adapter delivers what it receives.
#[derive(Clone)]
pub struct ChannelSink {
    commands: Sender<Command>,
}

impl ChannelSink {
    pub(crate) fn new(commands: Sender<Command>) -> Self {
        Self { commands }
    }

    /// Hand an inbound event to the synchronizer. Never blocks.
    ///
    /// Returns false once the synchronizer has stopped.
    pub fn event(&self, event: RemoteEvent) -> bool {
        self.commands.send(Command::Remote(event)).is_ok()
    }

    /// Report that the connection dropped.
    pub fn disconnected(&self) {
        let _ = self.commands.send(Command::ChannelDown);
    }
}

/// The collaborators one synchronizer talks to.
#[derive(Clone)]
pub struct Remote {
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub channel: Arc<dyn PushChannel>,
    pub mutations: Arc<dyn MutationClient>,
}

impl Remote {
    pub fn new(
        fetcher: impl SnapshotFetcher,
        channel: impl PushChannel,
        mutations: impl MutationClient,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            channel: Arc::new(channel),
            mutations: Arc::new(mutations),
        }
    }
}

/// Run a blocking call on its own thread.
pub(crate) fn spawn_call<T, F>(what: &'static str, f: F) -> Receiver<Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name(format!("livefeed-{}", what))
        .spawn({
            let tx = tx.clone();
            move || {
                let _ = tx.send(f());
            }
        });
    if let Err(e) = spawned {
        let _ = tx.send(Err(FeedError::Network(format!(
            "could not spawn {} call: {}",
            what, e
        ))));
    }
    rx
}

/// Wait for a spawned call, giving up on timeout or cancellation.
///
/// `cancel` fires when its sender is dropped. Pass
/// [`crossbeam_channel::never`] for calls that must not be cancelled.
pub(crate) fn await_call<T>(
    pending: Receiver<Result<T>>,
    timeout: Duration,
    cancel: &Receiver<()>,
    what: &'static str,
) -> Result<T> {
    select! {
        recv(pending) -> result => result.unwrap_or_else(|_| {
            Err(FeedError::Network(format!("{} call aborted", what)))
        }),
        recv(cancel) -> _ => Err(FeedError::Stopped),
        default(timeout) => Err(FeedError::Network(format!(
            "{} timed out after {:?}",
            what, timeout
        ))),
    }
}

/// [`spawn_call`] followed by [`await_call`].
pub(crate) fn call_bounded<T, F>(
    what: &'static str,
    timeout: Duration,
    cancel: &Receiver<()>,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    await_call(spawn_call(what, f), timeout, cancel, what)
}
