//! Main LiveFeed struct tying all components together.

use crate::backoff::Backoff;
use crate::channel::{self, ReconnectPolicy};
use crate::error::{FeedError, Result};
use crate::remote::{self, ChannelSink, Remote};
use crate::session::Session;
use crate::state::{FeedState, StateLimits};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::types::{ConnectionState, FeedItem, FeedStatus, ItemId, RemoteEvent};
use crate::writer::{Command, Mutation, Shared, Writer};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Synchronizer configuration.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Bound on each snapshot, handshake, reconnect and mutation call.
    /// Expiry is a network error.
    /// Default: 10s
    pub request_timeout: Duration,

    /// First reconnect delay; doubles per attempt.
    /// Default: 500ms
    pub backoff_base: Duration,

    /// Reconnect delay cap.
    /// Default: 30s
    pub backoff_max: Duration,

    /// Reconnect attempts before giving up (None = until stopped).
    pub max_reconnect_attempts: Option<u32>,

    /// Max updates buffered for ids not yet seen.
    /// Default: 256
    pub max_buffered_updates: usize,

    /// Max remembered deletions.
    /// Default: 1024
    pub max_tombstones: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            max_reconnect_attempts: None,
            max_buffered_updates: 256,
            max_tombstones: 1024,
        }
    }
}

impl FeedConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_max)
    }

    pub fn limits(&self) -> StateLimits {
        StateLimits {
            max_buffered_updates: self.max_buffered_updates,
            max_tombstones: self.max_tombstones,
        }
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: self.backoff(),
            max_attempts: self.max_reconnect_attempts,
            attempt_timeout: self.request_timeout,
        }
    }
}

/// A live, synchronized feed for one session.
///
/// Provides:
/// - A read-only, newest-first view of the collection
/// - Manual refresh against the snapshot source
/// - Optimistic mark-read and delete with rollback
/// - Change and connectivity subscriptions
///
/// All state changes go through a single writer thread; readers never
/// block it for longer than a clone of the view.
pub struct LiveFeed {
    session: Session,
    remote: Remote,
    config: FeedConfig,
    shared: Arc<Shared>,
    commands: Sender<Command>,
    /// Dropped on stop to cancel fetches and reconnect timers.
    cancel: Mutex<Option<Sender<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl LiveFeed {
    /// Start synchronizing the session's feed.
    ///
    /// The first snapshot fetch and the channel handshake run concurrently,
    /// together bounded by one `request_timeout`.
    /// A rejected credential from either fails the start. A network failure
    /// of the fetch leaves the feed running but degraded; a network failure
    /// of the handshake hands the channel to the reconnect loop.
    pub fn start(session: Session, remote: Remote, config: FeedConfig) -> Result<Self> {
        Self::start_with(session, remote, config, Arc::new(SubscriptionManager::new()))
    }

    fn start_with(
        session: Session,
        remote: Remote,
        config: FeedConfig,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Result<Self> {
        tracing::info!(subject = %session.subject(), "starting live feed");

        let shared = Arc::new(Shared::new(FeedState::new(config.limits()), subscriptions));
        shared.subscriptions.broadcast_connectivity(ConnectionState::Connecting);

        let (commands, queue) = unbounded();
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        let writer = Writer {
            shared: Arc::clone(&shared),
            remote: remote.clone(),
            session: session.clone(),
            request_timeout: config.request_timeout,
            reconnect: config.reconnect_policy(),
            commands: commands.clone(),
            cancel: cancel_rx.clone(),
            reconnecting: false,
        };
        let handle = thread::Builder::new()
            .name("livefeed-writer".to_string())
            .spawn(move || writer.run(queue))
            .map_err(|e| FeedError::Network(format!("could not spawn writer: {}", e)))?;

        let feed = Self {
            session: session.clone(),
            remote: remote.clone(),
            config,
            shared,
            commands: commands.clone(),
            cancel: Mutex::new(Some(cancel_tx)),
            writer: Mutex::new(Some(handle)),
        };

        let deadline = Instant::now() + feed.config.request_timeout;
        let handshake = {
            let remote = remote.clone();
            let session = session.clone();
            let sink = ChannelSink::new(commands.clone());
            remote::spawn_call("handshake", move || channel::connect(&remote, &session, sink))
        };
        let fetched = feed.refresh();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let handshake = remote::await_call(handshake, remaining, &cancel_rx, "handshake");

        for result in [&fetched, &handshake] {
            if let Err(e) = result {
                if e.is_auth() {
                    tracing::warn!(error = %e, "session rejected");
                    feed.stop();
                    return Err(e.clone());
                }
            }
        }

        match handshake {
            Ok(()) => feed.request(|reply| Command::ChannelJoined { reply })?,
            Err(e) => {
                tracing::warn!(error = %e, "push channel handshake failed");
                let _ = commands.send(Command::ChannelDown);
            }
        }
        if let Err(e) = fetched {
            tracing::warn!(error = %e, "starting degraded");
        }

        Ok(feed)
    }

    /// Stop and start again with a new session, keeping subscribers.
    pub fn restart(&mut self, session: Session) -> Result<()> {
        self.stop();
        let subscriptions = Arc::clone(&self.shared.subscriptions);
        *self = Self::start_with(session, self.remote.clone(), self.config.clone(), subscriptions)?;
        Ok(())
    }

    /// Tear down the channel and discard state. Idempotent.
    ///
    /// In-flight fetches are abandoned. In-flight mutations complete, but
    /// their callers get [`FeedError::Stopped`].
    pub fn stop(&self) {
        let Some(cancel) = self.cancel.lock().take() else {
            return;
        };
        drop(cancel);

        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("writer thread panicked");
            }
        }

        self.remote.channel.close();
        self.shared.state.write().clear();
        self.shared.set_connection(ConnectionState::Closed);
        tracing::info!(subject = %self.session.subject(), "live feed stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.lock().is_none()
    }

    // --- Operations ---

    /// Re-fetch the snapshot and reconcile. Returns once applied.
    pub fn refresh(&self) -> Result<()> {
        self.request(|reply| Command::Refresh { reply })
    }

    /// Merge one push event. Never blocks; ignored once stopped.
    pub fn apply_remote_event(&self, event: RemoteEvent) {
        let _ = self.commands.send(Command::Remote(event));
    }

    /// Mark an item read, optimistically.
    ///
    /// The flag is visible immediately. If the server call fails the flag is
    /// restored and the error returned. Absent or already-read items succeed
    /// without a call.
    pub fn mark_read(&self, id: &ItemId) -> Result<()> {
        self.mutate(Mutation::MarkRead, id)
    }

    /// Delete an item, optimistically.
    ///
    /// The item disappears immediately and comes back if the server call
    /// fails. Absent items succeed without a call.
    pub fn delete(&self, id: &ItemId) -> Result<()> {
        self.mutate(Mutation::Delete, id)
    }

    fn mutate(&self, op: Mutation, id: &ItemId) -> Result<()> {
        let id = id.clone();
        self.request(move |reply| Command::Mutate { op, id, reply })
    }

    /// Create an item on the server, e.g. post a chat message.
    ///
    /// The returned copy is admitted at once; its later echo on the push
    /// channel is a duplicate and changes nothing. Nothing is shown before
    /// the server answers.
    pub fn send(&self, payload: Value) -> Result<FeedItem> {
        self.request(move |reply| Command::Send { payload, reply })
    }

    /// Enqueue a command and wait for its reply.
    fn request<T, F>(&self, make: F) -> Result<T>
    where
        F: FnOnce(Sender<Result<T>>) -> Command,
    {
        if self.is_stopped() {
            return Err(FeedError::Stopped);
        }
        let (reply, response) = bounded(1);
        self.commands
            .send(make(reply))
            .map_err(|_| FeedError::Stopped)?;
        response.recv().unwrap_or(Err(FeedError::Stopped))
    }

    // --- View ---

    /// Items newest-first.
    pub fn items(&self) -> Vec<FeedItem> {
        self.shared.state.read().items()
    }

    pub fn get(&self, id: &ItemId) -> Option<FeedItem> {
        self.shared.state.read().get(id)
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.read().is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.shared.state.read().unread_count()
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.status()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.shared.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.subscriptions.unsubscribe(id)
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
