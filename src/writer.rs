//! The single writer that owns all changes to a feed's state.
//!
//! Every snapshot landing, push event, local mutation and channel signal is
//! a [`Command`] on one queue. Network calls run on helper threads and
//! re-enter the queue as completion commands, so the collection is changed
//! strictly in dequeue order and the writer itself never blocks on I/O.

use crate::channel::{self, ReconnectPolicy};
use crate::error::{FeedError, Result};
use crate::remote::{self, Remote};
use crate::session::Session;
use crate::state::{FeedState, MergeOutcome, ReadStart};
use crate::subscriptions::SubscriptionManager;
use crate::types::{ConnectionState, FeedItem, FeedStatus, ItemId, RemoteEvent, Revision};
use crossbeam_channel::{never, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type Reply<T> = Sender<Result<T>>;

/// Local mutation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mutation {
    MarkRead,
    Delete,
}

impl Mutation {
    fn name(self) -> &'static str {
        match self {
            Mutation::MarkRead => "mark-read",
            Mutation::Delete => "delete",
        }
    }
}

/// Work item for the writer.
///
/// Dropping a command drops its reply sender, which callers observe as
/// [`FeedError::Stopped`].
pub(crate) enum Command {
    Remote(RemoteEvent),
    ChannelDown,
    ChannelRetrying { attempt: u32 },
    ChannelUp,
    /// The handshake made by `start` completed.
    ChannelJoined {
        reply: Reply<()>,
    },
    ChannelFailed(FeedError),
    Refresh {
        reply: Reply<()>,
    },
    SnapshotLanded {
        marker: Revision,
        result: Result<Vec<FeedItem>>,
        reply: Reply<()>,
    },
    Mutate {
        op: Mutation,
        id: ItemId,
        reply: Reply<()>,
    },
    MutationSettled {
        op: Mutation,
        id: ItemId,
        result: Result<()>,
        reply: Reply<()>,
    },
    Send {
        payload: Value,
        reply: Reply<FeedItem>,
    },
    SendSettled {
        result: Result<FeedItem>,
        reply: Reply<FeedItem>,
    },
    Stop,
}

/// State that readers see.
pub(crate) struct Shared {
    pub state: RwLock<FeedState>,
    pub health: Mutex<Health>,
    pub subscriptions: Arc<SubscriptionManager>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Health {
    pub degraded: bool,
    pub connection: ConnectionState,
}

impl Shared {
    pub fn new(state: FeedState, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            state: RwLock::new(state),
            health: Mutex::new(Health {
                degraded: false,
                connection: ConnectionState::Connecting,
            }),
            subscriptions,
        }
    }

    pub fn status(&self) -> FeedStatus {
        let health = *self.health.lock();
        let state = self.state.read();
        FeedStatus {
            synced: state.is_synced(),
            degraded: health.degraded,
            connection: health.connection,
            revision: state.revision(),
        }
    }

    pub fn set_connection(&self, connection: ConnectionState) {
        {
            let mut health = self.health.lock();
            if health.connection == connection {
                return;
            }
            health.connection = connection;
        }
        self.subscriptions.broadcast_connectivity(connection);
    }

    fn set_degraded(&self, degraded: bool) {
        self.health.lock().degraded = degraded;
    }

    /// Notify subscribers about a state change.
    fn publish(&self, outcome: MergeOutcome) {
        if outcome.changed {
            let (revision, len, unread) = {
                let state = self.state.read();
                (state.revision(), state.len(), state.unread_count())
            };
            self.subscriptions.broadcast_changed(revision, len, unread);
        }
        self.subscriptions.broadcast_arrived(outcome.arrived);
    }
}

pub(crate) struct Writer {
    pub shared: Arc<Shared>,
    pub remote: Remote,
    pub session: Session,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Completions re-enter through this sender.
    pub commands: Sender<Command>,
    /// Fires when the feed stops.
    pub cancel: Receiver<()>,
    pub reconnecting: bool,
}

impl Writer {
    /// Drain the queue until [`Command::Stop`].
    pub fn run(mut self, queue: Receiver<Command>) {
        while let Ok(command) = queue.recv() {
            if matches!(command, Command::Stop) {
                break;
            }
            self.handle(command);
        }
        tracing::debug!(subject = %self.session.subject(), "writer finished");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Remote(event) => {
                tracing::trace!(kind = event.kind(), id = %event.id(), "push event");
                let outcome = self.shared.state.write().apply_remote(event);
                self.shared.publish(outcome);
            }
            Command::ChannelDown => self.on_channel_down(),
            Command::ChannelRetrying { attempt } => {
                self.shared
                    .set_connection(ConnectionState::Reconnecting { attempt });
            }
            Command::ChannelUp => {
                self.reconnecting = false;
                self.shared.set_connection(ConnectionState::Connected);
            }
            Command::ChannelJoined { reply } => {
                // A drop reported while the first snapshot was loading has
                // already handed the channel to the reconnect loop.
                if !self.reconnecting {
                    tracing::info!(subject = %self.session.subject(), "push channel joined");
                    self.shared.set_connection(ConnectionState::Connected);
                }
                let _ = reply.send(Ok(()));
            }
            Command::ChannelFailed(e) => {
                tracing::warn!(error = %e, "push channel failed");
                self.reconnecting = false;
                self.shared.set_connection(ConnectionState::Failed);
            }
            Command::Refresh { reply } => self.begin_refresh(reply),
            Command::SnapshotLanded {
                marker,
                result,
                reply,
            } => self.on_snapshot(marker, result, reply),
            Command::Mutate { op, id, reply } => self.begin_mutation(op, id, reply),
            Command::MutationSettled {
                op,
                id,
                result,
                reply,
            } => self.on_mutation_settled(op, id, result, reply),
            Command::Send { payload, reply } => self.begin_send(payload, reply),
            Command::SendSettled { result, reply } => self.on_send_settled(result, reply),
            Command::Stop => {}
        }
    }

    fn on_channel_down(&mut self) {
        if self.reconnecting {
            return;
        }
        tracing::info!(subject = %self.session.subject(), "push channel disconnected");
        self.reconnecting = true;
        self.shared
            .set_connection(ConnectionState::Reconnecting { attempt: 1 });
        channel::spawn_reconnect(
            self.remote.clone(),
            self.session.clone(),
            self.reconnect,
            self.cancel.clone(),
            self.commands.clone(),
        );
    }

    fn begin_refresh(&mut self, reply: Reply<()>) {
        let marker = self.shared.state.read().begin_fetch();
        let fetcher = Arc::clone(&self.remote.fetcher);
        let session = self.session.clone();
        let timeout = self.request_timeout;
        let cancel = self.cancel.clone();
        let commands = self.commands.clone();

        tracing::debug!(marker = marker.0, "fetching snapshot");
        let pending = remote::spawn_call("snapshot", move || fetcher.fetch_snapshot(&session));
        let spawned = std::thread::Builder::new()
            .name("livefeed-snapshot-wait".to_string())
            .spawn(move || {
                let result = remote::await_call(pending, timeout, &cancel, "snapshot");
                let _ = commands.send(Command::SnapshotLanded {
                    marker,
                    result,
                    reply,
                });
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not spawn snapshot wait");
        }
    }

    fn on_snapshot(&mut self, marker: Revision, result: Result<Vec<FeedItem>>, reply: Reply<()>) {
        let result = match result {
            Ok(items) => {
                let count = items.len();
                let outcome = self.shared.state.write().reconcile(marker, items);
                self.shared.set_degraded(false);
                tracing::info!(items = count, "snapshot applied");
                self.shared.publish(outcome);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot fetch failed");
                if e.is_retryable() {
                    self.shared.set_degraded(true);
                }
                Err(e)
            }
        };
        let _ = reply.send(result);
    }

    fn begin_mutation(&mut self, op: Mutation, id: ItemId, reply: Reply<()>) {
        let started = {
            let mut state = self.shared.state.write();
            match op {
                Mutation::MarkRead => state.begin_mark_read(&id) == ReadStart::Started,
                Mutation::Delete => state.begin_delete(&id),
            }
        };

        if !started {
            // Already in the desired state.
            let _ = reply.send(Ok(()));
            return;
        }
        self.shared.publish(MergeOutcome {
            changed: true,
            arrived: Vec::new(),
        });

        let mutations = Arc::clone(&self.remote.mutations);
        let session = self.session.clone();
        let timeout = self.request_timeout;
        let commands = self.commands.clone();
        let call_id = id.clone();

        let pending = remote::spawn_call(op.name(), move || match op {
            Mutation::MarkRead => mutations.mark_read(&session, &call_id),
            Mutation::Delete => mutations.delete(&session, &call_id),
        });
        // Mutations run to completion even if the feed stops meanwhile.
        let spawned = std::thread::Builder::new()
            .name("livefeed-mutation-wait".to_string())
            .spawn(move || {
                let result = remote::await_call(pending, timeout, &never(), op.name());
                let _ = commands.send(Command::MutationSettled {
                    op,
                    id,
                    result,
                    reply,
                });
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not spawn mutation wait");
        }
    }

    fn begin_send(&mut self, payload: Value, reply: Reply<FeedItem>) {
        let mutations = Arc::clone(&self.remote.mutations);
        let session = self.session.clone();
        let timeout = self.request_timeout;
        let commands = self.commands.clone();

        let pending = remote::spawn_call("send", move || mutations.send(&session, &payload));
        let spawned = std::thread::Builder::new()
            .name("livefeed-send-wait".to_string())
            .spawn(move || {
                let result = remote::await_call(pending, timeout, &never(), "send");
                let _ = commands.send(Command::SendSettled { result, reply });
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not spawn send wait");
        }
    }

    /// Admit the server's copy as if it had been pushed, so the echo that
    /// follows on the channel is a duplicate create.
    fn on_send_settled(&mut self, result: Result<FeedItem>, reply: Reply<FeedItem>) {
        let result = match result {
            Ok(item) => {
                let event = RemoteEvent::Created { item: item.clone() };
                let outcome = self.shared.state.write().apply_remote(event);
                self.shared.publish(outcome);
                Ok(item)
            }
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                Err(e)
            }
        };
        let _ = reply.send(result);
    }

    fn on_mutation_settled(&mut self, op: Mutation, id: ItemId, result: Result<()>, reply: Reply<()>) {
        let result = match result {
            Err(FeedError::Conflict(_)) => Ok(()),
            other => other,
        };
        let confirmed = result.is_ok();

        let (outcome, still_pending) = {
            let mut state = self.shared.state.write();
            match op {
                Mutation::MarkRead => {
                    let pending = state.is_read_pending(&id);
                    (state.settle_mark_read(&id, confirmed), pending)
                }
                Mutation::Delete => {
                    let pending = state.is_delete_pending(&id);
                    (state.settle_delete(&id, confirmed), pending)
                }
            }
        };

        let result = match result {
            // The item left the collection while the call was in flight.
            Err(_) if !still_pending => Ok(()),
            Err(e) => {
                tracing::warn!(op = op.name(), id = %id, error = %e, "mutation failed, rolled back");
                Err(e)
            }
            Ok(()) => Ok(()),
        };

        self.shared.publish(outcome);
        let _ = reply.send(result);
    }
}
