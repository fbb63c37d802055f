//! Subscription types for live feed updates.

use crate::types::{ConnectionState, ItemId, Revision};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Which events a subscriber wants.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Collection changed.
    pub include_changes: bool,

    /// New items admitted.
    pub include_arrivals: bool,

    /// Push channel connectivity.
    pub include_connectivity: bool,
}

impl SubscriptionFilter {
    pub fn changes() -> Self {
        Self {
            include_changes: true,
            ..Default::default()
        }
    }

    /// Only new-item notifications (e.g. to play a sound).
    pub fn arrivals() -> Self {
        Self {
            include_arrivals: true,
            ..Default::default()
        }
    }

    pub fn connectivity() -> Self {
        Self {
            include_connectivity: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            include_changes: true,
            include_arrivals: true,
            include_connectivity: true,
        }
    }
}

/// Events emitted to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// The visible collection changed; re-read it.
    Changed {
        revision: Revision,
        len: usize,
        unread: usize,
    },

    /// Ids admitted for the first time since the last full load.
    ItemsArrived { ids: Vec<ItemId> },

    /// Push channel connectivity changed.
    Connectivity { state: ConnectionState },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<FeedEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<FeedEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
