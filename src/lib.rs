//! # Live Feed
//!
//! Keeps a client-side feed (notifications, chat messages, location pings)
//! consistent while snapshots, push events and local optimistic mutations
//! arrive in arbitrary order.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: full listing pulled on start and on manual refresh
//! - **Push events**: created/updated/read/deleted changes from a persistent channel
//! - **Revisions**: a local clock deciding between snapshot and pushed versions
//! - **Tombstones**: suppress stale re-creation of deleted items
//! - **Optimistic mutations**: mark-read and delete, rolled back on failure
//! - **Send**: server-created items (chat messages), deduplicated against their echo
//!
//! ## Example
//!
//! ```ignore
//! use livefeed::{FeedConfig, LiveFeed, Remote, Session};
//!
//! let session = Session::from_bearer_token(&token)?;
//! let feed = LiveFeed::start(
//!     session,
//!     Remote::new(http_fetcher, socket_channel, http_mutations),
//!     FeedConfig::default(),
//! )?;
//!
//! for item in feed.items() {
//!     println!("{} read={}", item.id, item.is_read);
//! }
//!
//! feed.mark_read(&"42".into())?;
//! feed.stop();
//! ```

pub mod backoff;
mod channel;
pub mod error;
pub mod feed;
pub mod remote;
pub mod session;
pub mod state;
pub mod subscriptions;
pub mod types;
pub mod wire;
mod writer;

// Re-exports
pub use backoff::Backoff;
pub use error::{FeedError, Result};
pub use feed::{FeedConfig, LiveFeed};
pub use remote::{ChannelSink, MutationClient, PushChannel, Remote, SnapshotFetcher};
pub use session::Session;
pub use state::{FeedState, MergeOutcome, ReadStart, StateLimits};
pub use subscriptions::{
    DropReason, FeedEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
pub use wire::FeedKind;
