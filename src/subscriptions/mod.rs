//! Change notifications for the presentation layer.
//!
//! Subscribers receive:
//! - Collection changes (re-read the view)
//! - Newly arrived item ids
//! - Push channel connectivity changes
//!
//! Buffers are bounded; a subscriber that falls behind is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = feed.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::arrivals(),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(FeedEvent::ItemsArrived { ids }) => play_sound(ids.len()),
//!         Ok(FeedEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, FeedEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
