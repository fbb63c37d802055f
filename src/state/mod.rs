//! Keyed feed state and the merge algorithm.
//!
//! [`FeedState`] is a plain, synchronous value: every snapshot landing,
//! push event and optimistic mutation is one method call. Ordering and
//! thread ownership are the writer's concern, which keeps the merge rules
//! deterministic and directly testable.
//!
//! Conflicts are resolved with a local revision clock. Every change stamps
//! the touched entry with the next revision, and a snapshot fetch records
//! the clock value at initiation (the fetch marker). On landing, anything
//! stamped after the marker is newer than the snapshot and survives.

mod feed;
mod reconcile;

pub use feed::{FeedState, MergeOutcome, ReadStart, StateLimits};
