//! Feed collection, push-event merging and optimistic mutations.

use crate::types::{FeedItem, ItemId, RemoteEvent, Revision};
use lru::LruCache;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Capacity limits for the bounded side tables.
#[derive(Clone, Copy, Debug)]
pub struct StateLimits {
    /// Max updates held for ids not yet known.
    pub max_buffered_updates: usize,
    /// Max remembered deletions.
    pub max_tombstones: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            max_buffered_updates: 256,
            max_tombstones: 1024,
        }
    }
}

/// What a state change did, for change notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The visible collection changed.
    pub changed: bool,
    /// Ids admitted to the collection for the first time.
    pub arrived: Vec<ItemId>,
}

impl MergeOutcome {
    pub(super) fn unchanged() -> Self {
        Self::default()
    }

    pub(super) fn changed() -> Self {
        Self {
            changed: true,
            arrived: Vec::new(),
        }
    }

    pub(super) fn arrived(id: ItemId) -> Self {
        Self {
            changed: true,
            arrived: vec![id],
        }
    }
}

/// Result of starting an optimistic mark-read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStart {
    /// Flag flipped locally; the network call must follow.
    Started,
    /// Already read (or already being marked). Nothing to send.
    AlreadyRead,
    /// No such item.
    Missing,
}

/// Local mark-read awaiting its network confirmation.
#[derive(Clone, Debug)]
pub(super) struct PendingRead {
    /// Read flag as last reported by the server.
    pub(super) underlying: bool,
}

#[derive(Clone, Debug)]
pub(super) struct Entry {
    pub(super) item: FeedItem,
    pub(super) revision: Revision,
    /// Admission order, used to break `created_at` ties.
    pub(super) arrival: u64,
    pub(super) pending_read: Option<PendingRead>,
}

impl Entry {
    /// Fold a server-side read flag into the entry.
    ///
    /// The flag only moves towards true. While a local mark-read is in
    /// flight the visible flag stays put and the server value is kept aside.
    pub(super) fn absorb_read(&mut self, remote_read: bool) {
        match self.pending_read.as_mut() {
            Some(pending) => pending.underlying |= remote_read,
            None => self.item.is_read |= remote_read,
        }
    }

    /// Replace content with a server version. `created_at` is immutable.
    pub(super) fn absorb_item(&mut self, incoming: FeedItem) {
        self.item.payload = incoming.payload;
        self.absorb_read(incoming.is_read);
    }
}

/// Update received for an id the collection does not hold yet.
#[derive(Clone, Debug)]
pub(super) struct Buffered {
    pub(super) item: Option<FeedItem>,
    pub(super) read: bool,
    pub(super) revision: Revision,
}

impl Buffered {
    pub(super) fn apply_to(self, entry: &mut Entry) {
        if let Some(item) = self.item {
            entry.absorb_item(item);
        }
        if self.read {
            entry.absorb_read(true);
        }
    }
}

/// The synchronized collection for one session.
pub struct FeedState {
    pub(super) entries: HashMap<ItemId, Entry>,
    /// Shadow copies of items removed by a local delete still in flight.
    pub(super) pending_deletes: HashMap<ItemId, Entry>,
    pub(super) tombstones: LruCache<ItemId, Revision>,
    pub(super) buffered: LruCache<ItemId, Buffered>,
    pub(super) clock: Revision,
    pub(super) arrivals: u64,
    pub(super) synced: bool,
}

impl FeedState {
    pub fn new(limits: StateLimits) -> Self {
        Self {
            entries: HashMap::new(),
            pending_deletes: HashMap::new(),
            tombstones: LruCache::new(capacity(limits.max_tombstones)),
            buffered: LruCache::new(capacity(limits.max_buffered_updates)),
            clock: Revision::default(),
            arrivals: 0,
            synced: false,
        }
    }

    pub(super) fn tick(&mut self) -> Revision {
        self.clock = self.clock.next();
        self.clock
    }

    pub(super) fn next_arrival(&mut self) -> u64 {
        self.arrivals += 1;
        self.arrivals
    }

    // --- Read-only view ---

    /// Items newest-first by `created_at`, later arrivals first on ties.
    pub fn items(&self) -> Vec<FeedItem> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| (Reverse(e.item.created_at), Reverse(e.arrival)));
        entries.into_iter().map(|e| e.item.clone()).collect()
    }

    pub fn get(&self, id: &ItemId) -> Option<FeedItem> {
        self.entries.get(id).map(|e| e.item.clone())
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    /// Local revision of an entry.
    pub fn revision_of(&self, id: &ItemId) -> Option<Revision> {
        self.entries.get(id).map(|e| e.revision)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.values().filter(|e| !e.item.is_read).count()
    }

    /// Current value of the revision clock.
    pub fn revision(&self) -> Revision {
        self.clock
    }

    /// Whether at least one snapshot has been reconciled.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_tombstoned(&self, id: &ItemId) -> bool {
        self.tombstones.contains(id)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_read_pending(&self, id: &ItemId) -> bool {
        self.entries
            .get(id)
            .or_else(|| self.pending_deletes.get(id))
            .map(|e| e.pending_read.is_some())
            .unwrap_or(false)
    }

    pub fn is_delete_pending(&self, id: &ItemId) -> bool {
        self.pending_deletes.contains_key(id)
    }

    /// Drop everything. The revision clock keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending_deletes.clear();
        self.tombstones.clear();
        self.buffered.clear();
        self.synced = false;
    }

    // --- Push events ---

    /// Merge one push event.
    pub fn apply_remote(&mut self, event: RemoteEvent) -> MergeOutcome {
        match event {
            RemoteEvent::Created { item } => self.apply_created(item),
            RemoteEvent::Updated { item } => {
                let id = item.id.clone();
                self.apply_update(id, Some(item), false)
            }
            RemoteEvent::Read { id } => self.apply_update(id, None, true),
            RemoteEvent::Deleted { id } => self.apply_deleted(id),
        }
    }

    fn apply_created(&mut self, item: FeedItem) -> MergeOutcome {
        let id = item.id.clone();

        if self.tombstones.contains(&id) {
            tracing::debug!(id = %id, "ignoring create for deleted item");
            return MergeOutcome::unchanged();
        }
        if self.entries.contains_key(&id) || self.pending_deletes.contains_key(&id) {
            return MergeOutcome::unchanged();
        }

        let revision = self.tick();
        let arrival = self.next_arrival();
        let mut entry = Entry {
            item,
            revision,
            arrival,
            pending_read: None,
        };

        if let Some(buffered) = self.buffered.pop(&id) {
            tracing::debug!(id = %id, "applying buffered update on create");
            buffered.apply_to(&mut entry);
            entry.revision = self.tick();
        }

        self.entries.insert(id.clone(), entry);
        MergeOutcome::arrived(id)
    }

    fn apply_update(&mut self, id: ItemId, item: Option<FeedItem>, read: bool) -> MergeOutcome {
        if self.tombstones.contains(&id) {
            tracing::debug!(id = %id, "ignoring update for deleted item");
            return MergeOutcome::unchanged();
        }

        let revision = self.tick();
        let patch = Buffered { item, read, revision };

        if let Some(entry) = self.entries.get_mut(&id) {
            patch.apply_to(entry);
            entry.revision = revision;
            return MergeOutcome::changed();
        }

        // Keep the shadow current so a rollback restores fresh data.
        if let Some(shadow) = self.pending_deletes.get_mut(&id) {
            patch.apply_to(shadow);
            shadow.revision = revision;
            return MergeOutcome::unchanged();
        }

        tracing::debug!(id = %id, "buffering update for unknown item");
        let merged = match self.buffered.pop(&id) {
            Some(previous) => Buffered {
                item: patch.item.or(previous.item),
                read: patch.read || previous.read,
                revision,
            },
            None => patch,
        };
        if let Some((evicted, _)) = self.buffered.push(id.clone(), merged) {
            if evicted != id {
                tracing::debug!(id = %evicted, "buffered update evicted");
            }
        }
        MergeOutcome::unchanged()
    }

    fn apply_deleted(&mut self, id: ItemId) -> MergeOutcome {
        let removed = self.entries.remove(&id).is_some();
        // A remote delete settles any local delete in flight.
        self.pending_deletes.remove(&id);
        self.buffered.pop(&id);

        let revision = self.tick();
        self.tombstones.put(id, revision);

        if removed {
            MergeOutcome::changed()
        } else {
            MergeOutcome::unchanged()
        }
    }

    // --- Optimistic local mutations ---

    /// Flip the read flag ahead of the network call.
    pub fn begin_mark_read(&mut self, id: &ItemId) -> ReadStart {
        let revision = self.tick();
        let Some(entry) = self.entries.get_mut(id) else {
            return ReadStart::Missing;
        };
        if entry.item.is_read {
            return ReadStart::AlreadyRead;
        }

        entry.pending_read = Some(PendingRead { underlying: false });
        entry.item.is_read = true;
        entry.revision = revision;
        ReadStart::Started
    }

    /// Confirm or roll back a mark-read started with [`begin_mark_read`].
    ///
    /// [`begin_mark_read`]: FeedState::begin_mark_read
    pub fn settle_mark_read(&mut self, id: &ItemId, confirmed: bool) -> MergeOutcome {
        let revision = self.tick();
        let visible = self.entries.contains_key(id);
        let Some(entry) = self
            .entries
            .get_mut(id)
            .or_else(|| self.pending_deletes.get_mut(id))
        else {
            return MergeOutcome::unchanged();
        };
        let Some(pending) = entry.pending_read.take() else {
            return MergeOutcome::unchanged();
        };

        let before = entry.item.is_read;
        entry.item.is_read = confirmed || pending.underlying;
        if entry.item.is_read == before {
            return MergeOutcome::unchanged();
        }

        entry.revision = revision;
        if !confirmed {
            tracing::debug!(id = %id, "rolled back optimistic mark-read");
        }
        MergeOutcome {
            changed: visible,
            arrived: Vec::new(),
        }
    }

    /// Remove an item ahead of the network call, keeping a shadow copy.
    ///
    /// Returns false when there is nothing to delete.
    pub fn begin_delete(&mut self, id: &ItemId) -> bool {
        let Some(mut entry) = self.entries.remove(id) else {
            return false;
        };
        entry.revision = self.tick();
        self.pending_deletes.insert(id.clone(), entry);
        true
    }

    /// Confirm or roll back a delete started with [`begin_delete`].
    ///
    /// [`begin_delete`]: FeedState::begin_delete
    pub fn settle_delete(&mut self, id: &ItemId, confirmed: bool) -> MergeOutcome {
        let Some(mut shadow) = self.pending_deletes.remove(id) else {
            // Deleted remotely in the meantime.
            return MergeOutcome::unchanged();
        };

        let revision = self.tick();
        if confirmed {
            self.tombstones.put(id.clone(), revision);
            return MergeOutcome::unchanged();
        }

        tracing::debug!(id = %id, "rolled back optimistic delete");
        shadow.revision = revision;
        self.entries.insert(id.clone(), shadow);
        MergeOutcome::changed()
    }
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new(StateLimits::default())
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}
