//! Snapshot reconciliation.

use super::feed::{Entry, FeedState, MergeOutcome};
use crate::types::{FeedItem, ItemId, Revision};
use std::collections::HashSet;

impl FeedState {
    /// Record the fetch marker for a snapshot request about to be issued.
    pub fn begin_fetch(&self) -> Revision {
        self.clock
    }

    /// Merge a full snapshot fetched after `marker` was recorded.
    ///
    /// Entries stamped after the marker were changed by events the snapshot
    /// may not reflect and are kept as they are. Everything else follows
    /// the snapshot, including removal of items it no longer lists.
    pub fn reconcile(&mut self, marker: Revision, snapshot: Vec<FeedItem>) -> MergeOutcome {
        let first_sync = !self.synced;

        // Deletions older than the fetch are reflected by the snapshot itself.
        let expired: Vec<ItemId> = self
            .tombstones
            .iter()
            .filter(|(_, rev)| **rev <= marker)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.tombstones.pop(id);
        }

        let mut seen = HashSet::with_capacity(snapshot.len());
        let snapshot: Vec<FeedItem> = snapshot
            .into_iter()
            .filter(|item| seen.insert(item.id.clone()))
            .collect();

        let stale: Vec<ItemId> = self
            .entries
            .iter()
            .filter(|(id, entry)| entry.revision <= marker && !seen.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        let mut changed = !stale.is_empty();
        for id in &stale {
            self.entries.remove(id);
        }

        let mut arrived = Vec::new();
        // Snapshots list newest first; admit in reverse so ties keep that order.
        for incoming in snapshot.into_iter().rev() {
            let id = incoming.id.clone();

            if self.tombstones.contains(&id) {
                continue;
            }

            if let Some(shadow) = self.pending_deletes.get_mut(&id) {
                if shadow.revision <= marker {
                    shadow.absorb_item(incoming);
                }
                continue;
            }

            let buffered = self.buffered.pop(&id).filter(|b| b.revision > marker);

            match self.entries.get(&id).map(|e| e.revision) {
                Some(revision) if revision > marker => {
                    // Already newer than the snapshot.
                    if let Some(buffered) = buffered.filter(|b| b.revision > revision) {
                        let revision = self.tick();
                        if let Some(entry) = self.entries.get_mut(&id) {
                            buffered.apply_to(entry);
                            entry.revision = revision;
                        }
                        changed = true;
                    }
                    continue;
                }
                Some(_) => {
                    let revision = self.tick();
                    if let Some(entry) = self.entries.get_mut(&id) {
                        entry.absorb_item(incoming);
                        if let Some(buffered) = buffered {
                            buffered.apply_to(entry);
                        }
                        entry.revision = revision;
                    }
                }
                None => {
                    let revision = self.tick();
                    let arrival = self.next_arrival();
                    let mut entry = Entry {
                        item: incoming,
                        revision,
                        arrival,
                        pending_read: None,
                    };
                    if let Some(buffered) = buffered {
                        buffered.apply_to(&mut entry);
                    }
                    self.entries.insert(id.clone(), entry);
                    arrived.push(id);
                }
            }
            changed = true;
        }

        let expired_updates: Vec<ItemId> = self
            .buffered
            .iter()
            .filter(|(_, b)| b.revision <= marker)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired_updates {
            self.buffered.pop(id);
        }

        self.synced = true;
        tracing::debug!(
            marker = marker.0,
            items = self.entries.len(),
            removed = stale.len(),
            admitted = arrived.len(),
            tombstones_cleared = expired.len(),
            "reconciled snapshot"
        );

        // The first load is not news.
        if first_sync {
            arrived.clear();
        }
        MergeOutcome {
            changed: changed || first_sync,
            arrived,
        }
    }
}
