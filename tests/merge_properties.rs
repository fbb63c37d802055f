//! Property tests for the merge rules.

use livefeed::{FeedItem, FeedState, ItemId, RemoteEvent, Timestamp};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

#[derive(Clone, Debug)]
enum Op {
    Create { id: u8, version: u8, ts: i64 },
    Update { id: u8, version: u8 },
    Read { id: u8 },
    Delete { id: u8 },
}

fn item(id: u8, version: u8, ts: i64) -> FeedItem {
    FeedItem::new(ItemId::from(id as u64), json!({ "v": version }), Timestamp(ts))
}

impl Op {
    fn event(&self) -> RemoteEvent {
        match *self {
            Op::Create { id, version, ts } => RemoteEvent::Created {
                item: item(id, version, ts),
            },
            Op::Update { id, version } => RemoteEvent::Updated {
                item: item(id, version, 0),
            },
            Op::Read { id } => RemoteEvent::Read {
                id: ItemId::from(id as u64),
            },
            Op::Delete { id } => RemoteEvent::Deleted {
                id: ItemId::from(id as u64),
            },
        }
    }
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, any::<u8>(), 0i64..5).prop_map(|(id, version, ts)| Op::Create { id, version, ts }),
        (0u8..6, any::<u8>()).prop_map(|(id, version)| Op::Update { id, version }),
        (0u8..6).prop_map(|id| Op::Read { id }),
        (0u8..6).prop_map(|id| Op::Delete { id }),
    ]
}

fn snapshot() -> impl Strategy<Value = Vec<(u8, u8, bool)>> {
    prop::collection::vec((0u8..6, any::<u8>(), any::<bool>()), 0..6)
}

fn apply_all(state: &mut FeedState, ops: &[Op]) {
    for op in ops {
        state.apply_remote(op.event());
    }
}

fn assert_well_formed(state: &FeedState) {
    let items = state.items();
    let ids: HashSet<&ItemId> = items.iter().map(|i| &i.id).collect();
    assert_eq!(ids.len(), items.len(), "duplicate ids in view");
    assert_eq!(items.len(), state.len());
    for pair in items.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at, "view not newest-first");
    }
}

proptest! {
    #[test]
    fn prop_one_entry_per_id(ops in prop::collection::vec(op(), 0..60)) {
        let mut state = FeedState::default();
        apply_all(&mut state, &ops);
        assert_well_formed(&state);
    }

    #[test]
    fn prop_duplicate_creates_are_idempotent(ops in prop::collection::vec(op(), 0..40)) {
        let mut once = FeedState::default();
        apply_all(&mut once, &ops);

        let mut twice = FeedState::default();
        for op in &ops {
            twice.apply_remote(op.event());
            if matches!(op, Op::Create { .. }) {
                twice.apply_remote(op.event());
            }
        }

        prop_assert_eq!(once.items(), twice.items());
    }

    #[test]
    fn prop_tombstone_beats_recreate(
        ops in prop::collection::vec(op(), 0..40),
        id in 0u8..6,
        version in any::<u8>(),
    ) {
        let mut state = FeedState::default();
        apply_all(&mut state, &ops);

        state.apply_remote(Op::Delete { id }.event());
        state.apply_remote(Op::Create { id, version, ts: 1 }.event());
        state.apply_remote(Op::Update { id, version }.event());

        prop_assert!(!state.contains(&ItemId::from(id as u64)));
    }

    #[test]
    fn prop_read_flag_is_monotonic(ops in prop::collection::vec(op(), 0..60)) {
        let mut state = FeedState::default();
        let mut read: HashSet<ItemId> = HashSet::new();

        for op in &ops {
            state.apply_remote(op.event());
            if let Op::Delete { id } = op {
                read.remove(&ItemId::from(*id as u64));
            }
            for id in &read {
                if let Some(current) = state.get(id) {
                    prop_assert!(current.is_read, "{} reverted to unread", id);
                }
            }
            for current in state.items() {
                if current.is_read {
                    read.insert(current.id);
                }
            }
        }
    }

    #[test]
    fn prop_unraced_refresh_matches_snapshot(
        ops in prop::collection::vec(op(), 0..40),
        listing in snapshot(),
    ) {
        let mut state = FeedState::default();
        apply_all(&mut state, &ops);

        let listing: Vec<FeedItem> = listing
            .into_iter()
            .map(|(id, version, is_read)| item(id, version, 0).read(is_read))
            .collect();

        let marker = state.begin_fetch();
        state.reconcile(marker, listing.clone());
        assert_well_formed(&state);

        let mut expected = HashSet::new();
        for incoming in &listing {
            if !expected.insert(incoming.id.clone()) {
                continue;
            }
            let current = state.get(&incoming.id).expect("listed item present");
            prop_assert_eq!(&current.payload, &incoming.payload);
            prop_assert!(current.is_read || !incoming.is_read);
        }
        prop_assert_eq!(state.len(), expected.len());
        prop_assert_eq!(state.buffered_len(), 0);
    }

    #[test]
    fn prop_events_racing_refresh_survive(
        before in prop::collection::vec(op(), 0..20),
        id in 0u8..6,
        version in any::<u8>(),
        listing in snapshot(),
    ) {
        let mut state = FeedState::default();
        apply_all(&mut state, &before);

        let listing: Vec<FeedItem> = listing
            .into_iter()
            .map(|(id, v, is_read)| item(id, v, 0).read(is_read))
            .collect();

        // Start from a clean slate for `id`: deleted, then the tombstone
        // expired by a refresh.
        state.apply_remote(Op::Delete { id }.event());
        let marker = state.begin_fetch();
        state.reconcile(marker, Vec::new());

        // Create while the next fetch is in flight.
        let marker = state.begin_fetch();
        state.apply_remote(Op::Create { id, version, ts: 3 }.event());
        state.reconcile(marker, listing);

        let current = state.get(&ItemId::from(id as u64)).expect("raced create kept");
        prop_assert_eq!(&current.payload, &json!({ "v": version }));
    }
}
