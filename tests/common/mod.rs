//! Scriptable collaborators shared by the integration tests.

#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver, Sender};
use livefeed::{
    ChannelSink, FeedConfig, FeedError, FeedItem, ItemId, LiveFeed, MutationClient, PushChannel,
    Remote, RemoteEvent, Result, Session, SnapshotFetcher, SubjectId, Timestamp,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub fn item(id: &str, text: &str, created: i64) -> FeedItem {
    FeedItem::new(id, json!({ "text": text }), Timestamp(created))
}

pub fn id(s: &str) -> ItemId {
    ItemId::new(s)
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn session() -> Session {
    Session::new("token-abc", "user-1")
}

pub fn fast_config() -> FeedConfig {
    FeedConfig {
        request_timeout: Duration::from_millis(500),
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        ..Default::default()
    }
}

/// Round-trip through the writer queue so everything enqueued before has
/// been applied. Marking a missing item is a no-op that still replies.
pub fn settle(feed: &LiveFeed) {
    feed.mark_read(&id("__settle__")).unwrap();
}

/// Poll until `check` holds or two seconds pass.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}

// --- Snapshot fetcher ---

struct FetcherInner {
    responses: Mutex<VecDeque<Result<Vec<FeedItem>>>>,
    fallback: Mutex<Vec<FeedItem>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Receiver<()>>>,
    delay: Mutex<Duration>,
}

/// Returns queued responses first, then the fallback listing.
#[derive(Clone)]
pub struct FakeFetcher {
    inner: Arc<FetcherInner>,
}

impl FakeFetcher {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                responses: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(items),
                calls: AtomicUsize::new(0),
                gate: Mutex::new(None),
                delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn push_response(&self, response: Result<Vec<FeedItem>>) {
        self.inner.responses.lock().push_back(response);
    }

    pub fn set_items(&self, items: Vec<FeedItem>) {
        *self.inner.fallback.lock() = items;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = delay;
    }

    /// Block the next fetch until the returned sender is used or dropped.
    pub fn hold(&self) -> Sender<()> {
        let (tx, rx) = unbounded();
        *self.inner.gate.lock() = Some(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl SnapshotFetcher for FakeFetcher {
    fn fetch_snapshot(&self, _session: &Session) -> Result<Vec<FeedItem>> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.inner.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let delay = *self.inner.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        if let Some(response) = self.inner.responses.lock().pop_front() {
            return response;
        }
        Ok(self.inner.fallback.lock().clone())
    }
}

// --- Push channel ---

struct ChannelInner {
    sink: Mutex<Option<ChannelSink>>,
    connect_result: Mutex<Option<FeedError>>,
    reconnect_results: Mutex<VecDeque<Result<()>>>,
    joined: Mutex<Vec<SubjectId>>,
    reconnects: AtomicUsize,
    closes: AtomicUsize,
    connect_delay: Mutex<Duration>,
}

#[derive(Clone)]
pub struct FakeChannel {
    inner: Arc<ChannelInner>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                sink: Mutex::new(None),
                connect_result: Mutex::new(None),
                reconnect_results: Mutex::new(VecDeque::new()),
                joined: Mutex::new(Vec::new()),
                reconnects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Fail the handshake with this error.
    pub fn fail_connect(&self, error: FeedError) {
        *self.inner.connect_result.lock() = Some(error);
    }

    /// Make the handshake take this long.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock() = delay;
    }

    pub fn push_reconnect_result(&self, result: Result<()>) {
        self.inner.reconnect_results.lock().push_back(result);
    }

    /// Deliver an event as the transport would.
    pub fn push(&self, event: RemoteEvent) {
        let sink = self.inner.sink.lock().clone();
        if let Some(sink) = sink {
            sink.event(event);
        }
    }

    pub fn drop_connection(&self) {
        let sink = self.inner.sink.lock().clone();
        if let Some(sink) = sink {
            sink.disconnected();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.sink.lock().is_some()
    }

    pub fn joined(&self) -> Vec<SubjectId> {
        self.inner.joined.lock().clone()
    }

    pub fn reconnects(&self) -> usize {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

impl PushChannel for FakeChannel {
    fn connect(&self, _session: &Session, sink: ChannelSink) -> Result<()> {
        *self.inner.sink.lock() = Some(sink);
        let delay = *self.inner.connect_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        match self.inner.connect_result.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn join(&self, subject: &SubjectId) -> Result<()> {
        self.inner.joined.lock().push(subject.clone());
        Ok(())
    }

    fn reconnect(&self, _session: &Session) -> Result<()> {
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);
        self.inner
            .reconnect_results
            .lock()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Mutations ---

struct MutationsInner {
    results: Mutex<VecDeque<Result<()>>>,
    calls: Mutex<Vec<(&'static str, ItemId)>>,
    gate: Mutex<Option<Receiver<()>>>,
    sent: AtomicUsize,
}

#[derive(Clone)]
pub struct FakeMutations {
    inner: Arc<MutationsInner>,
}

impl FakeMutations {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MutationsInner {
                results: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
                gate: Mutex::new(None),
                sent: AtomicUsize::new(0),
            }),
        }
    }

    /// Result of the next call; later calls succeed.
    pub fn push_result(&self, result: Result<()>) {
        self.inner.results.lock().push_back(result);
    }

    /// Block the next call until the returned sender is used or dropped.
    pub fn hold(&self) -> Sender<()> {
        let (tx, rx) = unbounded();
        *self.inner.gate.lock() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<(&'static str, ItemId)> {
        self.inner.calls.lock().clone()
    }

    fn call(&self, op: &'static str, id: &ItemId) -> Result<()> {
        self.inner.calls.lock().push((op, id.clone()));
        let gate = self.inner.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.inner.results.lock().pop_front().unwrap_or(Ok(()))
    }
}

impl MutationClient for FakeMutations {
    fn mark_read(&self, _session: &Session, id: &ItemId) -> Result<()> {
        self.call("mark_read", id)
    }

    fn delete(&self, _session: &Session, id: &ItemId) -> Result<()> {
        self.call("delete", id)
    }

    /// Stores the payload under the next `sent-N` id.
    fn send(&self, _session: &Session, payload: &Value) -> Result<FeedItem> {
        let n = self.inner.sent.fetch_add(1, Ordering::SeqCst) + 1;
        let id = ItemId::new(format!("sent-{}", n));
        self.call("send", &id)?;
        Ok(FeedItem::new(id, payload.clone(), Timestamp::now()))
    }
}

/// A fetcher, channel and mutation client wired into one `Remote`.
pub struct Harness {
    pub fetcher: FakeFetcher,
    pub channel: FakeChannel,
    pub mutations: FakeMutations,
}

impl Harness {
    pub fn new(items: Vec<FeedItem>) -> Self {
        init_tracing();
        Self {
            fetcher: FakeFetcher::new(items),
            channel: FakeChannel::new(),
            mutations: FakeMutations::new(),
        }
    }

    pub fn remote(&self) -> Remote {
        Remote::new(
            self.fetcher.clone(),
            self.channel.clone(),
            self.mutations.clone(),
        )
    }

    pub fn start(&self) -> Result<LiveFeed> {
        LiveFeed::start(session(), self.remote(), fast_config())
    }
}
