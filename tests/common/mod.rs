//! Shared fixtures: an in-memory engine with a recording outbound sender and
//! fake media transport.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chorus::delivery::FailureReason;
use chorus::media::{
    FetchedMedia, MediaError, MediaFetch, MediaLimits, MediaRelocator, MediaStore, RetryPolicy,
};
use chorus::orchestrator::{Engine, EngineOptions, OutboundSend, SendOutcome};
use chorus::roster;
use chorus::storage::Storage;

/// One captured outbound send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub body: String,
    pub media_urls: Vec<String>,
    pub provider_sid: String,
}

/// Records every send; destinations listed in `fail` are rejected.
pub struct RecordingSender {
    pub sent: Mutex<Vec<SentMessage>>,
    fail: Vec<String>,
    counter: AtomicU64,
}

impl RecordingSender {
    pub fn new(fail: Vec<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail,
            counter: AtomicU64::new(0),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl OutboundSend for RecordingSender {
    fn send(&self, to: &str, body: &str, media_urls: &[String]) -> SendOutcome {
        if self.fail.iter().any(|f| f == to) {
            return SendOutcome::Failed(FailureReason::CarrierRejected);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let provider_sid = format!("SM{n:04}");
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
            media_urls: media_urls.to_vec(),
            provider_sid: provider_sid.clone(),
        });
        SendOutcome::Delivered {
            provider_sid: Some(provider_sid),
        }
    }
}

/// Serves canned bytes; fails the first `failures` fetches, and always fails
/// URLs containing `poison`.
pub struct FlakyFetcher {
    pub content_type: String,
    pub bytes: Vec<u8>,
    failures: AtomicU32,
    poison: Option<String>,
}

impl FlakyFetcher {
    pub fn new(content_type: &str, bytes: Vec<u8>, failures: u32) -> Self {
        Self {
            content_type: content_type.to_string(),
            bytes,
            failures: AtomicU32::new(failures),
            poison: None,
        }
    }

    pub fn with_poison(mut self, substring: &str) -> Self {
        self.poison = Some(substring.to_string());
        self
    }
}

impl MediaFetch for FlakyFetcher {
    fn fetch(&self, source_url: &str) -> Result<FetchedMedia, MediaError> {
        if let Some(poison) = &self.poison {
            if source_url.contains(poison.as_str()) {
                return Err(MediaError::Fetch("connection reset".to_string()));
            }
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MediaError::Fetch("timed out".to_string()));
        }
        Ok(FetchedMedia {
            bytes: self.bytes.clone(),
            content_type: self.content_type.clone(),
        })
    }
}

/// Keeps stored objects in memory and hands out stable fake public URLs.
#[derive(Default)]
pub struct MemoryStore {
    pub stored: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MediaStore for MemoryStore {
    fn store(&self, key: &str, _content_type: &str, bytes: &[u8]) -> Result<String, MediaError> {
        self.stored
            .lock()
            .unwrap()
            .push((key.to_string(), bytes.to_vec()));
        Ok(format!("https://cdn.test/{key}"))
    }
}

pub struct TestHarness {
    pub engine: Arc<Engine>,
    pub storage: Arc<Mutex<Storage>>,
    pub sender: Arc<RecordingSender>,
    pub store: Arc<MemoryStore>,
}

/// Build an engine over seeded in-memory storage.
pub fn harness(fail: Vec<String>, fetcher: Arc<dyn MediaFetch>, retry: RetryPolicy) -> TestHarness {
    let storage = Storage::open_in_memory().expect("open storage");
    roster::seed_default_groups(&storage).expect("seed groups");
    let storage = Arc::new(Mutex::new(storage));

    let sender = Arc::new(RecordingSender::new(fail));
    let store = Arc::new(MemoryStore::default());
    let relocator = Arc::new(MediaRelocator::new(
        fetcher,
        Arc::clone(&store) as Arc<dyn MediaStore>,
        MediaLimits::default(),
        retry,
    ));

    let engine = Arc::new(Engine::new(
        Arc::clone(&storage),
        Arc::clone(&sender) as Arc<dyn OutboundSend>,
        relocator,
        EngineOptions {
            default_group: 1,
            fanout_concurrency: 4,
        },
    ));

    TestHarness {
        engine,
        storage,
        sender,
        store,
    }
}

/// Harness with media transport that always succeeds instantly.
pub fn text_harness(fail: Vec<String>) -> TestHarness {
    harness(
        fail,
        Arc::new(FlakyFetcher::new("image/jpeg", vec![1, 2, 3], 0)),
        RetryPolicy {
            max_attempts: 1,
            backoff: Vec::new(),
        },
    )
}
