mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chorus::media::{MediaLimits, MediaRelocator, MediaStore, RetryPolicy};
use chorus::orchestrator::{
    Engine, EngineOptions, InboundMessage, OutboundSend, SendOutcome,
};
use chorus::roster;
use chorus::storage::Storage;

use common::{text_harness, FlakyFetcher, MemoryStore};

fn text_message(from: &str, body: &str) -> InboundMessage {
    InboundMessage {
        sender_address: from.to_string(),
        body: Some(body.to_string()),
        attachments: Vec::new(),
    }
}

#[tokio::test]
async fn broadcast_reaches_every_other_member_exactly_once() {
    let h = text_harness(Vec::new());
    {
        let storage = h.storage.lock().unwrap();
        // Sender and Alice overlap groups 1 and 2; dedup must hold.
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550001", 2, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
        roster::add_member(&storage, "2065550002", 2, "Alice", false).unwrap();
        roster::add_member(&storage, "2065550003", 2, "Bob", false).unwrap();
    }

    let reply = h
        .engine
        .handle_inbound(text_message("2065550001", "potluck moved to 6"))
        .await
        .unwrap()
        .expect("summary reply");
    assert!(reply.contains("sent to 2 member(s)"));

    let sent = h.sender.sent();
    let mut destinations: Vec<&str> = sent.iter().map(|m| m.to.as_str()).collect();
    destinations.sort();
    assert_eq!(destinations, vec!["+12065550002", "+12065550003"]);
    assert!(sent.iter().all(|m| m.body == "Dave: potluck moved to 6"));
}

#[tokio::test]
async fn one_failed_recipient_does_not_block_the_rest() {
    let h = text_harness(vec!["+12065550003".to_string()]);
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
        roster::add_member(&storage, "2065550003", 1, "Bob", false).unwrap();
        roster::add_member(&storage, "2065550004", 1, "Carol", false).unwrap();
    }

    let reply = h
        .engine
        .handle_inbound(text_message("2065550001", "hello all"))
        .await
        .unwrap()
        .expect("summary reply");
    assert!(reply.contains("sent to 2 member(s)"));
    assert!(reply.contains("Failed deliveries: 1"));

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.to != "+12065550003"));
}

#[tokio::test]
async fn delivery_log_has_one_row_per_recipient() {
    let h = text_harness(vec!["+12065550003".to_string()]);
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
        roster::add_member(&storage, "2065550003", 1, "Bob", false).unwrap();
    }

    h.engine
        .handle_inbound(text_message("2065550001", "hello"))
        .await
        .unwrap();

    let storage = h.storage.lock().unwrap();
    let message = storage.recent_messages(1).unwrap();
    assert_eq!(message.len(), 1);

    // Message id 1 is the first broadcast row.
    let rows = storage.deliveries_for_message(1).unwrap();
    assert_eq!(rows.len(), 2);
    let sent: Vec<_> = rows.iter().filter(|r| r.status == "sent").collect();
    let failed: Vec<_> = rows.iter().filter(|r| r.status == "failed").collect();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].provider_sid.is_some());
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason.as_deref(), Some("carrier-rejected"));
}

#[tokio::test]
async fn broadcast_to_empty_roster_is_a_successful_noop() {
    let h = text_harness(Vec::new());

    let reply = h
        .engine
        .handle_inbound(text_message("2065550001", "anyone there?"))
        .await
        .unwrap()
        .expect("reply");
    assert!(reply.contains("No other members"));
    assert!(h.sender.sent().is_empty());

    // The message is still part of the permanent record.
    let storage = h.storage.lock().unwrap();
    assert_eq!(storage.recent_messages(5).unwrap().len(), 1);
}

#[tokio::test]
async fn empty_event_is_a_noop_without_a_message_row() {
    let h = text_harness(Vec::new());
    let reply = h
        .engine
        .handle_inbound(InboundMessage {
            sender_address: "2065550001".to_string(),
            body: Some("   ".to_string()),
            attachments: Vec::new(),
        })
        .await
        .unwrap();
    assert!(reply.is_none());

    let storage = h.storage.lock().unwrap();
    assert!(storage.recent_messages(5).unwrap().is_empty());
}

#[tokio::test]
async fn two_broadcasts_from_a_new_address_create_one_member() {
    let h = text_harness(Vec::new());

    h.engine
        .handle_inbound(text_message("206-555-0100", "first"))
        .await
        .unwrap();
    h.engine
        .handle_inbound(text_message("+1 (206) 555-0100", "second"))
        .await
        .unwrap();

    let storage = h.storage.lock().unwrap();
    assert_eq!(storage.active_member_count().unwrap(), 1);
    let member = storage
        .get_member_by_phone("+12065550100")
        .unwrap()
        .expect("registered");
    assert_eq!(member.name, "Member 0100");
}

/// Succeeds every send but tracks how many are in flight at once.
struct GaugedSender {
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl OutboundSend for GaugedSender {
    fn send(&self, _to: &str, _body: &str, _media_urls: &[String]) -> SendOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        // Long enough that an uncapped fan-out would overlap all workers.
        std::thread::sleep(Duration::from_millis(25));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        SendOutcome::Delivered { provider_sid: None }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_never_exceeds_the_concurrency_cap() {
    let storage = Storage::open_in_memory().expect("open storage");
    roster::seed_default_groups(&storage).expect("seed groups");
    roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
    for i in 0..8 {
        let phone = format!("20655502{i:02}");
        roster::add_member(&storage, &phone, 1, &format!("Member {i}"), false).unwrap();
    }
    let storage = Arc::new(Mutex::new(storage));

    let sender = Arc::new(GaugedSender {
        in_flight: AtomicUsize::new(0),
        high_water: AtomicUsize::new(0),
    });
    let relocator = Arc::new(MediaRelocator::new(
        Arc::new(FlakyFetcher::new("image/jpeg", vec![1], 0)),
        Arc::new(MemoryStore::default()) as Arc<dyn MediaStore>,
        MediaLimits::default(),
        RetryPolicy {
            max_attempts: 1,
            backoff: Vec::new(),
        },
    ));
    let engine = Engine::new(
        Arc::clone(&storage),
        Arc::clone(&sender) as Arc<dyn OutboundSend>,
        relocator,
        EngineOptions {
            default_group: 1,
            fanout_concurrency: 2,
        },
    );

    let reply = engine
        .handle_inbound(text_message("2065550001", "hello"))
        .await
        .unwrap()
        .expect("summary reply");
    assert!(reply.contains("sent to 8 member(s)"));

    let high_water = sender.high_water.load(Ordering::SeqCst);
    assert!(high_water >= 1);
    assert!(
        high_water <= 2,
        "observed {high_water} concurrent sends with a cap of 2"
    );
}

#[tokio::test]
async fn late_failure_callback_updates_the_existing_row() {
    let h = text_harness(Vec::new());
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
    }

    h.engine
        .handle_inbound(text_message("2065550001", "hello"))
        .await
        .unwrap();

    let sid = h.sender.sent()[0].provider_sid.clone();
    {
        let storage = h.storage.lock().unwrap();
        let rows = storage.deliveries_for_message(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "sent");
    }

    let updated = h
        .engine
        .handle_status_callback(&sid, "undelivered", Some("30005"))
        .await
        .unwrap();
    assert!(updated);

    let storage = h.storage.lock().unwrap();
    let rows = storage.deliveries_for_message(1).unwrap();
    assert_eq!(rows.len(), 1, "callback must update, not append");
    assert_eq!(rows[0].status, "failed");
    assert_eq!(rows[0].reason.as_deref(), Some("carrier-rejected"));
}

#[tokio::test]
async fn callback_for_unknown_sid_is_ignored() {
    let h = text_harness(Vec::new());
    let updated = h
        .engine
        .handle_status_callback("SM9999", "failed", None)
        .await
        .unwrap();
    assert!(!updated);
}
