mod common;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::sync::oneshot;

use chorus::roster;
use chorus::server::{app, AppState};

use common::{text_harness, TestHarness};

async fn start_server(
    h: &TestHarness,
    media_root: Option<PathBuf>,
) -> (String, oneshot::Sender<()>) {
    let state = AppState {
        engine: Arc::clone(&h.engine),
        media_root,
    };
    let app: Router = app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind server");
    let addr = listener.local_addr().expect("server addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", addr), shutdown_tx)
}

fn post_form(url: &str, fields: &[(&str, &str)]) -> (u16, String) {
    let response = ureq::post(url).send_form(fields).expect("post form");
    let status = response.status();
    let body = response.into_string().expect("response body");
    (status, body)
}

#[tokio::test]
async fn webhook_answers_commands_with_twiml() {
    let h = text_harness(Vec::new());
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
    }
    let (base_url, shutdown_tx) = start_server(&h, None).await;

    let (status, body) = tokio::task::spawn_blocking({
        let url = format!("{base_url}/webhook/inbound");
        move || post_form(&url, &[("From", "+12065550001"), ("Body", "HELP")])
    })
    .await
    .expect("request task");

    assert_eq!(status, 200);
    assert!(body.starts_with("<?xml"));
    assert!(body.contains("<Message>"));
    assert!(body.contains("GROUPS"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn webhook_broadcast_fans_out_and_confirms() {
    let h = text_harness(Vec::new());
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
    }
    let (base_url, shutdown_tx) = start_server(&h, None).await;

    let (status, body) = tokio::task::spawn_blocking({
        let url = format!("{base_url}/webhook/inbound");
        move || {
            post_form(
                &url,
                &[("From", "+12065550001"), ("Body", "dinner at seven")],
            )
        }
    })
    .await
    .expect("request task");

    assert_eq!(status, 200);
    assert!(body.contains("sent to 1 member(s)"));

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "+12065550002");
    assert_eq!(sent[0].body, "Dave: dinner at seven");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn webhook_reads_media_fields() {
    let h = text_harness(Vec::new());
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
    }
    let (base_url, shutdown_tx) = start_server(&h, None).await;

    tokio::task::spawn_blocking({
        let url = format!("{base_url}/webhook/inbound");
        move || {
            post_form(
                &url,
                &[
                    ("From", "+12065550001"),
                    ("NumMedia", "1"),
                    ("MediaUrl0", "https://transport.test/media/pic"),
                    ("MediaContentType0", "image/jpeg"),
                ],
            )
        }
    })
    .await
    .expect("request task");

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "Dave sent media");
    assert_eq!(sent[0].media_urls.len(), 1);
    assert!(sent[0].media_urls[0].starts_with("https://cdn.test/"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn webhook_without_sender_replies_empty() {
    let h = text_harness(Vec::new());
    let (base_url, shutdown_tx) = start_server(&h, None).await;

    let (status, body) = tokio::task::spawn_blocking({
        let url = format!("{base_url}/webhook/inbound");
        move || post_form(&url, &[("Body", "hello")])
    })
    .await
    .expect("request task");

    assert_eq!(status, 200);
    assert!(!body.contains("<Message>"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn status_callback_flips_delivery_row() {
    let h = text_harness(Vec::new());
    {
        let storage = h.storage.lock().unwrap();
        roster::add_member(&storage, "2065550001", 1, "Dave", false).unwrap();
        roster::add_member(&storage, "2065550002", 1, "Alice", false).unwrap();
    }
    let (base_url, shutdown_tx) = start_server(&h, None).await;

    tokio::task::spawn_blocking({
        let url = format!("{base_url}/webhook/inbound");
        move || post_form(&url, &[("From", "+12065550001"), ("Body", "hello")])
    })
    .await
    .expect("request task");

    let sid = h.sender.sent()[0].provider_sid.clone();
    let status = tokio::task::spawn_blocking({
        let url = format!("{base_url}/status");
        move || {
            ureq::post(&url)
                .send_form(&[
                    ("MessageSid", &sid),
                    ("MessageStatus", "undelivered"),
                    ("ErrorCode", "30005"),
                ])
                .expect("post status")
                .status()
        }
    })
    .await
    .expect("request task");
    assert_eq!(status, 204);

    let storage = h.storage.lock().unwrap();
    let rows = storage.deliveries_for_message(1).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "failed");
    assert_eq!(rows[0].reason.as_deref(), Some("carrier-rejected"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn health_answers_ok() {
    let h = text_harness(Vec::new());
    let (base_url, shutdown_tx) = start_server(&h, None).await;

    let status = tokio::task::spawn_blocking({
        let url = format!("{base_url}/health");
        move || ureq::get(&url).call().expect("get health").status()
    })
    .await
    .expect("request task");
    assert_eq!(status, 200);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn media_docroot_serves_stored_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("ab/cd")).expect("mkdir");
    std::fs::write(dir.path().join("ab/cd/key.jpg"), [1u8, 2, 3]).expect("write");

    let h = text_harness(Vec::new());
    let (base_url, shutdown_tx) = start_server(&h, Some(dir.path().to_path_buf())).await;

    let (status, content_type, bytes) = tokio::task::spawn_blocking({
        let url = format!("{base_url}/media/ab/cd/key.jpg");
        move || {
            let response = ureq::get(&url).call().expect("get media");
            let status = response.status();
            let content_type = response.content_type().to_string();
            let mut bytes = Vec::new();
            use std::io::Read as _;
            response
                .into_reader()
                .read_to_end(&mut bytes)
                .expect("read body");
            (status, content_type, bytes)
        }
    })
    .await
    .expect("request task");

    assert_eq!(status, 200);
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(bytes, vec![1, 2, 3]);

    let missing = tokio::task::spawn_blocking({
        let url = format!("{base_url}/media/ab/cd/other.jpg");
        move || ureq::get(&url).call()
    })
    .await
    .expect("request task");
    assert!(matches!(missing, Err(ureq::Error::Status(404, _))));

    let _ = shutdown_tx.send(());
}
