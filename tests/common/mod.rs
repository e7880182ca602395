// Shared fixtures for the relay integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{sink, stream};
use moderated_chat::core::server::{ChatRelay, SharedRelay};
use moderated_chat::core::transport::{Frame, TransportError};
use moderated_chat::error::RelayError;
use moderated_chat::handlers::session::run_session;
use moderated_chat::moderation::{Moderator, Verdict};
use moderated_chat::RelaySettings;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Classifier double with scripted answers:
/// - text containing "bad" is blocked
/// - text whose joined context contains "forbidden" is blocked
/// - text containing "slow" never answers
/// - text containing "garbled" fails as if the service replied nonsense
/// - images are blocked when `block_images` is set
#[derive(Default)]
pub struct ScriptedModerator {
    pub text_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub block_images: bool,
    pub last_context: Mutex<Vec<String>>,
}

impl ScriptedModerator {
    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Moderator for ScriptedModerator {
    async fn classify_text(&self, current: &str, context: &[String]) -> moderated_chat::error::Result<Verdict> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = context.to_vec();

        if current.contains("slow") {
            sleep(Duration::from_secs(60)).await;
        }
        if current.contains("garbled") {
            return Err(RelayError::ClassifierError("Malformed classifier reply: \"maybe\"".to_string()));
        }
        if current.contains("bad") || context.concat().contains("forbidden") {
            return Ok(Verdict::Block);
        }
        Ok(Verdict::Allow)
    }

    async fn classify_image(&self, _bytes: &[u8]) -> moderated_chat::error::Result<Verdict> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if self.block_images {
            Ok(Verdict::Block)
        } else {
            Ok(Verdict::Allow)
        }
    }
}

pub fn test_settings(echo_to_sender: bool) -> RelaySettings {
    RelaySettings {
        classifier_timeout: Duration::from_millis(200),
        write_timeout: Duration::from_secs(1),
        echo_to_sender,
        ..RelaySettings::default()
    }
}

pub fn build_relay(moderator: Arc<ScriptedModerator>, echo_to_sender: bool) -> SharedRelay {
    Arc::new(ChatRelay::new(moderator, test_settings(echo_to_sender)))
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, last])
}

/// A peer driven over in-memory channels instead of a socket
pub struct TestClient {
    pub address: IpAddr,
    inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    pub task: JoinHandle<()>,
}

impl TestClient {
    pub fn connect(relay: &SharedRelay, address: IpAddr) -> Self {
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Frame, TransportError>>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();

        let inbound = stream::unfold(in_rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        let outbound = sink::unfold(out_tx, |tx, frame: Frame| async move {
            tx.send(frame)
                .map_err(|_| TransportError("test peer gone".to_string()))?;
            Ok::<_, TransportError>(tx)
        });

        let task = tokio::spawn(run_session(relay.clone(), address, inbound, outbound));
        Self {
            address,
            inbound: in_tx,
            outbound: out_rx,
            task,
        }
    }

    pub fn send_raw(&self, raw: &str) {
        self.inbound.send(Ok(Frame::Text(raw.to_string()))).unwrap();
    }

    pub fn send_text(&self, text: &str) {
        self.send_raw(&serde_json::json!({ "message": text }).to_string());
    }

    pub fn send_image(&self, name: &str, base64_data: &str) {
        self.send_raw(&serde_json::json!({ "image": base64_data, "image_name": name }).to_string());
    }

    pub fn close(&self) {
        self.inbound.send(Ok(Frame::close(1000, "bye"))).unwrap();
    }

    /// Next frame written to this peer; `None` once the relay closed the sink
    pub async fn next_frame(&mut self) -> Option<Frame> {
        timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
    }

    pub async fn next_event(&mut self) -> Value {
        match self.next_frame().await {
            Some(Frame::Text(text)) => serde_json::from_str(&text).expect("relay sent invalid JSON"),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    /// Assert nothing arrives for a short while
    pub async fn assert_quiet(&mut self) {
        let next = timeout(Duration::from_millis(150), self.outbound.recv()).await;
        assert!(next.is_err(), "unexpected frame: {:?}", next);
    }
}

/// Poll until `condition` holds, failing the test after two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn wait_for_clients(relay: &SharedRelay, count: usize) {
    wait_until(|| relay.connection_count().unwrap() == count).await;
}
