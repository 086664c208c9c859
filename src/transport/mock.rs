//! In-memory transport used by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{TransportEvent, TransportFactory, TransportHandle};
use crate::utils::{MuxError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Send { destination: String, body: String },
}

/// Transport handle that records every write.
#[derive(Debug, Default)]
pub struct RecordingLink {
    ops: Mutex<Vec<WireOp>>,
    closed: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<WireOp> {
        self.ops.lock().unwrap().clone()
    }

    /// `(id, destination)` of subscriptions not yet unsubscribed.
    pub fn active(&self) -> Vec<(String, String)> {
        let mut active: Vec<(String, String)> = Vec::new();
        for op in self.ops() {
            match op {
                WireOp::Subscribe { id, destination } => active.push((id, destination)),
                WireOp::Unsubscribe { id } => active.retain(|(a, _)| *a != id),
                WireOp::Send { .. } => {}
            }
        }
        active
    }

    pub fn active_for(&self, destination: &str) -> usize {
        self.active()
            .iter()
            .filter(|(_, d)| d == destination)
            .count()
    }

    pub fn subscribe_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, WireOp::Subscribe { .. }))
            .count()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                WireOp::Send { destination, body } => Some((destination, body)),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, op: WireOp) -> Result<()> {
        if self.is_closed() {
            return Err(MuxError::Transport("connection closed".to_string()));
        }
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

impl TransportHandle for RecordingLink {
    fn subscribe(&self, id: &str, destination: &str) -> Result<()> {
        self.record(WireOp::Subscribe {
            id: id.to_string(),
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&self, id: &str) -> Result<()> {
        self.record(WireOp::Unsubscribe { id: id.to_string() })
    }

    fn send(&self, destination: &str, body: &str) -> Result<()> {
        self.record(WireOp::Send {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// How `MockTransport::open` answers the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Accept,
    Reject,
    /// The test drives the outcome with `accept` / `reject`.
    Manual,
}

#[derive(Default)]
struct MockState {
    credentials: Vec<String>,
    links: Vec<Arc<RecordingLink>>,
    events: Vec<UnboundedSender<TransportEvent>>,
}

pub struct MockTransport {
    mode: Mutex<Handshake>,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(mode: Handshake) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn set_mode(&self, mode: Handshake) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().links.len()
    }

    pub fn credentials(&self) -> Vec<String> {
        self.state.lock().unwrap().credentials.clone()
    }

    /// The most recently opened link.
    pub fn link(&self) -> Arc<RecordingLink> {
        self.state
            .lock()
            .unwrap()
            .links
            .last()
            .cloned()
            .expect("no connection opened yet")
    }

    fn emit(&self, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        let tx = state.events.last().expect("no connection opened yet");
        let _ = tx.send(event);
    }

    pub fn accept(&self) {
        self.emit(TransportEvent::Connected);
    }

    pub fn reject(&self, reason: &str) {
        self.emit(TransportEvent::ProtocolError(reason.to_string()));
    }

    pub fn drop_connection(&self, reason: &str) {
        self.emit(TransportEvent::Closed(Some(reason.to_string())));
    }

    /// Delivers `body` on every active wire subscription to `destination`.
    pub fn deliver(&self, destination: &str, body: &str) -> usize {
        let active = self.link().active();
        let mut delivered = 0;
        for (id, dest) in active {
            if dest == destination {
                self.emit(TransportEvent::Message {
                    subscription: id,
                    destination: dest,
                    body: body.to_string(),
                });
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn wait_for_opens(&self, n: usize) {
        wait_until(|| self.opens() >= n).await;
    }
}

#[async_trait]
impl TransportFactory for MockTransport {
    async fn open(
        &self,
        credential: &str,
    ) -> Result<(Arc<dyn TransportHandle>, UnboundedReceiver<TransportEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = RecordingLink::new();

        match *self.mode.lock().unwrap() {
            Handshake::Accept => {
                let _ = tx.send(TransportEvent::Connected);
            }
            Handshake::Reject => {
                let _ = tx.send(TransportEvent::ProtocolError("bad credentials".to_string()));
            }
            Handshake::Manual => {}
        }

        let mut state = self.state.lock().unwrap();
        state.credentials.push(credential.to_string());
        state.links.push(link.clone());
        state.events.push(tx);

        let handle: Arc<dyn TransportHandle> = link;
        Ok((handle, rx))
    }
}

/// Polls `cond` until it holds, panicking after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
