//! Connection manager
//!
//! Owns the single broker link and its lifecycle:
//!
//! ```text
//! Idle ──ensure_connected──▶ Connecting ──handshake ok──▶ Connected
//!  ▲                             │                           │
//!  └──── handshake failed ───────┘                           │
//!  └──────── disconnect / connection lost / broker ERROR ────┘
//! ```
//!
//! The connection state and the multiplexer tables live in one `Session`
//! behind one mutex. The lock is never held across an `.await` or while a
//! consumer callback runs.
//!
//! Every transition that invalidates a link bumps `epoch`; tasks spawned for
//! an older epoch (handshake, event pump, reconnect timer) notice and stand
//! down instead of touching the new connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::credential::CredentialProvider;
use super::state::ConnectionState;
use crate::multiplexer::engine::Link;
use crate::multiplexer::{Message, Multiplexer};
use crate::transport::{TransportEvent, TransportFactory};
use crate::utils::{MuxError, Result};

type Attempt = Shared<BoxFuture<'static, Result<()>>>;

enum LinkState {
    Idle,
    Connecting { attempt: Attempt, abort: AbortHandle },
    Connected(Link),
}

pub(crate) struct Session {
    link: LinkState,
    epoch: u64,
    pub(crate) mux: Multiplexer,
}

impl Session {
    /// The live transport handle, if connected.
    pub(crate) fn link(&self) -> Option<Link> {
        match &self.link {
            LinkState::Connected(link) => Some(link.clone()),
            _ => None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        match self.link {
            LinkState::Idle => ConnectionState::Idle,
            LinkState::Connecting { .. } => ConnectionState::Connecting,
            LinkState::Connected(_) => ConnectionState::Connected,
        }
    }
}

struct Inner {
    session: Mutex<Session>,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn TransportFactory>,
    reconnect_delay: Option<Duration>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let LinkState::Connected(link) = &session.link {
            link.close();
        }
    }
}

/// Shares one broker connection between every consumer. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `reconnect_delay` is the fixed delay before reconnecting after an
    /// established connection drops; `None` disables it.
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn TransportFactory>,
        reconnect_delay: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session {
                    link: LinkState::Idle,
                    epoch: 0,
                    mux: Multiplexer::new(),
                }),
                credentials,
                transport,
                reconnect_delay,
            }),
        }
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.session().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Connects unless already connected. Callers arriving while a handshake
    /// is in flight await that same handshake.
    pub async fn ensure_connected(&self) -> Result<()> {
        let attempt = {
            let mut session = self.session();
            match &session.link {
                LinkState::Connected(_) => return Ok(()),
                LinkState::Connecting { attempt, .. } => attempt.clone(),
                LinkState::Idle => {
                    let Some(token) = self.inner.credentials.token() else {
                        warn!("no credential available; not connecting");
                        return Err(MuxError::MissingCredential);
                    };

                    session.epoch += 1;
                    let epoch = session.epoch;
                    info!(epoch, "connecting to broker");

                    let task = tokio::spawn(self.clone().handshake(token, epoch));
                    let abort = task.abort_handle();
                    let attempt = task
                        .map(|joined| {
                            joined.unwrap_or_else(|e| Err(MuxError::connect_failed(e)))
                        })
                        .boxed()
                        .shared();
                    session.link = LinkState::Connecting {
                        attempt: attempt.clone(),
                        abort,
                    };
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Starts `ensure_connected` without waiting for it. Failures are logged;
    /// queued intents stay queued for the next successful connect.
    pub(crate) fn connect_in_background(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime; queued subscriptions wait for ensure_connected");
            return;
        };
        let manager = self.clone();
        runtime.spawn(async move {
            if let Err(e) = manager.ensure_connected().await {
                debug!(error = %e, "background connect failed");
            }
        });
    }

    /// Tears down every wire subscription, closes the link and clears all
    /// subscription state. Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let mut session = self.session();
        session.epoch += 1;
        match std::mem::replace(&mut session.link, LinkState::Idle) {
            LinkState::Connected(link) => {
                session.mux.disconnect_all(Some(&link));
                link.close();
                info!("disconnected from broker");
            }
            LinkState::Connecting { abort, .. } => {
                abort.abort();
                session.mux.disconnect_all(None);
                info!("handshake abandoned by disconnect");
            }
            LinkState::Idle => session.mux.disconnect_all(None),
        }
    }

    async fn handshake(self, token: String, epoch: u64) -> Result<()> {
        let outcome = self.open(&token).await;

        let mut session = self.session();
        if session.epoch != epoch {
            if let Ok((link, _)) = &outcome {
                link.close();
            }
            return Err(MuxError::connect_failed("disconnected during handshake"));
        }

        match outcome {
            Ok((link, events)) => {
                session.link = LinkState::Connected(link.clone());
                let replayed = session.mux.replay(&link);
                drop(session);
                info!(epoch, replayed, "connected to broker");

                tokio::spawn(pump(Arc::downgrade(&self.inner), events, epoch));
                Ok(())
            }
            Err(err) => {
                session.link = LinkState::Idle;
                drop(session);
                warn!(epoch, error = %err, "broker handshake failed");
                Err(err)
            }
        }
    }

    /// Opens the transport and waits for the handshake outcome.
    async fn open(&self, token: &str) -> Result<(Link, UnboundedReceiver<TransportEvent>)> {
        let (link, mut events) = self.inner.transport.open(token).await?;
        loop {
            match events.recv().await {
                Some(TransportEvent::Connected) => return Ok((link, events)),
                Some(TransportEvent::ProtocolError(reason)) => {
                    link.close();
                    return Err(MuxError::connect_failed(reason));
                }
                Some(TransportEvent::Closed(reason)) => {
                    return Err(MuxError::connect_failed(
                        reason.unwrap_or_else(|| "connection closed during handshake".to_string()),
                    ));
                }
                None => {
                    return Err(MuxError::connect_failed(
                        "connection closed during handshake",
                    ));
                }
                Some(TransportEvent::Message { destination, .. }) => {
                    debug!(destination, "ignoring delivery before handshake");
                }
            }
        }
    }

    /// Delivers one inbound frame to the current subscribers of its topic.
    fn dispatch(&self, epoch: u64, subscription: &str, destination: &str, body: &str) {
        let payload: Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(e) => {
                let err = MuxError::Decode {
                    topic: destination.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "discarding inbound frame");
                return;
            }
        };

        let (topic, listeners) = {
            let session = self.session();
            if session.epoch != epoch {
                return;
            }
            let Some(topic) = session.mux.resolve(subscription, destination) else {
                debug!(subscription, destination, "frame for unknown subscription");
                return;
            };
            let listeners = session.mux.listeners(&topic);
            (topic, listeners)
        };

        let message = Message::new(topic, payload);
        for listener in listeners {
            listener.call(&message);
        }
    }

    fn connection_lost(&self, epoch: u64, reason: Option<String>) {
        {
            let mut session = self.session();
            if session.epoch != epoch || !matches!(session.link, LinkState::Connected(_)) {
                return;
            }
            if let LinkState::Connected(link) =
                std::mem::replace(&mut session.link, LinkState::Idle)
            {
                link.close();
            }
            session.mux.requeue();
            warn!(
                epoch,
                reason = reason.as_deref().unwrap_or("closed"),
                pending = session.mux.pending().len(),
                "broker connection lost"
            );
        }

        if let Some(delay) = self.inner.reconnect_delay {
            tokio::spawn(reconnect_after(Arc::downgrade(&self.inner), delay, epoch));
        }
    }
}

/// Consumes transport events for the connection opened at `epoch`.
async fn pump(inner: Weak<Inner>, mut events: UnboundedReceiver<TransportEvent>, epoch: u64) {
    let mut reason = None;
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let manager = ConnectionManager { inner };
        if manager.session().epoch != epoch {
            return;
        }
        match event {
            TransportEvent::Message {
                subscription,
                destination,
                body,
            } => manager.dispatch(epoch, &subscription, &destination, &body),
            // STOMP brokers close the connection after ERROR; do not wait for it
            TransportEvent::ProtocolError(error) => {
                error!(epoch, reason = %error, "broker reported an error");
                reason = Some(error);
                break;
            }
            TransportEvent::Connected => debug!(epoch, "duplicate CONNECTED ignored"),
            TransportEvent::Closed(closed) => {
                reason = closed;
                break;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        ConnectionManager { inner }.connection_lost(epoch, reason);
    }
}

async fn reconnect_after(inner: Weak<Inner>, delay: Duration, epoch: u64) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let manager = ConnectionManager { inner };
    {
        let session = manager.session();
        // someone reconnected or disconnected in the meantime
        if session.epoch != epoch || !matches!(session.link, LinkState::Idle) {
            return;
        }
    }
    info!(epoch, ?delay, "reconnecting to broker");
    manager.connect_in_background();
}
