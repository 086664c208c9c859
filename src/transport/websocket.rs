//! STOMP over WebSocket, on tokio-tungstenite.
//!
//! `open` spawns three tasks per connection: a writer draining the outbound
//! channel into the socket, a reader turning frames into [`TransportEvent`]s,
//! and (once the broker answers) a heart-beat pinger feeding the writer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use super::frame::{Command, Frame, Heartbeat};
use super::{TransportEvent, TransportFactory, TransportHandle};
use crate::config::TransportSettings;
use crate::utils::{MuxError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens STOMP-over-WebSocket connections to `settings.url`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
    vhost: String,
    heartbeat: Heartbeat,
}

impl WebSocketTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let url = Url::parse(&settings.url)
            .map_err(|e| MuxError::Transport(format!("invalid broker url {}: {e}", settings.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(MuxError::Transport(format!(
                "unsupported broker url scheme `{}`",
                url.scheme()
            )));
        }
        let vhost = settings
            .vhost
            .clone()
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        Ok(Self {
            url,
            vhost,
            heartbeat: Heartbeat::new(
                settings.heartbeat_outgoing_ms,
                settings.heartbeat_incoming_ms,
            ),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransport {
    async fn open(
        &self,
        credential: &str,
    ) -> Result<(Arc<dyn TransportHandle>, UnboundedReceiver<TransportEvent>)> {
        // CONNECT headers are sent unescaped
        if credential.contains(['\r', '\n']) {
            return Err(MuxError::connect_failed("credential contains a line break"));
        }

        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(MuxError::connect_failed)?;
        info!(url = %self.url, "websocket established, sending CONNECT");

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(ws_sender, rx));
        tokio::spawn(read_loop(
            ws_receiver,
            events_tx,
            tx.downgrade(),
            self.heartbeat,
        ));

        let link = WebSocketLink { outbound: tx };
        link.write(Frame::connect(&self.vhost, credential, self.heartbeat))?;

        let handle: Arc<dyn TransportHandle> = Arc::new(link);
        Ok((handle, events_rx))
    }
}

/// Handle over the outbound channel of one connection.
#[derive(Debug)]
struct WebSocketLink {
    outbound: UnboundedSender<WsMessage>,
}

impl WebSocketLink {
    fn write(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(WsMessage::text(frame.encode()))
            .map_err(|_| MuxError::Transport("connection closed".to_string()))
    }
}

impl TransportHandle for WebSocketLink {
    fn subscribe(&self, id: &str, destination: &str) -> Result<()> {
        self.write(Frame::subscribe(id, destination))
    }

    fn unsubscribe(&self, id: &str) -> Result<()> {
        self.write(Frame::unsubscribe(id))
    }

    fn send(&self, destination: &str, body: &str) -> Result<()> {
        self.write(Frame::send(destination, body))
    }

    fn close(&self) {
        if self.write(Frame::disconnect()).is_ok() {
            let _ = self.outbound.send(WsMessage::Close(None));
        }
    }
}

async fn write_loop(
    mut ws_sender: SplitSink<WsStream, WsMessage>,
    mut rx: UnboundedReceiver<WsMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, WsMessage::Close(_));
        if let Err(e) = ws_sender.send(msg).await {
            warn!(error = %e, "websocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    // stop accepting writes so the pinger and handle see a closed link
    rx.close();
    let _ = ws_sender.close().await;
    debug!("websocket write loop closed");
}

async fn read_loop(
    mut ws_receiver: SplitStream<WsStream>,
    events: UnboundedSender<TransportEvent>,
    outbound: WeakUnboundedSender<WsMessage>,
    heartbeat: Heartbeat,
) {
    let mut expect_within: Option<Duration> = None;

    let reason = loop {
        let next = match expect_within {
            // tolerate one missed heart-beat
            Some(interval) => match timeout(interval * 2, ws_receiver.next()).await {
                Ok(next) => next,
                Err(_) => break Some("heart-beat timeout".to_string()),
            },
            None => ws_receiver.next().await,
        };

        let text = match next {
            Some(Ok(WsMessage::Text(text))) => text.as_str().to_string(),
            Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_string(),
                Err(e) => {
                    warn!(error = %e, "discarding non UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(close))) => {
                break close
                    .map(|c| c.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
            }
            // ping/pong are answered by tungstenite
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        };

        let frame = match Frame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "discarding malformed STOMP frame");
                continue;
            }
        };

        let event = match frame.command {
            Command::Connected => {
                let server = frame
                    .get("heart-beat")
                    .map(Heartbeat::parse)
                    .unwrap_or_default();
                let (send_every, receive_within) = heartbeat.negotiate(server);
                expect_within = receive_within;
                if let Some(interval) = send_every {
                    tokio::spawn(ping_loop(outbound.clone(), interval));
                }
                debug!(
                    version = frame.get("version"),
                    ?send_every,
                    ?receive_within,
                    "CONNECTED"
                );
                TransportEvent::Connected
            }
            Command::Message => TransportEvent::Message {
                subscription: frame.get("subscription").unwrap_or_default().to_string(),
                destination: frame.get("destination").unwrap_or_default().to_string(),
                body: frame.body,
            },
            Command::Error => {
                let summary = frame.get("message").unwrap_or("broker error");
                let detail = if frame.body.is_empty() {
                    summary.to_string()
                } else {
                    format!("{summary}: {}", frame.body)
                };
                TransportEvent::ProtocolError(detail)
            }
            other => {
                debug!(command = %other, "ignoring frame");
                continue;
            }
        };

        if events.send(event).is_err() {
            // nobody is listening any more
            break None;
        }
    };

    debug!(reason = ?reason, "websocket read loop closed");
    let _ = events.send(TransportEvent::Closed(reason));
}

async fn ping_loop(outbound: WeakUnboundedSender<WsMessage>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(tx) = outbound.upgrade() else {
            break;
        };
        if tx.send(WsMessage::text("\n")).is_err() {
            break;
        }
    }
}
