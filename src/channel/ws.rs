//! WebSocket push transport
//!
//! Opens one connection per subscription to the push endpoint, authenticated
//! with the session's bearer token (both as an `Authorization` header and a
//! `token` query parameter, for servers that cannot read upgrade headers).
//!
//! Frames are JSON text. Two shapes are understood:
//!   `{"event": "notification", "data": {...}}`
//!   `["notification", {...}]`
//! Anything else is logged and skipped.
//!
//! Reconnects are the transport's business: after a failed connect or a lost
//! connection it waits `reconnect_delay` (doubling up to 30s) and tries again,
//! giving up after `reconnect_attempts` consecutive failures when that is set.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use super::{ChannelEvent, EventSink, PushTransport, Subscription, NOTIFICATION_EVENT};
use crate::config::Config;
use crate::errors::{SyncError, SyncResult};
use crate::models::{NotificationRecord, Session};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    reconnect_delay: Duration,
    reconnect_attempts: Option<u32>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(1),
            reconnect_attempts: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.ws_url.clone())
            .with_reconnect(cfg.reconnect_delay(), cfg.reconnect_attempts)
    }

    pub fn with_reconnect(mut self, delay: Duration, attempts: Option<u32>) -> Self {
        self.reconnect_delay = delay;
        self.reconnect_attempts = attempts;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushTransport for WebSocketTransport {
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, session: &Session) -> SyncResult<Subscription> {
        // Fail fast on a URL or token that can never form a valid request.
        connect_request(&self.url, session)?;

        let (sink, subscription) = Subscription::pair();
        let transport = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            transport.run(session, sink).await;
        });
        Ok(subscription)
    }
}

// ── Connection loop ───────────────────────────────────────────

enum PumpEnd {
    /// Subscriber closed the channel.
    Closed,
    /// Connection dropped; reconnect.
    Lost(String),
}

impl WebSocketTransport {
    async fn run(self, session: Session, mut sink: EventSink) {
        let session_id = session.session_id();
        let mut failures: u32 = 0;
        let mut delay = self.reconnect_delay;

        loop {
            let request = match connect_request(&self.url, &session) {
                Ok(r) => r,
                Err(e) => {
                    sink.emit(ChannelEvent::ConnectError(e.to_string()));
                    return;
                }
            };

            let connected = tokio::select! {
                res = connect_async(request) => res,
                _ = sink.closed() => return,
            };

            match connected {
                Ok((stream, _resp)) => {
                    failures = 0;
                    delay = self.reconnect_delay;
                    info!(%session_id, url = %self.url, "push channel: connected");
                    if !sink.emit(ChannelEvent::Connected) {
                        return;
                    }
                    match pump(stream, &mut sink).await {
                        PumpEnd::Closed => {
                            info!(%session_id, "push channel: closed");
                            return;
                        }
                        PumpEnd::Lost(reason) => {
                            warn!(%session_id, reason = %reason, "push channel: connection lost");
                            if !sink.emit(ChannelEvent::Disconnected(reason)) {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(%session_id, url = %self.url, attempt = failures, "push channel: connect error: {}", e);
                    if !sink.emit(ChannelEvent::ConnectError(e.to_string())) {
                        return;
                    }
                    if let Some(max) = self.reconnect_attempts {
                        if failures >= max {
                            warn!(%session_id, failures, "push channel: giving up after repeated connect errors");
                            return;
                        }
                    }
                }
            }

            debug!(%session_id, delay_ms = delay.as_millis() as u64, "push channel: reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = sink.closed() => return,
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }
}

async fn pump(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, sink: &mut EventSink) -> PumpEnd {
    let (mut write, mut read) = stream.split();

    loop {
        let msg = tokio::select! {
            msg = read.next() => msg,
            _ = sink.closed() => {
                let _ = write.send(Message::Close(None)).await;
                let _ = write.close().await;
                return PumpEnd::Closed;
            }
        };

        match msg {
            None => return PumpEnd::Lost("stream ended".into()),
            Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                Frame::Notification(record) => {
                    if !sink.emit(ChannelEvent::Notification(record)) {
                        return PumpEnd::Closed;
                    }
                }
                Frame::Other(name) => debug!(event = %name, "push channel: ignoring event"),
                Frame::Invalid(reason) => warn!("push channel: undecodable frame: {}", reason),
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("closed by server ({}): {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "closed by server".into());
                return PumpEnd::Lost(reason);
            }
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => {}
        }
    }
}

// ── Request / frame helpers ───────────────────────────────────

fn connect_request(url: &str, session: &Session) -> SyncResult<Request> {
    let sep = if url.contains('?') { '&' } else { '?' };
    let full = format!("{}{}token={}", url, sep, urlencoding::encode(session.token()));

    let mut request = full
        .into_client_request()
        .map_err(|e| SyncError::Channel(format!("invalid push channel url '{}': {}", url, e)))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token()))
        .map_err(|e| SyncError::Channel(format!("invalid token: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    Ok(request)
}

#[derive(Debug, PartialEq)]
enum Frame {
    Notification(NotificationRecord),
    Other(String),
    Invalid(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn decode_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Frame::Invalid(e.to_string()),
    };

    let (event, data) = match value {
        Value::Array(mut items) if !items.is_empty() && items[0].is_string() => {
            let data = if items.len() > 1 { items.swap_remove(1) } else { Value::Null };
            let event = items[0].as_str().unwrap_or_default().to_string();
            (event, data)
        }
        obj @ Value::Object(_) => match serde_json::from_value::<Envelope>(obj) {
            Ok(env) => (env.event, env.data),
            Err(e) => return Frame::Invalid(e.to_string()),
        },
        _ => return Frame::Invalid("expected an event object or array".into()),
    };

    if event != NOTIFICATION_EVENT {
        return Frame::Other(event);
    }
    match serde_json::from_value::<NotificationRecord>(data) {
        Ok(record) => Frame::Notification(record),
        Err(e) => Frame::Invalid(format!("notification payload: {}", e)),
    }
}

// ── Tests ─────────────────────────────────────────────────────
