//! Event delivery to the external log collector.
//!
//! Every bot event is funneled through one logger task per bot. Events are
//! delivered strictly in submission order over a lazily-connected WebSocket;
//! a delivery failure tears the connection down and the same frame is retried
//! after a fixed delay, so a collector outage stalls the queue instead of
//! dropping or reordering it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::SinkExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::models::LogEvent;

/// Delivery attempts per frame once the logger is draining for shutdown.
const DRAIN_RETRIES: u32 = 3;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("collector connect failed: {0}")]
    Connect(String),

    #[error("collector send failed: {0}")]
    Send(String),
}

/// One-way frame sink towards the collector. An `Err` from [`send`] marks the
/// underlying connection dead; the caller reconnects by calling again.
///
/// [`send`]: LogTransport::send
#[async_trait]
pub trait LogTransport: Send {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;
}

/// WebSocket transport. The connection is opened on first use and reopened
/// after any failure.
pub struct WsTransport {
    url: String,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }
}

#[async_trait]
impl LogTransport for WsTransport {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.socket.is_none() {
            let (socket, _) = connect_async(&self.url)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            debug!(url = %self.url, "connected to log collector");
            self.socket = Some(socket);
        }
        // Checked above.
        let socket = self.socket.as_mut().ok_or_else(|| {
            TransportError::Connect("socket missing after connect".to_string())
        })?;
        if let Err(e) = socket.send(Message::Text(frame.to_string())).await {
            self.socket = None;
            return Err(TransportError::Send(e.to_string()));
        }
        Ok(())
    }
}

enum Command {
    Event(LogEvent),
    Close,
}

/// Handle to a spawned logger task.
///
/// [`log`] never blocks the caller; [`close`] drains everything already
/// enqueued before returning and is idempotent.
///
/// [`log`]: EventLogger::log
/// [`close`]: EventLogger::close
pub struct EventLogger {
    tx: mpsc::UnboundedSender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
    draining: Arc<AtomicBool>,
}

impl EventLogger {
    /// Spawn the delivery task over the given transport.
    pub fn spawn(transport: Box<dyn LogTransport>, reconnect_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let draining = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(transport, rx, reconnect_delay, draining.clone()));
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
            draining,
        }
    }

    /// Enqueue one event. A no-op once the logger is closed.
    pub fn log(&self, event: LogEvent) {
        let _ = self.tx.send(Command::Event(event));
    }

    /// Drain the queue and stop the delivery task. Safe to call more than
    /// once; later calls return immediately.
    ///
    /// The drain flag is flipped before the `Close` command is enqueued so a
    /// frame already stuck in its retry loop moves to the bounded drain
    /// retries instead of retrying forever.
    pub async fn close(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Command::Close);
        let handle = self.handle.lock().map(|mut h| h.take()).ok().flatten();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Wire frame the collector expects: the event body nested under `log`, with
/// the bot id alongside it.
fn frame(event: &LogEvent) -> String {
    serde_json::json!({
        "bot_id": event.bot_id,
        "log": {
            "message": event.message,
            "status": event.status,
            "data": event.data,
            "timestamp": event.timestamp,
        },
    })
    .to_string()
}

async fn run(
    mut transport: Box<dyn LogTransport>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    reconnect_delay: Duration,
    draining: Arc<AtomicBool>,
) {
    while let Some(command) = rx.recv().await {
        let event = match command {
            Command::Event(event) => event,
            Command::Close => {
                // Stop accepting new events; whatever is already queued is
                // still delivered below.
                rx.close();
                continue;
            }
        };

        let payload = frame(&event);
        let mut drain_attempts = 0u32;
        loop {
            match transport.send(&payload).await {
                Ok(()) => break,
                Err(e) => {
                    // Re-checked per attempt: a close() elsewhere bounds the
                    // retries of the frame currently in flight too.
                    if draining.load(Ordering::SeqCst) {
                        drain_attempts += 1;
                        if drain_attempts >= DRAIN_RETRIES {
                            warn!(
                                bot_id = %event.bot_id,
                                error = %e,
                                "dropping event after drain retries"
                            );
                            break;
                        }
                    }
                    warn!(bot_id = %event.bot_id, error = %e, "event delivery failed, retrying");
                    tokio::time::sleep(reconnect_delay).await;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;
    use crate::models::{EventStatus, LogEvent};
    use serde_json::Value;

    fn event(message: &str) -> LogEvent {
        LogEvent::new("bot-btcusdt-1h-100-50", EventStatus::Log, message)
    }

    fn messages(sent: &Mutex<Vec<String>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|raw| {
                let v: Value = serde_json::from_str(raw).unwrap();
                v["log"]["message"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn frames_delivered_in_order_across_a_failure() {
        let (transport, sent) = MockTransport::new();
        // Second delivery attempt fails once before succeeding.
        transport.script_failures(&[false, true]);
        let logger = EventLogger::spawn(transport, Duration::from_secs(5));

        logger.log(event("a"));
        logger.log(event("b"));
        logger.log(event("c"));
        logger.close().await;

        assert_eq!(messages(&sent), vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_returns_while_collector_stays_down() {
        let (transport, sent) = MockTransport::new();
        transport.always_fail();
        let logger = EventLogger::spawn(transport, Duration::from_secs(5));

        logger.log(event("a"));
        logger.log(event("b"));

        // Even with the head frame mid-retry, close() must bound the retries
        // of every queued frame and come back.
        let closed = tokio::time::timeout(Duration::from_secs(3600), logger.close()).await;
        assert!(closed.is_ok(), "close() hung on a dead collector");
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_queue_and_is_idempotent() {
        let (transport, sent) = MockTransport::new();
        let logger = EventLogger::spawn(transport, Duration::from_secs(5));

        for i in 0..10 {
            logger.log(event(&format!("event-{i}")));
        }
        logger.close().await;
        logger.close().await;

        assert_eq!(sent.lock().unwrap().len(), 10);
        // Events submitted after close are silently discarded.
        logger.log(event("late"));
        assert_eq!(sent.lock().unwrap().len(), 10);
    }

    #[test]
    fn frame_shape_matches_collector_contract() {
        let e = LogEvent::new("bot-ethusdt-1h-200-50", EventStatus::Success, "trade executed")
            .with_data(serde_json::json!({"price": "100"}));
        let v: Value = serde_json::from_str(&frame(&e)).unwrap();
        assert_eq!(v["bot_id"], "bot-ethusdt-1h-200-50");
        assert_eq!(v["log"]["message"], "trade executed");
        assert_eq!(v["log"]["status"], "success");
        assert_eq!(v["log"]["data"]["price"], "100");
        assert!(v["log"]["timestamp"].is_string());
    }
}
