use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::relay::{ClientFrame, ServerFrame};

/// Connection lifecycle and inbound traffic, as seen by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connecting,
    /// The relay acknowledged the handshake.
    Connected { connection_id: String },
    Frame(ServerFrame),
    Disconnected { reason: String },
    ConnectError { reason: String },
}

/// Exponential reconnect delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

/// Start a relay connection that keeps reconnecting until the session goes away.
///
/// Frames pushed into the returned sender are written while connected; frames
/// queued while disconnected are discarded on reconnect. The task ends when the
/// sender or the event receiver is dropped.
pub fn spawn(
    url: Url,
    backoff: Backoff,
) -> (
    mpsc::UnboundedSender<ClientFrame>,
    mpsc::Receiver<LinkEvent>,
    JoinHandle<()>,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::channel(64);
    let task = tokio::spawn(run(url, backoff, outbound_rx, events_tx));
    (outbound_tx, events_rx, task)
}

async fn run(
    url: Url,
    mut backoff: Backoff,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    events: mpsc::Sender<LinkEvent>,
) {
    loop {
        if events.send(LinkEvent::Connecting).await.is_err() {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                debug!(url = %url, "Relay socket open");
                let (mut sink, mut stream) = ws.split();

                while outbound.try_recv().is_ok() {}

                let reason = loop {
                    tokio::select! {
                        frame = outbound.recv() => {
                            let Some(frame) = frame else {
                                let _ = sink.close().await;
                                return;
                            };
                            let json = match serde_json::to_string(&frame) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!("Failed to serialize relay frame: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(Message::Text(json)).await {
                                break e.to_string();
                            }
                        }
                        incoming = stream.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let event = match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(ServerFrame::Connect { connection_id }) => {
                                        info!(connection_id = %connection_id, "Connected to relay");
                                        backoff.reset();
                                        LinkEvent::Connected { connection_id }
                                    }
                                    Ok(frame) => LinkEvent::Frame(frame),
                                    Err(e) => {
                                        warn!("Ignoring malformed relay frame: {}", e);
                                        continue;
                                    }
                                };
                                if events.send(event).await.is_err() {
                                    let _ = sink.close().await;
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break "closed by relay".to_string(),
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break e.to_string(),
                        },
                    }
                };

                info!(reason = %reason, "Disconnected from relay");
                if events.send(LinkEvent::Disconnected { reason }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(url = %url, "Relay connect failed: {}", e);
                if events
                    .send(LinkEvent::ConnectError {
                        reason: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = events.closed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unreachable_relay_reports_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/api/socket", addr)).unwrap();
        let (_tx, mut events, task) = spawn(
            url,
            Backoff::new(Duration::from_millis(10), Duration::from_millis(20)),
        );

        assert_eq!(events.recv().await, Some(LinkEvent::Connecting));
        assert!(matches!(
            events.recv().await,
            Some(LinkEvent::ConnectError { .. })
        ));
        assert_eq!(events.recv().await, Some(LinkEvent::Connecting));

        drop(events);
        task.abort();
    }
}
