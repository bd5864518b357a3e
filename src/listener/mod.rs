//! Event listener
//!
//! Accepts one-shot TCP notifications from running jobs. Each connection
//! carries exactly one JSON object and the end of the message is the end of
//! the stream. Connections are handled on their own tasks; valid events are
//! forwarded to the coordinator, everything else is dropped with a warning.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wlreplay_protocol::{Event, EventError, EventFactory};

/// Why a notification was dropped
#[derive(Debug, Error)]
pub enum DropReason {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("message exceeds {0} bytes")]
    TooLarge(usize),

    #[error("{} ({})", .0, .0.code())]
    Event(#[from] EventError),

    #[error("token mismatch")]
    TokenMismatch,

    #[error("coordinator stopped")]
    Closed,
}

/// Per-connection settings shared by all connection tasks
#[derive(Debug)]
struct Intake {
    factory: EventFactory,
    token: Option<String>,
    max_message_bytes: usize,
}

impl Intake {
    fn check_token(&self, event: &Event) -> Result<(), DropReason> {
        match &self.token {
            Some(expected) if event.token() != Some(expected.as_str()) => Err(DropReason::TokenMismatch),
            _ => Ok(()),
        }
    }
}

/// Bound listener, ready to serve
#[derive(Debug)]
pub struct EventListener {
    listener: TcpListener,
    intake: Arc<Intake>,
}

impl EventListener {
    /// Bind to `addr`; port 0 picks an ephemeral port.
    ///
    /// With `token` set, events carrying any other token (or none) are
    /// dropped.
    pub async fn bind(
        addr: &str,
        factory: EventFactory,
        token: Option<String>,
        max_message_bytes: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            intake: Arc::new(Intake {
                factory,
                token,
                max_message_bytes,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the coordinator goes away
    pub async fn serve(self, events: mpsc::Sender<Event>) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "event listener started"),
            Err(e) => info!("event listener started (address unknown: {e})"),
        }

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("failed to accept connection: {e}");
                        continue;
                    }
                },
                _ = events.closed() => break,
            };

            let intake = Arc::clone(&self.intake);
            let events = events.clone();
            tokio::spawn(async move {
                match handle_connection(stream, &intake, &events).await {
                    Ok(()) => {}
                    Err(DropReason::Closed) => debug!(%peer, "event arrived after shutdown"),
                    Err(reason) => warn!(%peer, %reason, "dropped notification"),
                }
            });
        }

        debug!("event listener stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    intake: &Intake,
    events: &mpsc::Sender<Event>,
) -> Result<(), DropReason> {
    let limit = intake.max_message_bytes;
    let mut buf = Vec::new();
    stream.take(limit as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(DropReason::TooLarge(limit));
    }

    let event = intake.factory.parse_bytes(&buf)?;
    intake.check_token(&event)?;

    debug!(identity = %event.identity(), "notification accepted");
    events.send(event).await.map_err(|_| DropReason::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use wlreplay_protocol::{EventKind, Subject};

    async fn start(token: Option<&str>, max: usize) -> (SocketAddr, mpsc::Receiver<Event>) {
        let listener = EventListener::bind(
            "127.0.0.1:0",
            EventFactory::new(true).unwrap(),
            token.map(str::to_string),
            max,
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(listener.serve(tx));
        (addr, rx)
    }

    async fn send(addr: SocketAddr, payload: &[u8]) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    async fn recv(rx: &mut mpsc::Receiver<Event>) -> Option<Event> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_valid_event_forwarded() {
        let (addr, mut rx) = start(Some("tok"), 4096).await;
        let msg = json!({"info": {"app": "a", "job": 0}, "type": "Complete", "token": "tok"});
        send(addr, msg.to_string().as_bytes()).await;

        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.kind(), EventKind::Complete);
        assert_eq!(event.subject(), &Subject::new("a", 0));
    }

    #[tokio::test]
    async fn test_wrong_token_dropped() {
        let (addr, mut rx) = start(Some("tok"), 4096).await;
        let msg = json!({"info": {"app": "a", "job": 0}, "type": "Complete", "token": "other"});
        send(addr, msg.to_string().as_bytes()).await;
        let missing = json!({"info": {"app": "a", "job": 0}, "type": "Complete"});
        send(addr, missing.to_string().as_bytes()).await;

        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_dropped_and_listener_survives() {
        let (addr, mut rx) = start(None, 4096).await;
        send(addr, b"{not json").await;
        send(addr, br#"{"info": {"app": "a", "job": 0}, "type": "Started"}"#).await;
        send(addr, br#"{"info": {"app": "a", "job": 1}, "type": "Failed"}"#).await;

        let event = recv(&mut rx).await.unwrap();
        assert_eq!(event.kind(), EventKind::Failed);
        assert_eq!(event.subject().job, 1);
    }

    #[tokio::test]
    async fn test_oversized_message_dropped() {
        let (addr, mut rx) = start(None, 64).await;
        let msg = json!({
            "info": {"app": "a", "job": 0},
            "type": "NotifyMetadata",
            "metadata": {"padding": "x".repeat(128)}
        });
        send(addr, msg.to_string().as_bytes()).await;
        assert!(recv(&mut rx).await.is_none());
    }
}
