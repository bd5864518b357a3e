//! Notification client
//!
//! Used by generated job scripts (through `wlreplay notify`) to report
//! lifecycle events back to the orchestrator. One connection per event;
//! closing the write half marks the end of the message.

use serde_json::Value;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use wlreplay_protocol::{Event, EventError, EventKind, Metadata, Subject};

/// Connection timeout for a single notification
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid metadata entry '{0}' (expected key=value)")]
    InvalidMetadata(String),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("failed to notify {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Parse `key=value` pairs; values that parse as JSON keep their type
pub fn parse_metadata(pairs: &[String]) -> Result<Metadata, NotifyError> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| NotifyError::InvalidMetadata(pair.clone()))?;
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

/// Build an event of `kind`; metadata is required for the metadata kinds
/// and ignored otherwise
pub fn build_event(
    kind: EventKind,
    subject: Subject,
    metadata: Metadata,
    token: Option<String>,
) -> Result<Event, NotifyError> {
    let event = match kind {
        EventKind::Complete => Event::complete(subject),
        EventKind::Failed => Event::failed(subject),
        EventKind::MetadataChange => Event::metadata_change(subject, metadata)?,
        EventKind::NotifyMetadata => Event::notify_metadata(subject, metadata)?,
    };
    Ok(match token {
        Some(token) => event.with_token(token),
        None => event,
    })
}

/// Deliver one event to the orchestrator listening on `host:port`
pub fn send(host: &str, port: u16, event: &Event) -> Result<(), NotifyError> {
    let addr = format!("{}:{}", host, port);
    let socket_addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| NotifyError::Io {
            addr: addr.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| NotifyError::Resolve(addr.clone()))?;

    let io_err = |source: io::Error| NotifyError::Io {
        addr: addr.clone(),
        source,
    };

    let mut stream = TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT).map_err(io_err)?;
    let payload = serde_json::to_vec(&event.to_message()).map_err(|e| io_err(e.into()))?;
    stream.write_all(&payload).map_err(io_err)?;
    stream.flush().map_err(io_err)?;
    stream.shutdown(Shutdown::Write).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use wlreplay_protocol::EventFactory;

    #[test]
    fn test_parse_metadata_types() {
        let metadata = parse_metadata(&["step=1".into(), "phase=write".into(), "ok=true".into()]).unwrap();
        assert_eq!(metadata["step"], json!(1));
        assert_eq!(metadata["phase"], json!("write"));
        assert_eq!(metadata["ok"], json!(true));
    }

    #[test]
    fn test_parse_metadata_rejects_bad_pairs() {
        assert!(parse_metadata(&["novalue".into()]).is_err());
        assert!(parse_metadata(&["=1".into()]).is_err());
    }

    #[test]
    fn test_metadata_kind_requires_metadata() {
        let err = build_event(EventKind::NotifyMetadata, Subject::new("a", 0), Metadata::new(), None).unwrap_err();
        assert!(matches!(err, NotifyError::Event(_)));
    }

    #[test]
    fn test_send_delivers_one_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).unwrap();
            buf
        });

        let metadata = parse_metadata(&["step=2".into()]).unwrap();
        let event = build_event(
            EventKind::NotifyMetadata,
            Subject::new("stepper", 3),
            metadata,
            Some("tok".into()),
        )
        .unwrap();
        send("127.0.0.1", port, &event).unwrap();

        let received = EventFactory::new(true).unwrap().parse_bytes(&server.join().unwrap()).unwrap();
        assert_eq!(received, event);
        assert_eq!(received.token(), Some("tok"));
    }

    #[test]
    fn test_send_to_closed_port_fails() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let event = Event::complete(Subject::new("a", 0));
        assert!(matches!(send("127.0.0.1", port, &event), Err(NotifyError::Io { .. })));
    }
}
