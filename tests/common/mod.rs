//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use laneway::{
    BoxedIo, Error, Event, EventKind, Listener, Role, SecureHandshake, Server, ServerBuilder,
    SessionId,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Waiting
// ============================================================================

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

// ============================================================================
// Recorder
// ============================================================================

/// One observed event.
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: EventKind,
    pub session: Option<SessionId>,
    pub data: Vec<u8>,
    pub error: Option<String>,
    pub timeout: bool,
    pub thread: Option<String>,
}

/// Listener that keeps every event it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.records.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn count_for(&self, session: SessionId, kind: EventKind) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind && r.session == Some(session))
            .count()
    }

    /// Event kinds in delivery order, for one session.
    pub fn kinds_for(&self, session: SessionId) -> Vec<EventKind> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.session == Some(session))
            .map(|r| r.kind)
            .collect()
    }

    /// Event kinds in delivery order, excluding send and receive.
    pub fn lifecycle(&self) -> Vec<EventKind> {
        self.records
            .lock()
            .iter()
            .map(|r| r.kind)
            .filter(|k| !matches!(k, EventKind::Recv | EventKind::Send))
            .collect()
    }

    /// Every received byte, concatenated.
    pub fn received(&self) -> Vec<u8> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == EventKind::Recv)
            .flat_map(|r| r.data.iter().copied())
            .collect()
    }

    /// Sessions seen, in order of first appearance.
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut seen = Vec::new();
        for record in self.records.lock().iter() {
            if let Some(id) = record.session
                && !seen.contains(&id)
            {
                seen.push(id);
            }
        }
        seen
    }

    pub fn first(&self, kind: EventKind) -> Option<Record> {
        self.records.lock().iter().find(|r| r.kind == kind).cloned()
    }
}

impl Listener for Recorder {
    fn on_event(&self, event: &Event) {
        self.records.lock().push(Record {
            kind: event.kind(),
            session: event.session().map(|s| s.id()),
            data: event.data().to_vec(),
            error: event.error().map(ToString::to_string),
            timeout: event.error().is_some_and(Error::is_timeout),
            thread: std::thread::current().name().map(str::to_owned),
        });
    }
}

// ============================================================================
// Servers
// ============================================================================

/// Starts a server that echoes whatever it receives.
pub async fn echo_server(
    endpoint: &str,
    configure: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> (Server, Recorder) {
    let recorder = Recorder::new();
    let server = configure(Server::builder(endpoint).expect("endpoint"))
        .listener(recorder.clone())
        .build()
        .expect("build");

    server.listeners().bind_recv(|session, data| {
        let _ = session.send(data.to_vec());
    });
    server.start().await.expect("start");
    (server, recorder)
}

/// `host:port` of a running server.
pub fn authority(server: &Server) -> String {
    server.local_addr().expect("running").to_string()
}

// ============================================================================
// Secure Layers
// ============================================================================

/// Greeting exchanged by [`HelloSecure`].
pub const GREETING: &[u8; 5] = b"HELLO";

/// Secure layer stand-in: both sides write a greeting and expect the
/// peer's before the stream is considered secured.
pub struct HelloSecure;

#[async_trait]
impl SecureHandshake for HelloSecure {
    fn name(&self) -> &str {
        "hello"
    }

    async fn handshake(&self, mut io: BoxedIo, _role: Role) -> laneway::Result<BoxedIo> {
        io.write_all(GREETING).await?;
        io.flush().await?;

        let mut greeting = [0u8; 5];
        io.read_exact(&mut greeting)
            .await
            .map_err(|e| Error::handshake(self.name(), e.to_string()))?;
        if &greeting != GREETING {
            return Err(Error::handshake(self.name(), "unexpected greeting"));
        }
        Ok(io)
    }
}

/// Secure layer that always refuses.
pub struct RefusingSecure;

#[async_trait]
impl SecureHandshake for RefusingSecure {
    fn name(&self) -> &str {
        "refusing"
    }

    async fn handshake(&self, _io: BoxedIo, _role: Role) -> laneway::Result<BoxedIo> {
        Err(Error::handshake(self.name(), "refused"))
    }
}
