//! Echo benchmark suite.
//!
//! Measures round trips through a local echo server:
//! - Payload sizes: 16 B, 1 KiB, 64 KiB
//! - Notification modes: sync, async
//! - Connection setup and teardown
//!
//! Run with: cargo bench --bench echo
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use laneway::{Client, NotifyMode, Server};
use tokio::runtime::Runtime;
use tokio::sync::{Mutex, mpsc};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[16, 1024, 64 * 1024];
const NOTIFY_MODES: &[NotifyMode] = &[NotifyMode::Sync, NotifyMode::Async];

// ============================================================================
// Fixtures
// ============================================================================

/// A running echo server and a connected client that reports how many
/// bytes it has received.
struct EchoPair {
    server: Server,
    client: Client,
    received: Arc<Mutex<mpsc::UnboundedReceiver<usize>>>,
}

async fn echo_pair(mode: NotifyMode) -> EchoPair {
    let server = Server::builder("tcp://127.0.0.1:0")
        .unwrap()
        .notify_mode(mode)
        .build()
        .unwrap();
    server.listeners().bind_recv(|session, data| {
        let _ = session.send(data.to_vec());
    });
    server.start().await.unwrap();

    let client = Client::builder(&format!("tcp://{}", server.local_addr().unwrap()))
        .unwrap()
        .notify_mode(mode)
        .build()
        .unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    client.listeners().bind_recv(move |_, data| {
        let _ = tx.send(data.len());
    });
    client.connect().await.unwrap();

    EchoPair {
        server,
        client,
        received: Arc::new(Mutex::new(rx)),
    }
}

impl EchoPair {
    async fn shutdown(self) {
        self.client.stop().await.unwrap();
        self.server.stop().await.unwrap();
    }
}

/// Sends `payload` and waits until all of it has come back.
async fn round_trip(
    client: &Client,
    received: &Mutex<mpsc::UnboundedReceiver<usize>>,
    payload: bytes::Bytes,
) {
    let expected = payload.len();
    client.send(payload).unwrap();

    let mut received = received.lock().await;
    let mut total = 0;
    while total < expected {
        total += received.recv().await.unwrap();
    }
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("round_trip");
    group.measurement_time(Duration::from_secs(10));

    for &mode in NOTIFY_MODES {
        let pair = rt.block_on(echo_pair(mode));

        for &size in PAYLOAD_SIZES {
            let payload = bytes::Bytes::from(vec![0xA5; size]);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(mode.to_string(), size), &payload, |b, payload| {
                b.to_async(&rt)
                    .iter(|| round_trip(&pair.client, &pair.received, payload.clone()));
            });
        }

        rt.block_on(pair.shutdown());
    }

    group.finish();
}

// ============================================================================
// Benchmark: Connection Setup
// ============================================================================

fn bench_connect(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = Server::new("tcp://127.0.0.1:0").unwrap();
        server.start().await.unwrap();
        server
    });
    let target = format!("tcp://{}", server.local_addr().unwrap());

    let mut group = c.benchmark_group("connect");
    group.sample_size(20);

    group.bench_function("connect_stop", |b| {
        b.to_async(&rt).iter(|| async {
            let client = Client::new(&target).unwrap();
            client.connect().await.unwrap();
            client.stop().await.unwrap();
        });
    });

    group.finish();
    rt.block_on(server.stop()).unwrap();
}

criterion_group!(benches, bench_round_trip, bench_connect);
criterion_main!(benches);
