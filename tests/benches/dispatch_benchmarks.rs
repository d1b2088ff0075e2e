//! # CSMS Dispatch Benchmarks
//!
//! Hot paths of a single dispatch:
//!
//! | Path | Work per call |
//! |------|---------------|
//! | Counter allocation | one atomic read-then-increment |
//! | Correlation | register, then complete by id |
//! | Sealing | counter allocation plus XChaCha20-Poly1305 |
//! | Route resolution | binding check plus route lookup |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use csms_crypto::{ContextMaterial, EncryptionContextStore, SecretKey};
use csms_dispatch::adapters::{Correlator, Reply};
use csms_dispatch::domain::{DirectBindings, RoutingTable, SequentialGenerator};
use csms_types::{MessageKind, PeerId};
use std::sync::Arc;
use std::time::Duration;

fn material() -> ContextMaterial {
    ContextMaterial {
        encrypt_key: SecretKey::from_bytes([7u8; 32]),
        decrypt_key: SecretKey::from_bytes([9u8; 32]),
        nonce: 1,
        counter: 0,
    }
}

// ============================================================================
// ENCRYPTION CONTEXTS
// ============================================================================

fn bench_next_counter(c: &mut Criterion) {
    let store = EncryptionContextStore::new();
    for i in 0..1_000 {
        store.configure(PeerId::new(format!("CS-{i}")), None, material());
    }
    let peer = PeerId::new("CS-500");

    let mut group = c.benchmark_group("encryption-contexts");
    group.bench_function("next_counter", |b| {
        b.iter(|| black_box(store.next_counter(&peer, None)))
    });

    for size in [64usize, 1_024, 16_384] {
        let plaintext = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("seal", size), &plaintext, |b, data| {
            b.iter(|| black_box(store.seal(&peer, None, data)))
        });
    }
    group.finish();
}

// ============================================================================
// CORRELATION
// ============================================================================

fn bench_correlator(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let _enter = runtime.enter();

    let correlator = Correlator::new(
        Arc::new(SequentialGenerator::new("bench")),
        Duration::from_secs(120),
    );
    let destination = PeerId::new("CS-1");
    let kind = MessageKind::from_static("Reset");

    let mut group = c.benchmark_group("correlator");
    group.bench_function("register_complete", |b| {
        b.iter(|| {
            let (id, waiter) =
                correlator.register(destination.clone(), kind.clone(), Duration::from_secs(30));
            let reply = Reply {
                action: None,
                payload: serde_json::Value::Null,
            };
            black_box(correlator.complete(&destination, &id, Ok(reply)).is_ok());
            drop(waiter);
        })
    });

    // Same cycle with many other requests outstanding.
    let background: Vec<_> = (0..10_000)
        .map(|_| correlator.register(destination.clone(), kind.clone(), Duration::from_secs(600)))
        .collect();
    group.bench_function("register_cancel_10k_pending", |b| {
        b.iter(|| {
            let (id, _waiter) =
                correlator.register(destination.clone(), kind.clone(), Duration::from_secs(30));
            black_box(correlator.cancel(&id))
        })
    });
    drop(background);
    group.finish();
}

// ============================================================================
// ROUTING
// ============================================================================

struct Bound(PeerId);

impl DirectBindings for Bound {
    fn is_directly_bound(&self, peer: &PeerId) -> bool {
        &self.0 == peer
    }
}

fn bench_resolve(c: &mut Criterion) {
    let table = RoutingTable::new();
    for i in 0..1_000 {
        table.add_static_route(
            PeerId::new(format!("CS-{i}")),
            PeerId::new(format!("HUB-{}", i % 10)),
        );
    }
    let bindings = Bound(PeerId::new("CS-1"));
    let routed = PeerId::new("CS-777");
    let direct = PeerId::new("CS-1");

    let mut group = c.benchmark_group("routing");
    group.bench_function("resolve_via_hub", |b| {
        b.iter(|| black_box(table.resolve(&routed, &bindings)))
    });
    group.bench_function("resolve_direct", |b| {
        b.iter(|| black_box(table.resolve(&direct, &bindings)))
    });
    group.finish();
}

criterion_group!(benches, bench_next_counter, bench_correlator, bench_resolve);
criterion_main!(benches);
