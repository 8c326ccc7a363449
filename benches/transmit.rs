//! Throughput benchmarks for object assembly and transmission.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lamina::prelude::*;
use std::hint::black_box;

fn build_heap_zco(depot: &Depot, acct: Account, length: usize) -> ZcoHandle {
    let mut txn = depot.begin();
    let object = txn.insert_bytes(&vec![0xA5u8; length]);
    txn.create(
        acct,
        Some(ExtentSpec {
            source: ExtentSource::Heap(object),
            offset: 0,
            length: length as u64,
        }),
        Charge::NeedsReservation,
    )
    .unwrap()
    .unwrap()
}

fn bench_create_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_destroy");

    for size in [64, 1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let depot = Depot::new(DepotConfig::new());
            b.iter(|| {
                let zco = build_heap_zco(&depot, Account::Outbound, size);
                depot.begin().destroy(black_box(zco)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_transmit(c: &mut Criterion) {
    let mut group = c.benchmark_group("transmit");

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let depot = Depot::new(DepotConfig::new());
            let zco = build_heap_zco(&depot, Account::Outbound, size);
            {
                let mut txn = depot.begin();
                txn.prepend_header(zco, &[0u8; 16]).unwrap();
                txn.append_trailer(zco, &[0u8; 4]).unwrap();
            }
            let mut buf = vec![0u8; 4096];

            b.iter(|| {
                let mut txn = depot.begin();
                let mut reader = ZcoReader::start_transmitting(zco);
                loop {
                    let n = txn.transmit(&mut reader, &mut buf).unwrap();
                    if n < buf.len() as u64 {
                        break;
                    }
                }
                black_box(reader)
            });
        });
    }

    group.finish();
}

fn bench_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("clone");

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let depot = Depot::new(DepotConfig::new());
            let zco = build_heap_zco(&depot, Account::Outbound, size);

            b.iter(|| {
                let mut txn = depot.begin();
                let clone = txn.clone_zco(zco, 0, size as u64).unwrap();
                txn.destroy(black_box(clone)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));

    group.bench_function("request_award_shred", |b| {
        let depot = Depot::new(DepotConfig::new());
        b.iter(|| {
            let mut txn = depot.begin();
            let ticket = txn.request_space(Account::Outbound, SpaceNeeded::heap(1024), 1, 0, None);
            assert!(txn.space_awarded(ticket).unwrap());
            black_box(txn.shred(ticket));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_create_destroy,
    bench_transmit,
    bench_clone,
    bench_admission,
);

criterion_main!(benches);
