//! Performance benchmarks for the client registry
//!
//! Run with: cargo bench --bench lookup_benchmarks
//!
//! These benchmarks measure:
//! - Longest-prefix-match lookups as the registry grows
//! - Lookups that fall through to a wildcard entry
//! - Insert and delete cost
//! - Concurrent lookups against one registry

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use radius_clients::{Client, ClientNumbering, ClientRegistry, Transport};
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Registry with `hosts` /32 clients spread over a few covering networks
fn populated_registry(hosts: u32) -> ClientRegistry {
    let registry = ClientRegistry::with_numbering("bench", Arc::new(ClientNumbering::new()));

    for network in ["10.0.0.0/8", "10.1.0.0/16", "10.1.2.0/24"] {
        registry
            .add(Client::new(network.parse().unwrap(), Transport::Udp, "network"))
            .unwrap();
    }

    for i in 0..hosts {
        let addr = Ipv4Addr::from(0x0a00_0000 + i + 1);
        registry
            .add(Client::new(
                format!("{}/32", addr).parse().unwrap(),
                Transport::Udp,
                "host",
            ))
            .unwrap();
    }

    registry
}

/// Benchmark exact host lookups
fn bench_lookup_host(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_host");

    for hosts in [10, 1_000, 100_000] {
        let registry = populated_registry(hosts);
        let addr = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + hosts / 2 + 1));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(hosts), &addr, |b, addr| {
            b.iter(|| registry.find(black_box(*addr), black_box(Transport::Udp)));
        });
    }

    group.finish();
}

/// Benchmark lookups that only match a covering network
fn bench_lookup_network_fallback(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_network_fallback");

    for hosts in [10, 1_000, 100_000] {
        let registry = populated_registry(hosts);
        let addr: IpAddr = "10.200.0.1".parse().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(hosts), &addr, |b, addr| {
            b.iter(|| registry.find(black_box(*addr), black_box(Transport::Udp)));
        });
    }

    group.finish();
}

/// Benchmark misses and wildcard hits
fn bench_lookup_wildcard(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_wildcard");

    let registry = populated_registry(1_000);
    let miss: IpAddr = "192.0.2.1".parse().unwrap();
    group.bench_function("miss", |b| {
        b.iter(|| registry.find(black_box(miss), black_box(Transport::Udp)));
    });

    registry
        .add(Client::new("0.0.0.0/0".parse().unwrap(), Transport::Any, "wildcard"))
        .unwrap();
    group.bench_function("wildcard_hit", |b| {
        b.iter(|| registry.find(black_box(miss), black_box(Transport::Tcp)));
    });

    let v6: IpAddr = "2001:db8::1".parse().unwrap();
    group.bench_function("ipv6_miss", |b| {
        b.iter(|| registry.find(black_box(v6), black_box(Transport::Udp)));
    });

    group.finish();
}

/// Benchmark add followed by delete of one client
fn bench_insert_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_delete");

    for hosts in [10, 10_000] {
        let registry = populated_registry(hosts);

        group.bench_with_input(BenchmarkId::from_parameter(hosts), &hosts, |b, _| {
            b.iter(|| {
                let client = registry
                    .add(Client::new(
                        "172.16.5.5/32".parse().unwrap(),
                        Transport::Udp,
                        "transient",
                    ))
                    .unwrap();
                black_box(registry.delete(&client))
            });
        });
    }

    group.finish();
}

/// Benchmark lookups from several threads at once
fn bench_concurrent_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_lookups");

    let registry = Arc::new(populated_registry(10_000));

    for threads in [1, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * 1_000));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let registry = Arc::clone(&registry);
                        std::thread::spawn(move || {
                            let mut found = 0u32;
                            for i in 0..1_000u32 {
                                let addr = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + (t * 1_000 + i) % 10_000 + 1));
                                if registry.find(addr, Transport::Udp).is_some() {
                                    found += 1;
                                }
                            }
                            found
                        })
                    })
                    .collect();

                for handle in handles {
                    black_box(handle.join().unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_lookup_host,
    bench_lookup_network_fallback,
    bench_lookup_wildcard,
    bench_insert_delete,
    bench_concurrent_lookups
);
criterion_main!(benches);
