//! Benchmark suite for the InfluxDB line-protocol encoder.
//!
//! Isolates encoding performance from network I/O so the per-reading cost of
//! building the write body can be measured directly.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use ruuvitag_collector::export::influxdb::to_line;
use ruuvitag_collector::{MacAddress, Reading};

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

fn sample_reading(name: &str) -> Reading {
    Reading {
        display_name: name.to_string(),
        temperature: 24.30,
        humidity: 53.49,
        pressure: 1000.44,
    }
}

fn bench_single_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_protocol");
    group.throughput(Throughput::Elements(1));

    let plain = sample_reading("Backyard");
    group.bench_function("plain_name", |b| {
        b.iter(|| {
            let line = to_line(
                black_box("ruuvitag_sensor"),
                black_box(&TEST_MAC),
                black_box(&plain),
                black_box(1_700_000_000_000_000_000),
            );
            black_box(line)
        })
    });

    // Names with spaces hit the escaping path
    let escaped = sample_reading("Living Room, Upstairs");
    group.bench_function("escaped_name", |b| {
        b.iter(|| {
            let line = to_line(
                black_box("ruuvitag_sensor"),
                black_box(&TEST_MAC),
                black_box(&escaped),
                black_box(1_700_000_000_000_000_000),
            );
            black_box(line)
        })
    });

    group.finish();
}

fn bench_batch_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_protocol_batch");

    for count in [1usize, 10, 100] {
        let readings: Vec<(MacAddress, Reading)> = (0..count)
            .map(|i| {
                let mac = MacAddress([0x00, 0x00, 0x00, 0x00, 0x00, i as u8]);
                (mac, sample_reading(&format!("Device_{i}")))
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("readings_{count}"), |b| {
            b.iter(|| {
                let body = readings
                    .iter()
                    .map(|(mac, reading)| {
                        to_line("ruuvitag_sensor", mac, reading, 1_700_000_000_000_000_000)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                black_box(body)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_line, bench_batch_body);
criterion_main!(benches);
