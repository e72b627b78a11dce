// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use fairpace::FlowClass;
use fairpace::PacketStamp;
use fairpace::Timestamp;
use fairpace::WindowedStatsCollector;
use fairpace::DEFAULT_MAX_PACKET_RECORDS;

fn full_collector(capacity: usize) -> WindowedStatsCollector {
    let mut c = match WindowedStatsCollector::new(capacity) {
        Ok(c) => c,
        Err(e) => panic!("create collector: {:?}", e),
    };
    for i in 0..capacity as u64 {
        let stamp = PacketStamp::new(Timestamp::from_micros(i * 100), FlowClass::Primary);
        c.on_packet_delivered(&stamp, 1500, Timestamp::from_micros(i * 100 + 10_000));
    }
    c
}

pub fn insert_benchmark(c: &mut Criterion) {
    let mut collector = full_collector(DEFAULT_MAX_PACKET_RECORDS);
    let mut i = DEFAULT_MAX_PACKET_RECORDS as u64;
    c.bench_function("window stats insert", |b| {
        b.iter(|| {
            let stamp = PacketStamp::new(Timestamp::from_micros(i * 100), FlowClass::Other);
            collector.on_packet_delivered(&stamp, 1500, Timestamp::from_micros(i * 100 + 10_000));
            i += 1;
        })
    });
}

pub fn current_stats_benchmark(c: &mut Criterion) {
    let collector = full_collector(DEFAULT_MAX_PACKET_RECORDS);
    c.bench_function("window stats current", |b| {
        b.iter(|| collector.current_stats())
    });

    let collector = full_collector(DEFAULT_MAX_PACKET_RECORDS * 10);
    c.bench_function("window stats current 10x", |b| {
        b.iter(|| collector.current_stats())
    });
}

criterion_group!(benches, insert_benchmark, current_stats_benchmark);
criterion_main!(benches);
