// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame encode/parse microbenchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dtp::protocol::wire::{encode_continuation, encode_initial, FrameView};
use dtp::protocol::MAX_FRAME_SIZE;

fn bench_encode_initial(c: &mut Criterion) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let payload = vec![0xA5u8; 256];
    c.bench_function("encode_initial_256b", |b| {
        b.iter(|| {
            encode_initial(
                black_box(&mut buf),
                black_box(0x1234_5678),
                black_box(0xFE),
                black_box(&payload),
            )
            .unwrap()
        })
    });
}

fn bench_encode_continuation(c: &mut Criterion) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let payload = vec![0xA5u8; 4096];
    c.bench_function("encode_continuation_4k", |b| {
        b.iter(|| {
            encode_continuation(black_box(&mut buf), black_box(0x8000_0001), black_box(&payload))
                .unwrap()
        })
    });
}

fn bench_parse(c: &mut Criterion) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let payload = vec![0xA5u8; 4096];
    encode_initial(&mut buf, 0x1234_5678, 0xFE, &payload).unwrap();
    c.bench_function("parse_4k", |b| {
        b.iter(|| {
            let view = FrameView::parse(black_box(&buf)).unwrap();
            black_box(view.transaction_id());
        })
    });
}

criterion_group!(
    benches,
    bench_encode_initial,
    bench_encode_continuation,
    bench_parse
);
criterion_main!(benches);
