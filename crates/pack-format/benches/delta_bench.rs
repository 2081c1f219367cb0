use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pack_format::delta::{apply_delta, encode_copy, encode_insert, write_varint};

fn build_delta(base_len: usize, target_len: usize, instructions: &[u8]) -> Vec<u8> {
    let mut delta = Vec::new();
    delta.extend_from_slice(&write_varint(base_len as u64));
    delta.extend_from_slice(&write_varint(target_len as u64));
    delta.extend_from_slice(instructions);
    delta
}

fn bench_apply_delta(c: &mut Criterion) {
    let base: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    // Alternate copies out of the base with short literal runs.
    let mut ins = Vec::new();
    let mut target_len = 0usize;
    for i in 0..64 {
        ins.extend_from_slice(&encode_copy(((i * 911) % 60_000) as u64, 700));
        ins.extend_from_slice(&encode_insert(b"interleaved literal run"));
        target_len += 700 + 23;
    }
    let delta = build_delta(base.len(), target_len, &ins);

    c.bench_function("apply_delta mixed 64k", |b| {
        b.iter(|| apply_delta(black_box(&base), black_box(&delta)).unwrap())
    });

    let copy_all = build_delta(base.len(), base.len(), &encode_copy(0, 0x10000));
    c.bench_function("apply_delta copy 64k", |b| {
        b.iter(|| apply_delta(black_box(&base), black_box(&copy_all)).unwrap())
    });
}

criterion_group!(benches, bench_apply_delta);
criterion_main!(benches);
