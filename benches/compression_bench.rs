use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strongbox::codec;

fn bench_compression(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];
    c.bench_function("zlib_compress_1mb_level6", |b| {
        b.iter(|| codec::compress(black_box(&data), 6).unwrap())
    });

    let compressed = codec::compress(&data, 6).unwrap();
    c.bench_function("zlib_decompress_1mb_level6", |b| {
        b.iter(|| codec::decompress(black_box(&compressed), data.len()).unwrap())
    });
}

criterion_group!(benches, bench_compression);
criterion_main!(benches);
