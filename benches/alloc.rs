use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use hexbox::{meta_bytes_for, Region};
use zerocopy::IntoBytes;

const DATA: u64 = 16 * 1024 * 1024;
const SIZES: [u64; 5] = [4, 34, 2355, 673, 3348];

fn meta_backing(nodes: u64) -> Vec<u64> {
    vec![0u64; (meta_bytes_for(nodes) / 8) as usize]
}

fn mixed_size_cycle(c: &mut Criterion) {
    c.bench_function("mixed sizes, 100 objects", |b| {
        b.iter_batched(
            || meta_backing(128),
            |mut meta| {
                let region = Region::init(meta.as_mut_slice().as_mut_bytes(), DATA).unwrap();
                let offsets: Vec<u64> = (0..100)
                    .map(|i| region.alloc(SIZES[i % SIZES.len()]).unwrap())
                    .collect();
                for offset in offsets {
                    region.free(offset);
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn small_object_fill(c: &mut Criterion) {
    // 8192 granule objects saturate a 64 KiB region.
    c.bench_function("granule fill, 64 KiB", |b| {
        b.iter_batched(
            || meta_backing(600),
            |mut meta| {
                let region = Region::init(meta.as_mut_slice().as_mut_bytes(), 64 * 1024).unwrap();
                while region.alloc(8).is_ok() {}
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, mixed_size_cycle, small_object_fill);
criterion_main!(benches);
