use hexbox::{usage::align_to, Region};
use rand::Rng;

mod util;
use util::MetaBuf;

const DATA: u64 = 16 * 1024 * 1024;

/// Bytes an allocation of `size` actually occupies.
fn granule(size: u64) -> u64 {
    align_to(size.div_ceil(8)).bytes()
}

#[test]
fn live_objects_never_overlap() {
    let mut meta = MetaBuf::for_nodes(512);
    let region = Region::init(meta.bytes(), DATA).unwrap();
    let mut rng = rand::thread_rng();

    let mut live: Vec<(u64, u64)> = (0..200)
        .map(|_| {
            let size = rng.gen_range(1..=8192);
            (region.alloc(size).unwrap(), size)
        })
        .collect();

    live.sort();
    for pair in live.windows(2) {
        let (off_a, size_a) = pair[0];
        let (off_b, _) = pair[1];
        assert!(off_a + granule(size_a) <= off_b, "{pair:?} overlap");
    }

    let full = align_to(DATA / 8);
    for (offset, _) in live {
        region.free(offset);
    }
    assert_eq!(region.largest_free(), full);
}

#[test]
fn offsets_are_aligned_to_their_class() {
    let mut meta = MetaBuf::for_nodes(512);
    let region = Region::init(meta.bytes(), DATA).unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..200 {
        let size: u64 = rng.gen_range(1..=50_000);
        let class = align_to(size.div_ceil(8));
        let offset = region.alloc(size).unwrap();
        assert_eq!(offset % 8, 0);
        // A class at level l sits on a 16^l unit boundary.
        assert_eq!(offset % (8u64 << (4 * class.level as u32)), 0);
    }
}
