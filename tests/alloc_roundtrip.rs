use hexbox::Region;

mod util;
use util::MetaBuf;

const DATA: u64 = 16 * 1024 * 1024;
const SIZES: [u64; 5] = [4, 34, 2355, 673, 3348];

#[test]
fn mixed_sizes_round_trip_to_a_fresh_region() {
    let mut meta = MetaBuf::for_nodes(128);
    let region = Region::init(meta.bytes(), DATA).unwrap();
    let full = region.largest_free();

    let offsets: Vec<u64> = (0..100)
        .map(|i| region.alloc(SIZES[i % SIZES.len()]).unwrap())
        .collect();
    for offset in &offsets {
        region.free(*offset);
    }

    // Everything coalesced, so the region takes one object spanning it all.
    assert_eq!(region.largest_free(), full);
    let whole = region.alloc(DATA).unwrap();
    assert_eq!(whole, 0);
    region.free(whole);
    assert_eq!(region.largest_free(), full);
}

#[test]
fn free_order_does_not_matter() {
    let mut meta = MetaBuf::for_nodes(128);
    let region = Region::init(meta.bytes(), DATA).unwrap();
    let full = region.largest_free();

    let offsets: Vec<u64> = (0..100)
        .map(|i| region.alloc(SIZES[i % SIZES.len()]).unwrap())
        .collect();
    // Reverse order exercises coalescing from the opposite end.
    for offset in offsets.iter().rev() {
        region.free(*offset);
    }
    assert_eq!(region.largest_free(), full);
}
