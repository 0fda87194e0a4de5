use hexbox::{AllocError, Region, Usage};

mod util;
use util::MetaBuf;

// 2 * 16^3 units of 8 bytes.
const DATA: u64 = 64 * 1024;

#[test]
fn minimum_granule_fills_the_whole_region() {
    let mut meta = MetaBuf::for_nodes(600);
    let region = Region::init(meta.bytes(), DATA).unwrap();

    let mut offsets = Vec::new();
    loop {
        match region.alloc(8) {
            Ok(offset) => offsets.push(offset),
            Err(AllocError::SizeTooLarge) => break,
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    // Every 8 byte cell of the data region is handed out exactly once, in
    // ascending offset order.
    assert_eq!(offsets.len() as u64, DATA / 8);
    for (i, offset) in offsets.iter().enumerate() {
        assert_eq!(*offset, i as u64 * 8);
    }
    assert_eq!(region.largest_free(), Usage::NONE);

    for offset in offsets {
        region.free(offset);
    }
    assert_eq!(region.largest_free(), Usage::new(3, 2));
}
