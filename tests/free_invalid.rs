use hexbox::Region;

mod util;
use util::MetaBuf;

const DATA: u64 = 16 * 1024 * 1024;

#[test]
fn freeing_an_address_never_allocated_is_ignored() {
    let mut meta = MetaBuf::for_nodes(16);
    let region = Region::init(meta.bytes(), DATA).unwrap();

    region.free(24);
    // The bogus free left the region untouched.
    assert_eq!(region.alloc(8).unwrap(), 0);
}

#[test]
fn out_of_range_and_misaligned_frees_are_ignored() {
    let mut meta = MetaBuf::for_nodes(16);
    let region = Region::init(meta.bytes(), DATA).unwrap();
    let a = region.alloc(8).unwrap();

    region.free(a + 4);
    region.free(DATA);
    region.free(u64::MAX);
    let b = region.alloc(8).unwrap();
    assert_ne!(a, b);
    region.free(a);
    region.free(b);
}

#[test]
fn double_free_is_ignored() {
    let mut meta = MetaBuf::for_nodes(16);
    let region = Region::init(meta.bytes(), DATA).unwrap();
    let full = region.largest_free();

    let a = region.alloc(64).unwrap();
    region.free(a);
    region.free(a);
    assert_eq!(region.largest_free(), full);
    assert_eq!(region.alloc(64).unwrap(), a);
}

#[test]
fn freeing_the_middle_of_an_object_is_ignored() {
    let mut meta = MetaBuf::for_nodes(16);
    let region = Region::init(meta.bytes(), DATA).unwrap();

    let a = region.alloc(64).unwrap();
    let before = region.largest_free();
    region.free(a + 8);
    // The object survived its partial free attempt.
    assert_eq!(region.largest_free(), before);
    let b = region.alloc(64).unwrap();
    assert_ne!(b, a + 8);
    region.free(a);
    region.free(b);
}
