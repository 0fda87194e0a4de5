//! Fixed-size record allocator backing the node arena.
//!
//! The arena is the stretch of the meta region that follows the region
//! header. It is cut into records of a single configured size, addressed by
//! stable integer IDs. Freed records are chained through an intrusive free
//! list kept in the first 8 bytes of each free record, so the allocator
//! itself needs no storage beyond its header.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// ID value marking an empty free list or a missing record reference.
pub const ABSENT: i64 = -1;

const LINK_BYTES: usize = 8;

/// Persisted state of the record allocator, embedded in the region header.
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct BlocksHeader {
    record_size: u64,
    capacity: u64,
    next_fresh: u64,
    free_head: i64,
}

impl BlocksHeader {
    /// Prepares the allocator for an arena of `arena_bytes` bytes cut into
    /// `record_size` byte records. Records smaller than a free-list link are
    /// not supported.
    pub fn init(&mut self, arena_bytes: u64, record_size: u64) {
        debug_assert!(record_size >= LINK_BYTES as u64);
        self.record_size = record_size;
        self.capacity = arena_bytes / record_size;
        self.next_fresh = 0;
        self.free_head = ABSENT;
    }

    /// Number of records the arena can hold.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Reserves one record and returns its ID, or `None` when the arena is
    /// exhausted. Freed records are reused before fresh ones are cut.
    pub fn alloc(&mut self, arena: &mut [u8]) -> Option<i64> {
        if self.free_head != ABSENT {
            let id = self.free_head;
            let off = self.data_offset(id) as usize;
            let link = arena.get(off..off + LINK_BYTES)?;
            self.free_head = i64::from_ne_bytes(link.try_into().ok()?);
            return Some(id);
        }
        if self.next_fresh < self.capacity {
            let id = self.next_fresh as i64;
            self.next_fresh += 1;
            return Some(id);
        }
        None
    }

    /// Returns a record to the allocator. The record's bytes are reused for
    /// the free-list link and must no longer be interpreted by the caller.
    pub fn free(&mut self, arena: &mut [u8], id: i64) {
        debug_assert!(id >= 0 && (id as u64) < self.capacity);
        let off = self.data_offset(id) as usize;
        let Some(link) = arena.get_mut(off..off + LINK_BYTES) else {
            return;
        };
        link.copy_from_slice(&self.free_head.to_ne_bytes());
        self.free_head = id;
    }

    /// Byte offset of a record within the arena.
    pub fn data_offset(&self, id: i64) -> u64 {
        id as u64 * self.record_size
    }

    /// Inverse of [`data_offset`](Self::data_offset).
    pub fn id_at_offset(&self, offset: u64) -> i64 {
        (offset / self.record_size) as i64
    }
}
