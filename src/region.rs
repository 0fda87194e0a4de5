//! Binding an allocator to its caller-supplied byte regions.
//!
//! A [`Region`] manages two regions the caller owns: the meta region, which
//! holds the header and the node arena, and the data region, which holds
//! nothing but the caller's objects. The allocator never touches the data
//! region; it only hands out byte offsets into it, so the data bytes may
//! live in process memory, a mapped file or a block device the process
//! cannot even address directly.
//!
//! # Meta region format
//! ```text
//!             ┌────16 byte───┐┌──8 byte──┐┌──8 byte──┐┌────32 byte───┐
//!           ┌ ┌──────────────┐┌──────────┐┌──────────┐┌──────────────┐
//!  header   │ │ magic number ││meta bytes││data bytes││ record state │
//!           └ └──────────────┘└──────────┘└──────────┘└──────────────┘
//!             ┌───────────────────176 byte each──────────────────────┐
//!           ┌ ┌──────────────┐┌──────────────┐┌──────────────┐
//!  arena    │ │ node record 0││ node record 1││     ...      │
//!           └ └──────────────┘└──────────────┘└──────────────┘
//! ```
//!
//! Record 0 is always the root node. The magic number doubles as a guard
//! against initializing a live region twice and as the validity check when
//! re-attaching to one.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hex_literal::hex;
use log::{debug, trace, warn};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::blocks::BlocksHeader;
use crate::tree::{Tree, RECORD_SIZE, ROOT};
use crate::usage::{align_to, Usage, UNIT_BYTES};

/// Identifies an initialized meta region, "hexbox/1" in ASCII.
const REGION_MAGIC: [u8; 16] = hex!("686578626f782f31 0000000000000000");

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RegionHeader {
    magic: [u8; 16],
    meta_bytes: u64,
    data_bytes: u64,
    blocks: BlocksHeader,
}

/// Meta bytes needed for a header plus an arena of `nodes` node records.
///
/// Every sixteen-fold split of a region adds one node, so regions that are
/// carved into many small objects need proportionally many records.
pub fn meta_bytes_for(nodes: u64) -> u64 {
    core::mem::size_of::<RegionHeader>() as u64 + nodes * RECORD_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The meta region already carries the magic number.
    AlreadyInitialized,
    /// The meta slice is not 8 byte aligned, or the data size is not a
    /// whole number of size-class units.
    Misaligned,
    /// The meta region cannot hold the header and a root node.
    NoRoot,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AlreadyInitialized => write!(f, "meta region is already initialized"),
            InitError::Misaligned => write!(f, "region size or alignment is unsupported"),
            InitError::NoRoot => write!(f, "meta region is too small for a root node"),
        }
    }
}

impl std::error::Error for InitError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// The meta slice is too small to hold a header.
    Truncated,
    /// The meta slice is not 8 byte aligned.
    Misaligned,
    /// The magic number is missing or belongs to another format version.
    BadMagic,
    /// The header was written for a meta region of a different size.
    SizeMismatch,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::Truncated => write!(f, "meta region is too small for a header"),
            BindError::Misaligned => write!(f, "meta region is not 8 byte aligned"),
            BindError::BadMagic => write!(f, "meta region carries no valid magic number"),
            BindError::SizeMismatch => write!(f, "meta region size disagrees with its header"),
        }
    }
}

impl std::error::Error for BindError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-byte objects are not tracked.
    ZeroSize,
    /// The rounded size class exceeds the largest free class of the tree.
    SizeTooLarge,
    /// The node arena ran out of records while splitting.
    OutOfMetadata,
    /// The tree advertised capacity the descent could not find. Indicates a
    /// corrupted meta region.
    InvariantViolated,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::ZeroSize => write!(f, "cannot allocate zero bytes"),
            AllocError::SizeTooLarge => write!(f, "no free run large enough"),
            AllocError::OutOfMetadata => write!(f, "node arena exhausted"),
            AllocError::InvariantViolated => write!(f, "occupancy tree is inconsistent"),
        }
    }
}

impl std::error::Error for AllocError {}

/// A buddy-style object allocator bound to a caller-supplied meta region.
///
/// All state lives in the meta bytes, so a region outlives the `Region`
/// value that manipulates it; dropping the handle and [`bind`](Region::bind)ing
/// again resumes where the previous handle left off. Operations serialize
/// behind one lock, which keeps concurrent callers safe and makes offsets
/// deterministic for a given call order.
#[derive(Debug)]
pub struct Region<'m> {
    meta: Mutex<&'m mut [u8]>,
}

impl<'m> Region<'m> {
    /// Initializes `meta` for a data region of `data_bytes` bytes.
    ///
    /// The data size must be expressible as a single size class, which is
    /// any `m * 16^l * 8` with `m` in `1..=15`. Fails with
    /// [`InitError::AlreadyInitialized`] rather than clobbering a region
    /// that already carries the magic number.
    pub fn init(meta: &'m mut [u8], data_bytes: u64) -> Result<Self, InitError> {
        let meta_len = meta.len() as u64;
        {
            if meta.as_ptr().align_offset(core::mem::align_of::<RegionHeader>()) != 0 {
                return Err(InitError::Misaligned);
            }
            let Ok((header, arena)) = RegionHeader::mut_from_prefix(&mut *meta) else {
                return Err(InitError::NoRoot);
            };
            if header.magic == REGION_MAGIC {
                return Err(InitError::AlreadyInitialized);
            }
            if data_bytes == 0 || data_bytes % UNIT_BYTES != 0 {
                return Err(InitError::Misaligned);
            }
            let units = data_bytes / UNIT_BYTES;
            let span = align_to(units);
            if span.units() != units {
                return Err(InitError::Misaligned);
            }
            header.blocks.init(arena.len() as u64, RECORD_SIZE);
            let mut tree = Tree {
                blocks: &mut header.blocks,
                arena,
            };
            if tree.format_root(span).is_none() {
                return Err(InitError::NoRoot);
            }
            header.meta_bytes = meta_len;
            header.data_bytes = data_bytes;
            header.magic = REGION_MAGIC;
            debug!("initialized region of {data_bytes} data bytes, {meta_len} meta bytes");
        }
        Ok(Region {
            meta: Mutex::new(meta),
        })
    }

    /// Re-attaches to a meta region initialized earlier, possibly by another
    /// process or a previous run. Only the magic number and the recorded
    /// meta size are checked.
    pub fn bind(meta: &'m mut [u8]) -> Result<Self, BindError> {
        {
            if meta.as_ptr().align_offset(core::mem::align_of::<RegionHeader>()) != 0 {
                return Err(BindError::Misaligned);
            }
            let Ok((header, _)) = RegionHeader::ref_from_prefix(&*meta) else {
                return Err(BindError::Truncated);
            };
            if header.magic != REGION_MAGIC {
                return Err(BindError::BadMagic);
            }
            if header.meta_bytes != meta.len() as u64 {
                return Err(BindError::SizeMismatch);
            }
        }
        Ok(Region {
            meta: Mutex::new(meta),
        })
    }

    /// Allocates `size` bytes and returns the byte offset of the object
    /// within the data region. The caller adds its own data base address if
    /// the region is addressable at all.
    pub fn alloc(&self, size: u64) -> Result<u64, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let units = size.div_ceil(UNIT_BYTES);
        if units > Usage::MAX.units() {
            return Err(AllocError::SizeTooLarge);
        }
        let want = align_to(units);

        let mut guard = self.lock();
        let (header, arena) = Self::parts(&mut guard).ok_or(AllocError::InvariantViolated)?;
        let mut tree = Tree {
            blocks: &mut header.blocks,
            arena,
        };
        if want > tree.capacity() {
            return Err(AllocError::SizeTooLarge);
        }
        let unit_offset = tree.place(ROOT, want)?;
        let offset = unit_offset * UNIT_BYTES;
        trace!("allocated {size} bytes at offset {offset}");
        Ok(offset)
    }

    /// Releases the object previously allocated at `offset`.
    ///
    /// An offset that does not resolve to the start of a live object is
    /// logged and ignored; the region is left untouched.
    pub fn free(&self, offset: u64) {
        let mut guard = self.lock();
        let Some((header, arena)) = Self::parts(&mut guard) else {
            return;
        };
        if offset % UNIT_BYTES != 0 || offset >= header.data_bytes {
            warn!("ignoring free of untracked offset {offset}");
            return;
        }
        let mut tree = Tree {
            blocks: &mut header.blocks,
            arena,
        };
        match tree.find_owner(offset / UNIT_BYTES) {
            Some((id, slot)) => {
                tree.release(id, slot);
                trace!("freed object at offset {offset}");
            }
            None => warn!("ignoring free of untracked offset {offset}"),
        }
    }

    /// The largest size class a single allocation can currently get.
    pub fn largest_free(&self) -> Usage {
        let mut guard = self.lock();
        let Some((header, arena)) = Self::parts(&mut guard) else {
            return Usage::NONE;
        };
        Tree {
            blocks: &mut header.blocks,
            arena,
        }
        .capacity()
    }

    /// Size of the data region this allocator was initialized for.
    pub fn data_bytes(&self) -> u64 {
        let mut guard = self.lock();
        Self::parts(&mut guard).map_or(0, |(header, _)| header.data_bytes)
    }

    fn lock(&self) -> MutexGuard<'_, &'m mut [u8]> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parts<'b>(guard: &'b mut MutexGuard<'_, &'m mut [u8]>) -> Option<(&'b mut RegionHeader, &'b mut [u8])> {
        RegionHeader::mut_from_prefix(&mut ***guard).ok()
    }
}
