//! The occupancy-tree engine.
//!
//! Nodes form a tree rooted in record 0 of the arena. Placement descends
//! from the root, splitting free slots into child nodes until it reaches the
//! level of the requested class, and always takes the first branch in slot
//! order that can satisfy the request, so offsets are deterministic for a
//! given call sequence. Freeing walks the radix decomposition of the offset
//! down to the owning node, clears the object's slots and hands emptied
//! nodes back to the record allocator.
//!
//! Every occupancy change refreshes the node's longest free run. The cached
//! maximum of a node's children is refreshed only when the node runs out of
//! free slots of its own, and is consulted only in that state; while free
//! slots remain the cache may lag behind the children. Capacity changes walk
//! parentward and stop at the first node whose caches end up unchanged.
//!
//! The engine works on locally created nodes in slot order and resolves
//! every parent and child reference through the record allocator, one record
//! view at a time. Callers serialize whole operations; for a sharded-lock
//! variant the required discipline is read locks for capacity probes, write
//! locks for any slot or cache mutation, and parent locks taken only while
//! the child's is still held.

use log::error;

use crate::blocks::{BlocksHeader, ABSENT};
use crate::node::{RawNode, SlotState};
use crate::region::AllocError;
use crate::usage::Usage;
use zerocopy::FromBytes;

/// Record ID of the root node.
pub(crate) const ROOT: i64 = 0;

pub(crate) const RECORD_SIZE: u64 = core::mem::size_of::<RawNode>() as u64;

/// Units covered by one slot of a node at `level`.
fn slot_units(level: u8) -> u64 {
    1u64 << (4 * level as u32)
}

/// Engine view over an initialized meta region.
pub(crate) struct Tree<'a> {
    pub blocks: &'a mut BlocksHeader,
    pub arena: &'a mut [u8],
}

impl<'a> Tree<'a> {
    fn node(&self, id: i64) -> Option<&RawNode> {
        if id < 0 {
            return None;
        }
        let off = self.blocks.data_offset(id) as usize;
        let bytes = self.arena.get(off..off + RECORD_SIZE as usize)?;
        RawNode::ref_from_bytes(bytes).ok()
    }

    fn node_mut(&mut self, id: i64) -> Option<&mut RawNode> {
        if id < 0 {
            return None;
        }
        let off = self.blocks.data_offset(id) as usize;
        let bytes = self.arena.get_mut(off..off + RECORD_SIZE as usize)?;
        RawNode::mut_from_bytes(bytes).ok()
    }

    /// Formats record 0 as the root covering `span`.
    pub fn format_root(&mut self, span: Usage) -> Option<()> {
        let root = self.blocks.alloc(&mut *self.arena)?;
        debug_assert_eq!(root, ROOT);
        self.node_mut(root)?.format(span.level, span.multiple, ABSENT);
        Some(())
    }

    /// Largest class currently allocatable anywhere in the tree.
    pub fn capacity(&self) -> Usage {
        self.node(ROOT).map_or(Usage::NONE, RawNode::effective_max)
    }

    /// Places an object of class `want` and returns its unit offset.
    ///
    /// The caller has already checked `want` against [`capacity`](Self::capacity).
    pub fn place(&mut self, id: i64, want: Usage) -> Result<u64, AllocError> {
        let Some(node) = self.node(id) else {
            error!("placement reached unresolvable node {id}");
            return Err(AllocError::InvariantViolated);
        };
        if !node.is_formatted() {
            error!("placement reached unformatted node {id}");
            return Err(AllocError::InvariantViolated);
        }
        let level = node.objlevel;
        let available = node.available_slots;

        if want.level == level {
            let Some(start) = self.node(id).and_then(|node| node.first_fit(want.multiple)) else {
                error!("node {id} advertised a free run it does not have");
                return Err(AllocError::InvariantViolated);
            };
            let node = self.node_mut(id).ok_or(AllocError::InvariantViolated)?;
            node.occupy(start, want.multiple);
            let (run_changed, child_changed) = self.refresh_caps(id);
            if run_changed || child_changed {
                let parent = self.node(id).map_or(ABSENT, |node| node.parent);
                if parent != ABSENT {
                    self.bubble_capacity(parent);
                }
            }
            return Ok(start as u64 * slot_units(level));
        }

        if want.level > level {
            error!("class above node level {level} leaked past the root check");
            return Err(AllocError::InvariantViolated);
        }

        for slot in 0..available as usize {
            let (state, child) = {
                let node = self.node(id).ok_or(AllocError::InvariantViolated)?;
                (node.slot_state(slot), node.children[slot])
            };
            match state {
                SlotState::Formatted => {
                    let Some(child_max) = self.node(child).map(RawNode::effective_max) else {
                        error!("slot {slot} of node {id} references a missing child");
                        return Err(AllocError::InvariantViolated);
                    };
                    if child_max >= want {
                        let below = self.place(child, want)?;
                        return Ok(slot as u64 * slot_units(level) + below);
                    }
                }
                SlotState::Unused => {
                    let child = self.split_slot(id, slot)?;
                    // A fresh child offers a full level below this one, which
                    // covers any class that descended past this node.
                    let below = self.place(child, want)?;
                    return Ok(slot as u64 * slot_units(level) + below);
                }
                SlotState::ObjStart | SlotState::ObjContinued => {}
            }
        }

        error!("no branch of node {id} could hold the advertised capacity");
        Err(AllocError::InvariantViolated)
    }

    /// Splits a free slot into a fresh child node and links it in.
    fn split_slot(&mut self, id: i64, slot: usize) -> Result<i64, AllocError> {
        let child = self
            .blocks
            .alloc(&mut *self.arena)
            .ok_or(AllocError::OutOfMetadata)?;
        let objlevel = self
            .node(id)
            .map(|node| node.objlevel)
            .ok_or(AllocError::InvariantViolated)?;
        self.node_mut(child)
            .ok_or(AllocError::InvariantViolated)?
            .format(objlevel - 1, 16, id);
        let node = self.node_mut(id).ok_or(AllocError::InvariantViolated)?;
        node.children[slot] = child;
        node.set_slot(slot, SlotState::Formatted);
        self.refresh_caps(id);
        Ok(child)
    }

    /// Resolves a unit offset to the node and slot holding its object start.
    pub fn find_owner(&self, unit: u64) -> Option<(i64, usize)> {
        let mut id = ROOT;
        // Levels strictly decrease on the way down, so the walk is bounded.
        for _ in 0..=Usage::MAX.level {
            let node = self.node(id)?;
            if !node.is_formatted() {
                return None;
            }
            let slot = ((unit >> (4 * node.objlevel as u32)) & 0xF) as usize;
            if slot >= node.available_slots as usize {
                return None;
            }
            match node.slot_state(slot) {
                SlotState::ObjStart => return Some((id, slot)),
                SlotState::Formatted => id = node.children[slot],
                SlotState::Unused | SlotState::ObjContinued => return None,
            }
        }
        None
    }

    /// Clears the object at `(id, slot)`, releases nodes it leaves empty and
    /// propagates the regained capacity.
    pub fn release(&mut self, mut id: i64, slot: usize) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        node.clear_object(slot);
        loop {
            let (run_changed, child_changed) = self.refresh_caps(id);
            let Some(node) = self.node(id) else {
                return;
            };
            let parent = node.parent;
            if parent != ABSENT && node.is_vacant() {
                self.detach(parent, id);
                id = parent;
                continue;
            }
            if (run_changed || child_changed) && parent != ABSENT {
                self.bubble_capacity(parent);
            }
            return;
        }
    }

    /// Unlinks an empty child from its parent and recycles its record.
    fn detach(&mut self, parent: i64, child: i64) {
        let Some(node) = self.node_mut(parent) else {
            return;
        };
        let Some(slot) = node.children.iter().position(|&c| c == child) else {
            return;
        };
        node.children[slot] = ABSENT;
        node.set_slot(slot, SlotState::Unused);
        self.blocks.free(&mut *self.arena, child);
        // The freed slot revives the parent's own run, so the child cache
        // would go unread; refresh it anyway so an empty subtree reads as
        // empty rather than as leftover capacity.
        let fresh = self.scan_child_max(parent);
        if let Some(node) = self.node_mut(parent) {
            node.child_max = fresh;
        }
    }

    /// Recomputes the longest free run of a node, and its child cache when
    /// the run hits zero. Returns which of the two actually changed.
    fn refresh_caps(&mut self, id: i64) -> (bool, bool) {
        let Some(node) = self.node_mut(id) else {
            return (false, false);
        };
        let run = node.longest_run();
        let run_changed = node.max_run != run;
        node.max_run = run;
        if run != 0 {
            return (run_changed, false);
        }
        let fresh = self.scan_child_max(id);
        let Some(node) = self.node_mut(id) else {
            return (run_changed, false);
        };
        let child_changed = node.child_max != fresh;
        node.child_max = fresh;
        (run_changed, child_changed)
    }

    /// Largest effective class over the formatted children of a node.
    fn scan_child_max(&self, id: i64) -> Usage {
        let Some(node) = self.node(id) else {
            return Usage::NONE;
        };
        let mut best = Usage::NONE;
        for slot in 0..node.available_slots as usize {
            if node.slot_state(slot) != SlotState::Formatted {
                continue;
            }
            if let Some(child) = self.node(node.children[slot]) {
                best = best.max(child.effective_max());
            }
        }
        best
    }

    /// Walks a capacity change toward the root. Stops at the first ancestor
    /// that still has free slots of its own or whose child cache is already
    /// accurate.
    fn bubble_capacity(&mut self, mut id: i64) {
        loop {
            let Some(node) = self.node(id) else {
                return;
            };
            if node.max_run > 0 {
                return;
            }
            let fresh = self.scan_child_max(id);
            let Some(node) = self.node_mut(id) else {
                return;
            };
            if node.child_max == fresh {
                return;
            }
            node.child_max = fresh;
            let parent = node.parent;
            if parent == ABSENT {
                return;
            }
            id = parent;
        }
    }
}
