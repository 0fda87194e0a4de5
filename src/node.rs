//! The per-node record of the occupancy tree.
//!
//! A node accounts for one hex-region of the data region through 16 slots,
//! each covering `16^objlevel` units. Slots are either free, split into a
//! child node, or hold part of an object. Records live in the meta-region
//! arena and reference each other by record ID only.

use crate::blocks::ABSENT;
use crate::usage::Usage;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub(crate) const SLOT_COUNT: usize = 16;

const FULL_RUN: u8 = 16;

/// Occupancy of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SlotState {
    Unused = 0,
    Formatted = 1,
    ObjStart = 2,
    ObjContinued = 3,
}

impl SlotState {
    fn from_raw(raw: u8) -> SlotState {
        match raw {
            0 => SlotState::Unused,
            1 => SlotState::Formatted,
            2 => SlotState::ObjStart,
            _ => SlotState::ObjContinued,
        }
    }
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, Clone, Copy)]
#[repr(C)]
pub(crate) struct RawSlot {
    state: u8,
    run_hint: u8,
}

impl RawSlot {
    const UNUSED: RawSlot = RawSlot {
        state: SlotState::Unused as u8,
        run_hint: FULL_RUN,
    };
}

/// One tree-node record as persisted in the arena.
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub(crate) struct RawNode {
    pub state: u8,
    pub objlevel: u8,
    pub available_slots: u8,
    /// Longest run of unused slots, refreshed after every occupancy change.
    pub max_run: u8,
    /// Largest class allocatable below this node. Only meaningful while
    /// `max_run` is zero; left stale otherwise.
    pub child_max: Usage,
    _pad: [u8; 2],
    slots: [RawSlot; SLOT_COUNT],
    pub parent: i64,
    pub children: [i64; SLOT_COUNT],
}

impl RawNode {
    /// Turns this record into a fresh node with every slot free.
    pub fn format(&mut self, objlevel: u8, available_slots: u8, parent: i64) {
        self.state = SlotState::Formatted as u8;
        self.objlevel = objlevel;
        self.available_slots = available_slots;
        self.max_run = available_slots;
        self.child_max = Usage::NONE;
        self._pad = [0; 2];
        self.slots = [RawSlot::UNUSED; SLOT_COUNT];
        self.parent = parent;
        self.children = [ABSENT; SLOT_COUNT];
    }

    pub fn is_formatted(&self) -> bool {
        self.state == SlotState::Formatted as u8
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        SlotState::from_raw(self.slots[slot].state)
    }

    pub fn set_slot(&mut self, slot: usize, state: SlotState) {
        self.slots[slot] = RawSlot {
            state: state as u8,
            run_hint: if state == SlotState::Unused {
                FULL_RUN
            } else {
                0
            },
        };
    }

    /// Longest run of unused slots among the available ones.
    pub fn longest_run(&self) -> u8 {
        let mut run = 0u8;
        let mut best = 0u8;
        for slot in &self.slots[..self.available_slots as usize] {
            if slot.state == SlotState::Unused as u8 {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        best
    }

    /// Start of the leftmost unused run of at least `want` slots.
    pub fn first_fit(&self, want: u8) -> Option<usize> {
        debug_assert!(want >= 1);
        let mut run = 0u8;
        for (i, slot) in self.slots[..self.available_slots as usize].iter().enumerate() {
            if slot.state == SlotState::Unused as u8 {
                run += 1;
                if run >= want {
                    return Some(i + 1 - want as usize);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Marks a run of `len` slots as one object starting at `start`.
    pub fn occupy(&mut self, start: usize, len: u8) {
        self.set_slot(start, SlotState::ObjStart);
        for slot in start + 1..start + len as usize {
            self.set_slot(slot, SlotState::ObjContinued);
        }
    }

    /// Clears the object starting at `start` and returns its slot count.
    pub fn clear_object(&mut self, start: usize) -> u8 {
        debug_assert_eq!(self.slot_state(start), SlotState::ObjStart);
        self.set_slot(start, SlotState::Unused);
        let mut len = 1;
        for slot in start + 1..self.available_slots as usize {
            if self.slot_state(slot) != SlotState::ObjContinued {
                break;
            }
            self.set_slot(slot, SlotState::Unused);
            len += 1;
        }
        len
    }

    /// True once every available slot is unused again.
    pub fn is_vacant(&self) -> bool {
        self.slots[..self.available_slots as usize]
            .iter()
            .all(|slot| slot.state == SlotState::Unused as u8)
    }

    /// The largest class this node can currently satisfy on its own, or the
    /// cached maximum of its children when its own slots are exhausted.
    pub fn effective_max(&self) -> Usage {
        match self.max_run {
            0 => self.child_max,
            16 => Usage::new(self.objlevel + 1, 1),
            run => Usage::new(self.objlevel, run),
        }
    }
}
