#![doc = include_str!("../README.md")]

pub mod blocks;
mod node;
pub mod region;
mod tree;
pub mod usage;

pub use region::{meta_bytes_for, AllocError, BindError, InitError, Region};
pub use usage::Usage;
