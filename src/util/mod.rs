//! Internal utilities.
//!
//! Kept minimal and dependency-free; everything here exists to support the
//! record arenas in [`crate::runtime`].

pub mod arena;

pub use arena::{Arena, ArenaIndex};
