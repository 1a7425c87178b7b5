//! Parent-child supervision registry.
//!
//! Automatic supervision links a forked fiber to its forker. The registry
//! records the directed edges and, when a parent reaches `Done`, hands the
//! runtime the set of children to interrupt. It never blocks on teardown:
//! supervision bounds how long a child is *allowed* to keep running, while
//! the actual unwinding happens asynchronously on the children themselves.
//!
//! Sibling failures do not cascade here; the only escalation this kernel
//! performs is "parent done interrupts children". Anything richer (fail-fast
//! races, zips) belongs to the layers built on top.

use crate::types::{FiberId, ForkPolicy};
use std::collections::HashMap;

/// Registry of automatic-supervision edges.
#[derive(Debug, Default)]
pub struct Supervisor {
    children: HashMap<FiberId, Vec<FiberId>>,
    parent_of: HashMap<FiberId, FiberId>,
}

impl Supervisor {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a parent → child edge.
    ///
    /// Only automatic supervision creates edges; for any other policy the
    /// link is silently omitted.
    pub fn register_child(&mut self, parent: FiberId, child: FiberId, policy: ForkPolicy) {
        if !policy.is_supervised() {
            return;
        }
        self.children.entry(parent).or_default().push(child);
        self.parent_of.insert(child, parent);
    }

    /// Returns the supervising parent of `child`, if any.
    #[must_use]
    pub fn parent_of(&self, child: FiberId) -> Option<FiberId> {
        self.parent_of.get(&child).copied()
    }

    /// Returns the supervised children of `parent`.
    #[must_use]
    pub fn children_of(&self, parent: FiberId) -> &[FiberId] {
        self.children.get(&parent).map_or(&[], Vec::as_slice)
    }

    /// Removes a completed child from its parent's edge list.
    pub fn child_done(&mut self, child: FiberId) {
        if let Some(parent) = self.parent_of.remove(&child) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|&c| c != child);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    /// Severs all edges of a completed parent and returns the children that
    /// must now receive interrupt requests.
    pub fn parent_done(&mut self, parent: FiberId) -> Vec<FiberId> {
        let children = self.children.remove(&parent).unwrap_or_default();
        for child in &children {
            self.parent_of.remove(child);
        }
        children
    }

    /// Returns the number of live supervision edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.parent_of.len()
    }
}
