// SPDX-License-Identifier: BSD-3-Clause
//! The abstract reachability graph.
//!
//! Nodes live in an arena and are addressed by [`StateId`]. Ids are handed
//! out in creation order and never reused, so comparing ids compares age.
//! Removing a node detaches it and marks it destroyed; the slot stays.

use std::collections::BTreeSet;
use std::fmt;

use crate::reached::ReachedSetId;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StateId(u32);

impl StateId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Node<S> {
    state: S,
    owner: ReachedSetId,
    parents: Vec<StateId>,
    children: Vec<StateId>,
    destroyed: bool,
}

#[derive(Debug)]
pub struct Arg<S> {
    nodes: Vec<Node<S>>,
}

impl<S> Default for Arg<S> {
    fn default() -> Self {
        Arg { nodes: Vec::new() }
    }
}

impl<S> Arg<S> {
    /// Allocate a node for `state`, owned by the reached-set `owner`.
    pub fn add(&mut self, state: S, owner: ReachedSetId) -> StateId {
        let id = StateId(self.nodes.len() as u32);
        self.nodes.push(Node {
            state,
            owner,
            parents: Vec::new(),
            children: Vec::new(),
            destroyed: false,
        });
        id
    }

    pub fn add_parent(&mut self, child: StateId, parent: StateId) {
        debug_assert!(!self.is_destroyed(child) && !self.is_destroyed(parent));
        let c = &mut self.nodes[child.index()];
        if !c.parents.contains(&parent) {
            c.parents.push(parent);
            self.nodes[parent.index()].children.push(child);
        }
    }

    #[inline]
    pub fn state(&self, id: StateId) -> &S {
        &self.nodes[id.index()].state
    }

    #[inline]
    pub fn owner(&self, id: StateId) -> ReachedSetId {
        self.nodes[id.index()].owner
    }

    #[inline]
    pub fn parents(&self, id: StateId) -> &[StateId] {
        &self.nodes[id.index()].parents
    }

    #[inline]
    pub fn children(&self, id: StateId) -> &[StateId] {
        &self.nodes[id.index()].children
    }

    #[inline]
    pub fn is_destroyed(&self, id: StateId) -> bool {
        self.nodes[id.index()].destroyed
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Detach `id` from all parents and children and mark it destroyed.
    pub fn remove_from_arg(&mut self, id: StateId) {
        let parents = std::mem::take(&mut self.nodes[id.index()].parents);
        for p in parents {
            self.nodes[p.index()].children.retain(|c| *c != id);
        }
        let children = std::mem::take(&mut self.nodes[id.index()].children);
        for c in children {
            self.nodes[c.index()].parents.retain(|p| *p != id);
        }
        self.nodes[id.index()].destroyed = true;
    }

    /// `id` and everything reachable from it through child links.
    pub fn subgraph(&self, id: StateId) -> BTreeSet<StateId> {
        let mut seen = BTreeSet::new();
        let mut todo = vec![id];
        while let Some(next) = todo.pop() {
            if seen.insert(next) {
                todo.extend(self.children(next).iter().copied());
            }
        }
        seen
    }
}
