// SPDX-License-Identifier: BSD-3-Clause
//! Reached-sets.
//!
//! A reached-set holds the states one run of the fixpoint algorithm
//! discovered, with their precisions and the states still waiting to be
//! explored. States are ordered by [`StateId`], i.e. by creation, so the
//! first state is the root and the last one is the newest.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arg::{Arg, StateId};
use crate::block::BlockId;
use crate::cfa::NodeId;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ReachedSetId(pub(crate) u32);

impl fmt::Display for ReachedSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug)]
struct Entry<P> {
    location: NodeId,
    precision: P,
}

#[derive(Debug)]
pub struct ReachedSet<P> {
    id: ReachedSetId,
    block: Option<BlockId>,
    states: BTreeMap<StateId, Entry<P>>,
    by_location: FxHashMap<NodeId, BTreeSet<StateId>>,
    waitlist: VecDeque<StateId>,
    waiting: FxHashSet<StateId>,
}

impl<P> ReachedSet<P> {
    /// An empty reached-set for `block`; `None` for the whole program.
    pub fn new(id: ReachedSetId, block: Option<BlockId>) -> Self {
        ReachedSet {
            id,
            block,
            states: BTreeMap::new(),
            by_location: FxHashMap::default(),
            waitlist: VecDeque::new(),
            waiting: FxHashSet::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ReachedSetId {
        self.id
    }

    #[inline]
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Add a state and put it on the waitlist.
    pub fn add(&mut self, state: StateId, location: NodeId, precision: P) {
        let previous = self.states.insert(
            state,
            Entry {
                location,
                precision,
            },
        );
        debug_assert!(previous.is_none(), "{} added twice to {}", state, self.id);
        self.by_location.entry(location).or_default().insert(state);
        self.reinsert_waiting(state);
    }

    #[inline]
    pub fn contains(&self, state: StateId) -> bool {
        self.states.contains_key(&state)
    }

    #[inline]
    pub fn precision(&self, state: StateId) -> Option<&P> {
        self.states.get(&state).map(|e| &e.precision)
    }

    #[inline]
    pub fn location(&self, state: StateId) -> Option<NodeId> {
        self.states.get(&state).map(|e| e.location)
    }

    pub fn set_precision(&mut self, state: StateId, precision: P) {
        if let Some(e) = self.states.get_mut(&state) {
            e.precision = precision;
        }
    }

    #[inline]
    pub fn first_state(&self) -> Option<StateId> {
        self.states.keys().next().copied()
    }

    #[inline]
    pub fn last_state(&self) -> Option<StateId> {
        self.states.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> impl DoubleEndedIterator<Item = StateId> + '_ {
        self.states.keys().copied()
    }

    pub fn at_location(&self, location: NodeId) -> impl Iterator<Item = StateId> + '_ {
        self.by_location
            .get(&location)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub fn has_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn pop_waiting(&mut self) -> Option<StateId> {
        while let Some(next) = self.waitlist.pop_front() {
            if self.waiting.remove(&next) && self.contains(next) {
                return Some(next);
            }
        }
        None
    }

    pub fn reinsert_waiting(&mut self, state: StateId) {
        if self.contains(state) && self.waiting.insert(state) {
            self.waitlist.push_back(state);
        }
    }

    fn remove(&mut self, state: StateId) {
        if let Some(e) = self.states.remove(&state) {
            if let Some(at) = self.by_location.get_mut(&e.location) {
                at.remove(&state);
            }
        }
        self.waiting.remove(&state);
    }

    /// Remove `state` and all its descendants from this set and the ARG.
    ///
    /// Surviving parents of removed states go back on the waitlist, with
    /// their precision replaced by `precision` if one is given.
    pub fn remove_subtree<S>(&mut self, arg: &mut Arg<S>, state: StateId, precision: Option<&P>)
    where
        P: Clone,
    {
        if self.first_state() == Some(state) {
            debug_assert!(false, "cannot remove the root {} of {}", state, self.id);
            tracing::warn!(%state, reached = %self.id, "refusing to remove the root");
            return;
        }
        let subtree: Vec<StateId> = arg
            .subgraph(state)
            .into_iter()
            .filter(|s| self.contains(*s))
            .collect();
        let mut frontier = BTreeSet::new();
        for s in &subtree {
            for p in arg.parents(*s) {
                frontier.insert(*p);
            }
        }
        for s in &subtree {
            frontier.remove(s);
            self.remove(*s);
            arg.remove_from_arg(*s);
        }
        for p in frontier {
            if !self.contains(p) {
                continue;
            }
            if let Some(prec) = precision {
                self.set_precision(p, prec.clone());
            }
            self.reinsert_waiting(p);
        }
        tracing::trace!(removed = subtree.len(), reached = %self.id, "removed subtree");
    }
}

/// Arena of all reached-sets of one analysis. Sets are never freed, a set
/// dropped from the cache can still be referenced by counterexample
/// reconstruction.
#[derive(Debug)]
pub struct ReachedSets<P> {
    sets: Vec<ReachedSet<P>>,
}

impl<P> Default for ReachedSets<P> {
    fn default() -> Self {
        ReachedSets { sets: Vec::new() }
    }
}

impl<P> ReachedSets<P> {
    pub fn create(&mut self, block: Option<BlockId>) -> ReachedSetId {
        let id = ReachedSetId(self.sets.len() as u32);
        self.sets.push(ReachedSet::new(id, block));
        id
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReachedSet<P>> + '_ {
        self.sets.iter()
    }
}

impl<P> std::ops::Index<ReachedSetId> for ReachedSets<P> {
    type Output = ReachedSet<P>;

    #[inline]
    fn index(&self, id: ReachedSetId) -> &ReachedSet<P> {
        &self.sets[id.0 as usize]
    }
}

impl<P> std::ops::IndexMut<ReachedSetId> for ReachedSets<P> {
    #[inline]
    fn index_mut(&mut self, id: ReachedSetId) -> &mut ReachedSet<P> {
        &mut self.sets[id.0 as usize]
    }
}
