// SPDX-License-Identifier: BSD-3-Clause
//! Bookkeeping that links states across block boundaries.

use std::collections::BTreeSet;
use std::fmt::Write;

use rustc_hash::FxHashMap;

use crate::arg::{Arg, StateId};
use crate::block::BlockId;
use crate::reached::ReachedSetId;

/// Where an expanded state came from. Its forward precision is the one it
/// holds in the caller's reached-set.
#[derive(Clone, Copy, Debug)]
pub struct BlockExit {
    /// The exit state inside the block's reached-set.
    pub reduced: StateId,
    pub block: BlockId,
}

#[derive(Debug, Default)]
pub struct DataManager {
    expanded_to_reduced: FxHashMap<StateId, BlockExit>,
    initial_to_reached: FxHashMap<StateId, ReachedSetId>,
    reduced_to_callers: FxHashMap<StateId, BTreeSet<StateId>>,
}

impl DataManager {
    pub fn register_expanded(&mut self, expanded: StateId, exit: BlockExit) {
        self.expanded_to_reduced.insert(expanded, exit);
    }

    /// `call` entered the block analyzed by `reached`, whose root is `root`.
    pub fn register_initial(&mut self, call: StateId, root: StateId, reached: ReachedSetId) {
        self.initial_to_reached.insert(call, reached);
        self.reduced_to_callers.entry(root).or_default().insert(call);
    }

    #[inline]
    pub fn block_exit(&self, expanded: StateId) -> Option<&BlockExit> {
        self.expanded_to_reduced.get(&expanded)
    }

    /// The reached-set `call` opened, if it is a block call.
    #[inline]
    pub fn initial_reached(&self, call: StateId) -> Option<ReachedSetId> {
        self.initial_to_reached.get(&call).copied()
    }

    /// Call states that entered the reached-set rooted at `root`.
    pub fn callers(&self, root: StateId) -> impl Iterator<Item = StateId> + '_ {
        self.reduced_to_callers
            .get(&root)
            .into_iter()
            .flat_map(|c| c.iter().copied())
    }

    /// Whether `state` was produced by returning from `block`, directly or
    /// through nested expansions.
    pub fn already_returned_from_same_block(&self, state: StateId, block: BlockId) -> bool {
        let mut current = state;
        while let Some(exit) = self.expanded_to_reduced.get(&current) {
            if exit.block == block {
                return true;
            }
            current = exit.reduced;
        }
        false
    }

    /// Follow expansions down to the state in the innermost reached-set.
    pub fn innermost_state(&self, state: StateId) -> StateId {
        let mut current = state;
        while let Some(exit) = self.expanded_to_reduced.get(&current) {
            current = exit.reduced;
        }
        current
    }

    /// Forget every link from or to a state destroyed in `arg`.
    pub fn prune<S>(&mut self, arg: &Arg<S>) {
        self.expanded_to_reduced
            .retain(|e, exit| !arg.is_destroyed(*e) && !arg.is_destroyed(exit.reduced));
        self.initial_to_reached.retain(|c, _| !arg.is_destroyed(*c));
        self.reduced_to_callers.retain(|root, callers| {
            callers.retain(|c| !arg.is_destroyed(*c));
            !arg.is_destroyed(*root) && !callers.is_empty()
        });
    }

    /// Number of expanded states and of block calls known.
    pub fn sizes(&self) -> (usize, usize) {
        (self.expanded_to_reduced.len(), self.initial_to_reached.len())
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut expanded: Vec<_> = self.expanded_to_reduced.iter().collect();
        expanded.sort_by_key(|(e, _)| **e);
        let _ = writeln!(out, "expanded -> reduced");
        for (e, exit) in expanded {
            let _ = writeln!(out, "  {} -> {} ({})", e, exit.reduced, exit.block);
        }
        let mut initial: Vec<_> = self.initial_to_reached.iter().collect();
        initial.sort_by_key(|(c, _)| **c);
        let _ = writeln!(out, "call -> reached-set");
        for (c, r) in initial {
            let _ = writeln!(out, "  {} -> {}", c, r);
        }
        let mut roots: Vec<_> = self.reduced_to_callers.iter().collect();
        roots.sort_by_key(|(r, _)| **r);
        let _ = writeln!(out, "reduced root -> callers");
        for (r, callers) in roots {
            let callers: Vec<String> = callers.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "  {} -> [{}]", r, callers.join(", "));
        }
        out
    }
}
