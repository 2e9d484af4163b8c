// SPDX-License-Identifier: BSD-3-Clause
//! Removal of invalidated sub-graphs after a refinement.
//!
//! A counterexample path runs through several reached-sets: the program's
//! and one per block that is open at the cut. Every such set loses the
//! sub-graph leading to the cut, and the cache entries built on those sets
//! lose their exit states so the next lookup re-runs them.
//!
//! Paths are sequences of real states as produced by counterexample
//! reconstruction: a block call appears as the call state in the caller's
//! reached-set, followed by the states of the block's own reached-set, and a
//! block exit appears as the exit state of the innermost reached-set.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::analysis::Analysis;
use crate::arg::StateId;
use crate::bam::Bam;
use crate::block::BlockKind;
use crate::reached::ReachedSetId;
use crate::reducer::Reducer;

#[derive(Debug)]
struct Removal<P> {
    /// The call state that opened the reached-set to remove from, or the
    /// program's root for the program's reached-set.
    root_call: StateId,
    element: StateId,
    refinement: Option<P>,
}

/// Removals collected from several counterexamples, applied together.
///
/// A removal whose element lies below an already scheduled removal from the
/// same reached-set is dropped; scheduled removals below a new one are
/// cancelled.
#[derive(Debug)]
pub struct RemovalBatch<P> {
    removals: Vec<Removal<P>>,
}

impl<P> Default for RemovalBatch<P> {
    fn default() -> Self {
        RemovalBatch {
            removals: Vec::new(),
        }
    }
}

impl<P> RemovalBatch<P> {
    pub fn len(&self) -> usize {
        self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty()
    }

    /// Scheduled (call state, element) pairs in application order.
    pub fn pairs(&self) -> impl Iterator<Item = (StateId, StateId)> + '_ {
        self.removals.iter().map(|r| (r.root_call, r.element))
    }
}

/// Block calls and block returns on a path.
struct Calls {
    calls: BTreeSet<StateId>,
    returns: BTreeSet<StateId>,
}

impl<A: Analysis> Bam<A> {
    /// Cut `path[cut]` and everything below it out of every reached-set on
    /// the path, strengthening the precision at the cut with `refinement`.
    pub fn remove_subtree(&mut self, path: &[StateId], cut: usize, refinement: &A::Precision) {
        let mut batch = RemovalBatch::default();
        self.schedule_removal(&mut batch, path, cut, refinement);
        self.apply_batch(batch);
    }

    /// Plan the removals for one counterexample without applying them.
    ///
    /// With aggressive caching this already pins exact cache entries for the
    /// refined precision of every block entered after the cut.
    pub fn schedule_removal(
        &mut self,
        batch: &mut RemovalBatch<A::Precision>,
        path: &[StateId],
        cut: usize,
        refinement: &A::Precision,
    ) {
        if cut == 0 || cut >= path.len() {
            debug_assert!(false, "cut {} outside of path of length {}", cut, path.len());
            warn!(cut, len = path.len(), "ignoring removal at an invalid cut");
            return;
        }
        let _span = tracing::trace_span!("schedule_removal", cut = %path[cut]).entered();
        let element = path[cut];
        let relevant = self.relevant_call_states(&path[..=cut]);
        debug_assert_eq!(relevant.first(), Some(&path[0]));

        let mut pairs: Vec<(StateId, StateId)> = Vec::new();
        for w in relevant.windows(2) {
            push_unique(&mut pairs, (w[0], w[1]));
        }
        if self.cache.does_aggressive_caching() {
            self.ensure_exact_cache_hits_on_path(path, cut, refinement, &mut pairs);
        }

        let last_relevant = *relevant.last().unwrap_or(&path[0]);
        for (root_call, next) in pairs {
            let refine = next == last_relevant
                || self.data.initial_reached(next).map_or(false, |r| {
                    self.sets[r]
                        .first_state()
                        .map_or(false, |first| self.arg.parents(element).contains(&first))
                });
            self.schedule(batch, root_call, next, refine.then(|| refinement.clone()));
        }
        self.schedule(batch, last_relevant, element, Some(refinement.clone()));
    }

    fn schedule(
        &self,
        batch: &mut RemovalBatch<A::Precision>,
        root_call: StateId,
        element: StateId,
        refinement: Option<A::Precision>,
    ) {
        let mut refinement = refinement;
        for scheduled in batch.removals.iter_mut() {
            if scheduled.root_call == root_call
                && self.arg.subgraph(scheduled.element).contains(&element)
            {
                trace!(%element, covering = %scheduled.element, "removal already scheduled");
                if scheduled.refinement.is_none() {
                    scheduled.refinement = refinement;
                }
                return;
            }
        }
        let subgraph = self.arg.subgraph(element);
        batch.removals.retain_mut(|scheduled| {
            let subsumed =
                scheduled.root_call == root_call && subgraph.contains(&scheduled.element);
            if subsumed {
                trace!(cancelled = %scheduled.element, %element, "removal subsumed");
                if refinement.is_none() {
                    refinement = scheduled.refinement.take();
                }
            }
            !subsumed
        });
        batch.removals.push(Removal {
            root_call,
            element,
            refinement,
        });
    }

    /// Apply the planned removals, then drop the program's newest state if
    /// it is the target that caused the refinement.
    pub fn apply_batch(&mut self, batch: RemovalBatch<A::Precision>) {
        let _span = tracing::trace_span!("apply_batch", removals = batch.len()).entered();
        let main = self.main;
        let main_last = main.and_then(|m| self.sets[m].last_state());
        let start = Instant::now();
        for removal in batch.removals {
            self.remove_cached_subtree(
                removal.root_call,
                removal.element,
                removal.refinement.as_ref(),
            );
        }
        self.stats.remove_subtree.record(start.elapsed());

        if let (Some(main), Some(last)) = (main, main_last) {
            self.remove_newest_target(main, last);
        }
        self.data.prune(&self.arg);
    }

    fn remove_newest_target(&mut self, main: ReachedSetId, last: StateId) {
        if self.arg.is_destroyed(last) || self.sets[main].first_state() == Some(last) {
            return;
        }
        if self.analysis.is_target(self.arg.state(last)) {
            self.sets[main].remove_subtree(&mut self.arg, last, None);
        } else {
            warn!(state = %last, "newest program state is not a target, keeping it");
        }
    }

    /// The program's root followed by every call state whose block is still
    /// open at the end of `path`.
    fn relevant_call_states(&self, path: &[StateId]) -> Vec<StateId> {
        let mut open: Vec<StateId> = vec![path[0]];
        let last = path.len() - 1;
        for (i, s) in path.iter().enumerate() {
            let node = self.location(*s);
            if i != last {
                while open.len() > 1 {
                    let top = open[open.len() - 1];
                    let Some(block) = self.partitioning.block_for_call_node(self.location(top))
                    else {
                        break;
                    };
                    if !block.is_return_node(node) {
                        break;
                    }
                    open.pop();
                    // a function block is left only once per return node
                    if block.kind() == BlockKind::Function {
                        break;
                    }
                }
            }
            if i != 0 && i != last && self.data.initial_reached(*s).is_some() {
                open.push(*s);
            }
        }
        open
    }

    fn call_and_return_states(&self, path: &[StateId]) -> Calls {
        let mut calls = BTreeSet::new();
        let mut returns = BTreeSet::new();
        let mut open = Vec::new();
        for s in path {
            let node = self.location(*s);
            while let Some(top) = open.last() {
                let is_return = self
                    .partitioning
                    .block_for_call_node(self.location(*top))
                    .map_or(false, |b| b.is_return_node(node));
                if !is_return {
                    break;
                }
                open.pop();
                returns.insert(*s);
            }
            if self.data.initial_reached(*s).is_some() {
                open.push(*s);
                calls.insert(*s);
            }
        }
        Calls { calls, returns }
    }

    fn ensure_exact_cache_hits_on_path(
        &mut self,
        path: &[StateId],
        cut: usize,
        refinement: &A::Precision,
        pairs: &mut Vec<(StateId, StateId)>,
    ) {
        let calls = self.call_and_return_states(path);
        let mut remaining: VecDeque<StateId> = path[cut..].iter().copied().collect();
        while let Some(current) = remaining.pop_front() {
            if calls.calls.contains(&current) {
                self.remove_imprecise_entries_on_path(
                    current,
                    refinement,
                    &mut remaining,
                    &calls,
                    pairs,
                );
            }
        }
    }

    /// Pin an exact entry for the refined precision of the block entered at
    /// `root_call`, then recurse into the blocks it calls on the path.
    /// Returns whether this block or one inside it used an imprecise entry.
    fn remove_imprecise_entries_on_path(
        &mut self,
        root_call: StateId,
        refinement: &A::Precision,
        remaining: &mut VecDeque<StateId>,
        calls: &Calls,
        pairs: &mut Vec<(StateId, StateId)>,
    ) -> bool {
        let Some(inner) = self.data.initial_reached(root_call) else {
            return false;
        };
        let Some(block_id) = self.sets[inner].block() else {
            return false;
        };
        let Some(outer_precision) = self.precision(root_call).cloned() else {
            return false;
        };
        let partitioning = Arc::clone(&self.partitioning);
        let block = partitioning.block(block_id);
        let reduced_root = self
            .reducer
            .reduce_state(self.arg.state(root_call), block, block.entry());
        let refined = self.analysis.refine_precision(&outer_precision, refinement);
        let new_precision = self.reducer.reduce_precision(&refined, block);
        let used_precision = self.root_precision(inner);

        if !self
            .cache
            .contains_precise_key(&self.reducer, &reduced_root, &new_precision, block_id)
        {
            let pinned = self.sets.create(Some(block_id));
            let root = self.arg.add(reduced_root.clone(), pinned);
            self.sets[pinned].add(root, block.entry(), new_precision.clone());
            self.cache
                .put_reached(&self.reducer, &reduced_root, &new_precision, block_id, pinned);
            debug!(
                block = block.name(),
                reached = %pinned,
                "pinned exact entry for refined precision"
            );
        }

        let uses_new_precision = used_precision.as_ref() == Some(&new_precision);
        let mut found_inner = false;
        while let Some(current) = remaining.pop_front() {
            if calls.calls.contains(&current)
                && self.remove_imprecise_entries_on_path(
                    current, refinement, remaining, calls, pairs,
                )
                && uses_new_precision
                && !found_inner
            {
                push_unique(pairs, (root_call, current));
                found_inner = true;
            }
            if calls.returns.contains(&current) {
                break;
            }
        }
        found_inner || !uses_new_precision
    }

    /// Remove `element` and its sub-graph from the reached-set opened by
    /// `root_call`. Removing an already destroyed state does nothing.
    pub(crate) fn remove_cached_subtree(
        &mut self,
        root_call: StateId,
        element: StateId,
        refinement: Option<&A::Precision>,
    ) {
        let _span = tracing::trace_span!("remove_cached_subtree", %root_call, %element).entered();
        let start = Instant::now();
        self.remove_cached_subtree_inner(root_call, element, refinement);
        self.stats.remove_cached_subtree.record(start.elapsed());
    }

    fn remove_cached_subtree_inner(
        &mut self,
        root_call: StateId,
        element: StateId,
        refinement: Option<&A::Precision>,
    ) {
        if self.arg.is_destroyed(element) {
            trace!("state was removed before");
            return;
        }
        let Some(reached) = self.data.initial_reached(root_call) else {
            // the program's reached-set is not cached
            let owner = self.arg.owner(element);
            debug_assert_eq!(Some(owner), self.main, "{} is not a block call", root_call);
            let precision = match (refinement, self.sets[owner].precision(element)) {
                (Some(r), Some(p)) => Some(self.analysis.refine_precision(p, r)),
                _ => None,
            };
            self.sets[owner].remove_subtree(&mut self.arg, element, precision.as_ref());
            return;
        };
        debug_assert!(
            self.sets[reached].contains(element),
            "removing {} from the wrong reached-set {}",
            element,
            reached
        );
        if !self.sets[reached].contains(element) {
            return;
        }
        let (Some(block_id), Some(root)) =
            (self.sets[reached].block(), self.sets[reached].first_state())
        else {
            return;
        };
        let Some(root_precision) = self.root_precision(reached) else {
            return;
        };
        let partitioning = Arc::clone(&self.partitioning);
        let block = partitioning.block(block_id);
        let new_precision = match (refinement, self.sets[reached].precision(element)) {
            (Some(r), Some(p)) => {
                let refined = self.analysis.refine_precision(p, r);
                Some(self.reducer.reduce_precision(&refined, block))
            }
            _ => None,
        };
        let root_state = self.arg.state(root).clone();

        self.cache
            .remove_return_entry(&self.reducer, &root_state, &root_precision, block_id);
        let root_changes = self.arg.parents(element).contains(&root);
        debug!(
            block = block.name(),
            %reached,
            refined = new_precision.is_some(),
            "removing cached subtree"
        );
        self.sets[reached].remove_subtree(&mut self.arg, element, new_precision.as_ref());
        match (root_changes, new_precision.as_ref()) {
            (true, Some(p)) => self.cache.update_precision_for_entry(
                &self.reducer,
                &root_state,
                &root_precision,
                block_id,
                p,
            ),
            // the pruned set no longer answers its old key
            _ => self
                .cache
                .remove_block_entry(&self.reducer, &root_state, &root_precision, block_id),
        }
    }
}

fn push_unique<T: PartialEq>(v: &mut Vec<T>, item: T) {
    if !v.contains(&item) {
        v.push(item);
    }
}
