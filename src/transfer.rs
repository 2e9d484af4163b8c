// SPDX-License-Identifier: BSD-3-Clause
//! Successor computation with block calls.
//!
//! Entering a block reduces the caller's state, looks the reduced entry up in
//! the cache and, unless the cache already knows the block's exits, analyzes
//! the block in a reached-set of its own. The exits are expanded back into
//! the caller's context.
//!
//! A recursive call re-entering a reached-set whose analysis is still running
//! gets the exits found so far. Once that analysis has run out of work, every
//! such call that has not seen all exits is explored again, until no call
//! misses an exit.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::algorithm::Status;
use crate::analysis::Analysis;
use crate::arg::StateId;
use crate::bam::Bam;
use crate::block::{Block, BlockKind};
use crate::cache::CacheResult;
use crate::cfa::{Edge, EdgeKind};
use crate::data::BlockExit;
use crate::error::{Error, Result};
use crate::reached::ReachedSetId;
use crate::reducer::Reducer;

/// A successor with the precision it is explored under.
#[derive(Clone, Debug)]
pub struct Successor<S, P> {
    pub state: S,
    pub precision: P,
    /// Set when the successor is the expansion of a block exit.
    pub exit: Option<BlockExit>,
}

impl<A: Analysis> Bam<A> {
    /// Successors of the state `id`, entering blocks where it sits at a
    /// block's entry.
    pub fn successors(
        &mut self,
        id: StateId,
    ) -> Result<Vec<Successor<A::State, A::Precision>>> {
        let set = self.arg.owner(id);
        let Some(precision) = self.sets[set].precision(id).cloned() else {
            return Ok(Vec::new());
        };
        let state = self.arg.state(id).clone();
        let node = self.analysis.location(&state);

        if let Some(current) = self.current_block {
            if self.partitioning.block(current).is_return_node(node)
                && !self.data.already_returned_from_same_block(id, current)
            {
                trace!(state = %id, "block exit reached");
                return Ok(Vec::new());
            }
        }

        let partitioning = Arc::clone(&self.partitioning);
        if let Some(block) = partitioning.block_for_call_node(node) {
            let is_root = self.sets[set].first_state() == Some(id);
            // the root of a block's own reached-set is analyzed in place,
            // any later arrival at the entry of a function block is a
            // recursive call
            let in_place = Some(block.id()) == self.current_block
                && (block.kind() == BlockKind::Loop || is_root);
            let program_entry = Some(set) == self.main && node == self.cfa.main_entry();
            if !in_place && !program_entry {
                return self.block_call(id, &state, &precision, block);
            }
        }

        let mut out = Vec::new();
        for edge in self.cfa.leaving_edges(node) {
            for successor in self.successors_along(&state, &precision, edge)? {
                out.push(Successor {
                    state: successor,
                    precision: precision.clone(),
                    exit: None,
                });
            }
        }
        Ok(out)
    }

    /// Ordinary successors along one edge, restricted to the current block.
    pub fn successors_along(
        &self,
        state: &A::State,
        precision: &A::Precision,
        edge: &Edge,
    ) -> Result<Vec<A::State>> {
        if let Some(returning) = self.partitioning.block_for_return_node(edge.from) {
            // an exit of a nested block flowing back into that block; returns
            // are matched against the call stack by the domain
            if Some(returning.id()) != self.current_block
                && returning.contains(edge.to)
                && !matches!(edge.kind, EdgeKind::Return { .. })
            {
                return Ok(Vec::new());
            }
        }
        if let Some(current) = self.current_block {
            if !self.partitioning.block(current).contains(edge.to) {
                return Ok(Vec::new());
            }
        }
        self.analysis.successors(state, precision, edge)
    }

    fn block_call(
        &mut self,
        call: StateId,
        state: &A::State,
        precision: &A::Precision,
        block: &Block,
    ) -> Result<Vec<Successor<A::State, A::Precision>>> {
        self.stats.block_calls += 1;
        self.depth += 1;
        if let Some(limit) = self.options.max_recursion_depth {
            if self.depth > limit {
                self.depth -= 1;
                return Err(Error::RecursionLimit { limit });
            }
        }
        self.stats.max_depth = self.stats.max_depth.max(self.depth);

        let span = tracing::debug_span!("block", name = block.name(), depth = self.depth);
        let _enter = span.enter();
        debug!(%call, "entering block");

        let outer = self.current_block.replace(block.id());
        let result = self.analyze_block(call, state, precision, block);
        self.current_block = outer;
        self.depth -= 1;

        let exits = result.map_err(|e| {
            if e.is_wrapped() {
                e
            } else {
                Error::RecursiveAnalysisFailed {
                    block: block.name().to_string(),
                    source: Box::new(e),
                }
            }
        })?;

        let mut out = Vec::with_capacity(exits.len());
        for (exit, exit_precision) in exits {
            let expanded = self
                .reducer
                .expand_state(state, block, self.arg.state(exit));
            let expanded_precision = self
                .reducer
                .expand_precision(precision, block, &exit_precision);
            out.push(Successor {
                state: expanded,
                precision: expanded_precision,
                exit: Some(BlockExit {
                    reduced: exit,
                    block: block.id(),
                }),
            });
        }
        debug!(exits = out.len(), "leaving block");
        Ok(out)
    }

    /// Exits of `block` entered from `call`, with their precisions.
    fn analyze_block(
        &mut self,
        call: StateId,
        state: &A::State,
        precision: &A::Precision,
        block: &Block,
    ) -> Result<Vec<(StateId, A::Precision)>> {
        let entry = block.entry();
        let reduced_state = self.reducer.reduce_state(state, block, entry);
        let reduced_precision = self.reducer.reduce_precision(precision, block);

        let lookup = self
            .cache
            .get(&self.reducer, &reduced_state, &reduced_precision, block.id());
        let reached = match lookup {
            CacheResult::Full { reached, exits } => {
                self.cache.stats_mut().full_hits += 1;
                debug!(%reached, exits = exits.len(), "full cache hit");
                self.register_call(call, reached);
                return Ok(self.with_precisions(reached, exits));
            }
            CacheResult::Partial { reached } => {
                self.cache.stats_mut().partial_hits += 1;
                self.register_call(call, reached);
                if self.in_flight.contains(&reached) {
                    self.stats.in_flight_hits += 1;
                    debug!(%reached, "block is still being analyzed");
                    let exits = self.exit_states(reached, block);
                    self.recursive_calls
                        .entry(reached)
                        .or_default()
                        .push((call, exits.len()));
                    return Ok(self.with_precisions(reached, exits));
                }
                debug!(%reached, "partial cache hit");
                reached
            }
            CacheResult::Miss => {
                self.cache.stats_mut().misses += 1;
                if self.options.gather_cache_miss_statistics {
                    let cause = self.cache.find_cache_miss_cause(
                        &self.reducer,
                        &reduced_state,
                        &reduced_precision,
                        block.id(),
                    );
                    trace!(?cause, "cache miss");
                }
                let reached = self.sets.create(Some(block.id()));
                let root = self.arg.add(reduced_state.clone(), reached);
                self.sets[reached].add(root, entry, reduced_precision.clone());
                self.cache.put_reached(
                    &self.reducer,
                    &reduced_state,
                    &reduced_precision,
                    block.id(),
                    reached,
                );
                self.register_call(call, reached);
                debug!(%reached, "cache miss");
                reached
            }
        };

        self.run_block(reached, block)?;

        let exits = self.exit_states(reached, block);
        if let Some(root_precision) = self.root_precision(reached) {
            self.cache.put_exits(
                &self.reducer,
                &reduced_state,
                &root_precision,
                block.id(),
                exits.clone(),
                &self.sets,
            );
        }
        Ok(self.with_precisions(reached, exits))
    }

    /// Run the block's reached-set until neither its waitlist nor a
    /// recursive call into it has work left.
    fn run_block(&mut self, reached: ReachedSetId, block: &Block) -> Result<Status> {
        self.in_flight.push(reached);
        let status = self.run_recursive_calls_to_fixpoint(reached, block);
        self.in_flight.pop();
        self.recursive_calls.remove(&reached);
        status
    }

    fn run_recursive_calls_to_fixpoint(
        &mut self,
        reached: ReachedSetId,
        block: &Block,
    ) -> Result<Status> {
        loop {
            let status = self.run(reached)?;
            if let Status::TargetFound(_) = status {
                return Ok(status);
            }
            let exits = self.exit_states(reached, block).len();
            let calls = self.recursive_calls.remove(&reached).unwrap_or_default();
            let (stale, current): (Vec<_>, Vec<_>) = calls
                .into_iter()
                .filter(|(call, _)| !self.arg.is_destroyed(*call))
                .partition(|(_, seen)| *seen < exits);
            if !current.is_empty() {
                self.recursive_calls.insert(reached, current);
            }
            if stale.is_empty() {
                return Ok(status);
            }
            for (call, seen) in stale {
                trace!(%call, seen, exits, "recursive call missed exits");
                self.stats.recursive_reruns += 1;
                self.requeue_call(call)?;
            }
        }
    }

    /// Put `call` back on its reached-set's waitlist. A reached-set whose
    /// analysis already finished is run again, and its own callers follow
    /// if that produced new exits.
    fn requeue_call(&mut self, call: StateId) -> Result<()> {
        let owner = self.arg.owner(call);
        self.sets[owner].reinsert_waiting(call);
        if Some(owner) == self.main || self.in_flight.contains(&owner) {
            return Ok(());
        }
        let set = &self.sets[owner];
        let (Some(block_id), Some(root)) = (set.block(), set.first_state()) else {
            return Ok(());
        };
        let partitioning = Arc::clone(&self.partitioning);
        let block = partitioning.block(block_id);
        let before = self.exit_states(owner, block);

        let _span =
            tracing::debug_span!("rerun", name = block.name(), reached = %owner).entered();
        let outer = self.current_block.replace(block_id);
        let status = self.run_block(owner, block);
        self.current_block = outer;
        status?;

        let exits = self.exit_states(owner, block);
        if exits == before {
            return Ok(());
        }
        debug!(
            reached = %owner,
            before = before.len(),
            after = exits.len(),
            "finished block gained exits"
        );
        if let Some(root_precision) = self.root_precision(owner) {
            let root_state = self.arg.state(root).clone();
            if self
                .cache
                .contains_precise_key(&self.reducer, &root_state, &root_precision, block_id)
            {
                self.cache.put_exits(
                    &self.reducer,
                    &root_state,
                    &root_precision,
                    block_id,
                    exits,
                    &self.sets,
                );
            }
        }
        let callers: Vec<StateId> = self
            .data
            .callers(root)
            .filter(|c| !self.arg.is_destroyed(*c))
            .collect();
        for caller in callers {
            self.requeue_call(caller)?;
        }
        Ok(())
    }

    fn register_call(&mut self, call: StateId, reached: ReachedSetId) {
        if let Some(root) = self.sets[reached].first_state() {
            self.data.register_initial(call, root, reached);
        }
    }

    pub(crate) fn root_precision(&self, reached: ReachedSetId) -> Option<A::Precision> {
        let set = &self.sets[reached];
        set.first_state().and_then(|r| set.precision(r)).cloned()
    }

    /// A target if the analysis of `reached` stopped at one, otherwise the
    /// states at the block's return nodes.
    pub(crate) fn exit_states(&self, reached: ReachedSetId, block: &Block) -> Vec<StateId> {
        let set = &self.sets[reached];
        if let Some(last) = set.last_state() {
            if self.analysis.is_target(self.arg.state(last)) {
                return vec![last];
            }
        }
        block
            .return_nodes()
            .flat_map(|node| set.at_location(node))
            .filter(|s| !self.data.already_returned_from_same_block(*s, block.id()))
            .collect()
    }

    fn with_precisions(
        &self,
        reached: ReachedSetId,
        exits: Vec<StateId>,
    ) -> Vec<(StateId, A::Precision)> {
        let set = &self.sets[reached];
        exits
            .into_iter()
            .filter_map(|e| set.precision(e).map(|p| (e, p.clone())))
            .collect()
    }
}
