// SPDX-License-Identifier: BSD-3-Clause
//! Counterexample reconstruction.
//!
//! The target sits in the program's reached-set, but the states between a
//! block call and its exits live in the block's cached reached-set. The
//! reconstruction walks backwards from the target and splices the relevant
//! part of every entered block into one graph of mirrors, each mirror
//! pointing at the real state it stands for.

use std::collections::BTreeSet;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::analysis::Analysis;
use crate::arg::StateId;
use crate::bam::Bam;
use crate::error::Result;
use crate::reached::ReachedSetId;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MirrorId(u32);

#[derive(Clone, Debug)]
struct Mirror {
    real: StateId,
    parents: Vec<MirrorId>,
    children: Vec<MirrorId>,
    /// Decreases with every mirror created by one reconstruction.
    order: u32,
    removed: bool,
}

/// The graph of all paths from the program's root to a target.
#[derive(Clone, Debug)]
pub struct Counterexample {
    mirrors: Vec<Mirror>,
    root: MirrorId,
    target: MirrorId,
}

impl Counterexample {
    pub fn root(&self) -> StateId {
        self.mirrors[self.root.0 as usize].real
    }

    pub fn target(&self) -> StateId {
        self.mirrors[self.target.0 as usize].real
    }

    pub fn len(&self) -> usize {
        self.mirrors.iter().filter(|m| !m.removed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Real states occurring in the graph.
    pub fn states(&self) -> BTreeSet<StateId> {
        self.mirrors
            .iter()
            .filter(|m| !m.removed)
            .map(|m| m.real)
            .collect()
    }

    /// One path from the root to the target. Where a mirror has several
    /// parents the one created last is taken.
    pub fn path(&self) -> Vec<StateId> {
        let mut path = vec![self.target];
        let mut current = self.target;
        while current != self.root && path.len() <= self.mirrors.len() {
            let mirror = &self.mirrors[current.0 as usize];
            let Some(parent) = mirror
                .parents
                .iter()
                .min_by_key(|p| self.mirrors[p.0 as usize].order)
            else {
                break;
            };
            current = *parent;
            path.push(current);
        }
        path.reverse();
        path.into_iter()
            .map(|m| self.mirrors[m.0 as usize].real)
            .collect()
    }
}

#[derive(Clone, Debug)]
pub enum Reconstruction {
    Found(Counterexample),
    /// A cached block referenced on the way is stale. Its cache entry and
    /// the states leading into it were removed; rerun the analysis.
    MissingBlock,
    /// The graph runs through a counterexample handled before.
    RepeatedState,
}

enum Subgraph {
    Root(MirrorId),
    MissingBlock,
    RepeatedState,
}

struct Graph {
    mirrors: Vec<Mirror>,
    next_order: u32,
    /// Suffixes of previously consumed paths not matched yet.
    remaining: Vec<Vec<StateId>>,
}

impl Graph {
    fn new(consumed: &[Vec<StateId>]) -> Self {
        Graph {
            mirrors: Vec::new(),
            next_order: u32::MAX,
            remaining: consumed.to_vec(),
        }
    }

    fn mirror(&mut self, real: StateId) -> MirrorId {
        let id = MirrorId(self.mirrors.len() as u32);
        self.mirrors.push(Mirror {
            real,
            parents: Vec::new(),
            children: Vec::new(),
            order: self.next_order,
            removed: false,
        });
        self.next_order = self.next_order.saturating_sub(1);
        id
    }

    fn add_parent(&mut self, child: MirrorId, parent: MirrorId) {
        let c = &mut self.mirrors[child.0 as usize];
        if !c.parents.contains(&parent) {
            c.parents.push(parent);
            self.mirrors[parent.0 as usize].children.push(child);
        }
    }

    fn remove(&mut self, id: MirrorId) {
        let parents = std::mem::take(&mut self.mirrors[id.0 as usize].parents);
        for p in parents {
            self.mirrors[p.0 as usize].children.retain(|c| *c != id);
        }
        let children = std::mem::take(&mut self.mirrors[id.0 as usize].children);
        for c in children {
            self.mirrors[c.0 as usize].parents.retain(|p| *p != id);
        }
        self.mirrors[id.0 as usize].removed = true;
    }

    fn is_repeated(&mut self, real: StateId) -> bool {
        for rest in self.remaining.iter_mut() {
            if rest.last() == Some(&real) {
                rest.pop();
                if rest.is_empty() {
                    return true;
                }
            }
        }
        false
    }
}

impl<A: Analysis> Bam<A> {
    /// The graph of paths from the root to `target`, which must be a state
    /// of `reached`.
    pub fn reconstruct_counterexample(
        &mut self,
        target: StateId,
        reached: ReachedSetId,
    ) -> Result<Reconstruction> {
        self.reconstruct_counterexample_avoiding(target, reached, &[])
    }

    /// Like [`Bam::reconstruct_counterexample`], but reports
    /// [`Reconstruction::RepeatedState`] when the graph runs through all
    /// states of one of the `consumed` paths.
    pub fn reconstruct_counterexample_avoiding(
        &mut self,
        target: StateId,
        reached: ReachedSetId,
        consumed: &[Vec<StateId>],
    ) -> Result<Reconstruction> {
        debug_assert!(self.sets[reached].contains(target));
        let _span = tracing::trace_span!("reconstruct", %target, %reached).entered();
        self.stats.reconstructions += 1;
        let start = Instant::now();

        let mut graph = Graph::new(consumed);
        let target_mirror = graph.mirror(target);
        let result = self.compute_subgraph(&mut graph, target, target_mirror);
        self.stats.reconstruction.record(start.elapsed());

        Ok(match result? {
            Subgraph::Root(root) => Reconstruction::Found(Counterexample {
                mirrors: graph.mirrors,
                root,
                target: target_mirror,
            }),
            Subgraph::MissingBlock => {
                self.stats.missing_blocks += 1;
                debug!("counterexample runs through a stale block");
                Reconstruction::MissingBlock
            }
            Subgraph::RepeatedState => {
                self.stats.repeated_states += 1;
                debug!("counterexample repeats a consumed path");
                Reconstruction::RepeatedState
            }
        })
    }

    /// Mirror every state of `target`'s reached-set on a path to `target`.
    /// `target_mirror` stands for `target`. Returns the mirror of the root.
    fn compute_subgraph(
        &mut self,
        graph: &mut Graph,
        target: StateId,
        target_mirror: MirrorId,
    ) -> Result<Subgraph> {
        graph.mirrors[target_mirror.0 as usize].real = target;
        if graph.is_repeated(target) {
            return Ok(Subgraph::RepeatedState);
        }

        let mut finished: FxHashMap<StateId, MirrorId> = FxHashMap::default();
        finished.insert(target, target_mirror);
        let mut root = self.arg.parents(target).is_empty().then_some(target_mirror);
        let mut waitlist: BTreeSet<StateId> = self.arg.parents(target).iter().copied().collect();

        // newest first, so all children on the way to the target are done
        while let Some(current) = waitlist.pop_last() {
            self.shutdown.check()?;
            if finished.contains_key(&current) {
                continue;
            }
            let current_mirror = graph.mirror(current);
            finished.insert(current, current_mirror);
            waitlist.extend(self.arg.parents(current).iter().copied());

            let children = self.arg.children(current).to_vec();
            for child in children {
                let Some(&child_mirror) = finished.get(&child) else {
                    continue;
                };
                let Some(reduced) = self.data.block_exit(child).map(|e| e.reduced) else {
                    graph.add_parent(child_mirror, current_mirror);
                    continue;
                };
                match self.compute_subgraph_for_block(graph, current, reduced, child_mirror)? {
                    Subgraph::Root(inner_root) => {
                        let inner = graph.mirrors[inner_root.0 as usize].children.clone();
                        for c in inner {
                            graph.add_parent(c, current_mirror);
                        }
                        graph.remove(inner_root);
                    }
                    Subgraph::MissingBlock => {
                        self.remove_stale_call(current);
                        return Ok(Subgraph::MissingBlock);
                    }
                    Subgraph::RepeatedState => return Ok(Subgraph::RepeatedState),
                }
            }

            if graph.is_repeated(current) {
                return Ok(Subgraph::RepeatedState);
            }
            if self.arg.parents(current).is_empty() {
                debug_assert!(root.is_none(), "reached-set with two roots");
                root = Some(current_mirror);
            }
        }

        match root {
            Some(root) => Ok(Subgraph::Root(root)),
            None => {
                debug_assert!(false, "no root above {}", target);
                Ok(Subgraph::MissingBlock)
            }
        }
    }

    /// The part of the block entered at `call` that leads to its exit
    /// `reduced_target`.
    fn compute_subgraph_for_block(
        &mut self,
        graph: &mut Graph,
        call: StateId,
        reduced_target: StateId,
        target_mirror: MirrorId,
    ) -> Result<Subgraph> {
        let usable = !self.arg.is_destroyed(reduced_target)
            && self
                .data
                .initial_reached(call)
                .map_or(false, |r| self.sets[r].contains(reduced_target));
        if !usable {
            debug!(%call, exit = %reduced_target, "cached exit is outdated");
            self.invalidate_block_entry(call);
            return Ok(Subgraph::MissingBlock);
        }
        let result = self.compute_subgraph(graph, reduced_target, target_mirror)?;
        if let Subgraph::MissingBlock = result {
            self.invalidate_block_entry(call);
        }
        Ok(result)
    }

    /// Drop the cache entry of the reached-set opened by `call`.
    fn invalidate_block_entry(&mut self, call: StateId) {
        let Some(reached) = self.data.initial_reached(call) else {
            return;
        };
        let set = &self.sets[reached];
        let (Some(block), Some(root)) = (set.block(), set.first_state()) else {
            return;
        };
        let Some(precision) = set.precision(root).cloned() else {
            return;
        };
        let state = self.arg.state(root).clone();
        trace!(%reached, "removing stale cache entry");
        self.cache
            .remove_block_entry(&self.reducer, &state, &precision, block);
    }

    /// Remove `call` from its reached-set so the block is entered afresh.
    fn remove_stale_call(&mut self, call: StateId) {
        let reached = self.arg.owner(call);
        let set = &self.sets[reached];
        let victim = if set.first_state() == Some(call) {
            set.last_state().filter(|last| *last != call)
        } else {
            Some(call)
        };
        if let Some(victim) = victim {
            self.sets[reached].remove_subtree(&mut self.arg, victim, None);
            self.data.prune(&self.arg);
        }
    }
}
