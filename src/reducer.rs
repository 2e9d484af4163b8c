// SPDX-License-Identifier: BSD-3-Clause
//! Reduction of states and precisions to the view of a single block.

use std::fmt::Debug;
use std::hash::Hash;

use crate::block::Block;
use crate::cfa::NodeId;
use crate::stats::ReducerStats;

/// Maps between the expanded (caller's) and the reduced (block-local) view.
///
/// Implementations must keep `hash_key` consistent with reduction: two
/// reduced entries with equal keys are interchangeable for the block.
pub trait Reducer {
    type State: Clone + Debug;
    type Precision: Clone + Debug + PartialEq;
    type Key: Clone + Debug + Eq + Hash;

    fn reduce_state(&self, expanded: &Self::State, block: &Block, call_node: NodeId)
        -> Self::State;

    /// Rebuild the caller's view of `reduced`, found when entering `block`
    /// from `root`.
    fn expand_state(&self, root: &Self::State, block: &Block, reduced: &Self::State)
        -> Self::State;

    fn reduce_precision(&self, precision: &Self::Precision, block: &Block) -> Self::Precision;

    fn expand_precision(
        &self,
        root: &Self::Precision,
        block: &Block,
        reduced: &Self::Precision,
    ) -> Self::Precision;

    /// Key identifying `state`, and `precision` if given, in the cache.
    fn hash_key(&self, state: &Self::State, precision: Option<&Self::Precision>) -> Self::Key;

    /// How far apart two precisions are. Zero means equal.
    fn precision_distance(&self, a: &Self::Precision, b: &Self::Precision) -> u64;
}

/// A reducer that times its reductions and expansions.
#[derive(Debug)]
pub struct TimedReducer<R> {
    inner: R,
    stats: ReducerStats,
}

impl<R> TimedReducer<R> {
    pub fn new(inner: R) -> Self {
        TimedReducer {
            inner,
            stats: ReducerStats::default(),
        }
    }

    pub fn stats(&self) -> &ReducerStats {
        &self.stats
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Reducer> Reducer for TimedReducer<R> {
    type State = R::State;
    type Precision = R::Precision;
    type Key = R::Key;

    fn reduce_state(&self, expanded: &R::State, block: &Block, call_node: NodeId) -> R::State {
        self.stats
            .reduce_state
            .time(|| self.inner.reduce_state(expanded, block, call_node))
    }

    fn expand_state(&self, root: &R::State, block: &Block, reduced: &R::State) -> R::State {
        self.stats
            .expand_state
            .time(|| self.inner.expand_state(root, block, reduced))
    }

    fn reduce_precision(&self, precision: &R::Precision, block: &Block) -> R::Precision {
        self.stats
            .reduce_precision
            .time(|| self.inner.reduce_precision(precision, block))
    }

    fn expand_precision(
        &self,
        root: &R::Precision,
        block: &Block,
        reduced: &R::Precision,
    ) -> R::Precision {
        self.stats
            .expand_precision
            .time(|| self.inner.expand_precision(root, block, reduced))
    }

    #[inline]
    fn hash_key(&self, state: &R::State, precision: Option<&R::Precision>) -> R::Key {
        self.inner.hash_key(state, precision)
    }

    #[inline]
    fn precision_distance(&self, a: &R::Precision, b: &R::Precision) -> u64 {
        self.inner.precision_distance(a, b)
    }
}
