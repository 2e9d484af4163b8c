// SPDX-License-Identifier: BSD-3-Clause
//! The memo cache.
//!
//! Maps a reduced block entry to the reached-set analyzing it and, once that
//! analysis completed, to the block's exit states. Lookups fall back to
//! entries with the same reduced state but a different precision.
//!
//! The cache is single-writer. Entries must be inserted before their
//! sub-analysis runs, otherwise a recursive block would never see itself in
//! the cache and recurse forever.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::arg::StateId;
use crate::block::BlockId;
use crate::hash::{fx_hash, PrecomputedHash};
use crate::reached::{ReachedSetId, ReachedSets};
use crate::reducer::Reducer;
use crate::stats::CacheStats;

/// Cache key: reduced entry state, reduced entry precision and block.
///
/// Equality only looks at the block and the reducer's key for state and
/// precision; state and precision are kept for similarity search and
/// diagnostics.
pub struct ReducedKey<R: Reducer> {
    state: R::State,
    precision: R::Precision,
    block: BlockId,
    key: R::Key,
    hash: PrecomputedHash<R::Key>,
}

impl<R: Reducer> ReducedKey<R> {
    fn new(reducer: &R, state: &R::State, precision: &R::Precision, block: BlockId) -> Self {
        let key = reducer.hash_key(state, Some(precision));
        let hash = fx_hash(&key)
            .wrapping_mul(17)
            .wrapping_add(u64::from(block.0));
        ReducedKey {
            state: state.clone(),
            precision: precision.clone(),
            block,
            key,
            hash: PrecomputedHash::from_u64(hash),
        }
    }

    pub fn state(&self) -> &R::State {
        &self.state
    }

    pub fn precision(&self) -> &R::Precision {
        &self.precision
    }

    pub fn block(&self) -> BlockId {
        self.block
    }
}

/// Manually implemented to avoid unnecessary trait bound
impl<R: Reducer> Clone for ReducedKey<R> {
    fn clone(&self) -> Self {
        ReducedKey {
            state: self.state.clone(),
            precision: self.precision.clone(),
            block: self.block,
            key: self.key.clone(),
            hash: self.hash,
        }
    }
}

impl<R: Reducer> PartialEq for ReducedKey<R> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.block == other.block && self.key == other.key
    }
}

impl<R: Reducer> Eq for ReducedKey<R> {}

impl<R: Reducer> Hash for ReducedKey<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl<R: Reducer> fmt::Debug for ReducedKey<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducedKey")
            .field("block", &self.block)
            .field("key", &self.key)
            .field("hash", &self.hash.to_u64())
            .finish()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheResult {
    /// The block was analyzed completely, these are its exits.
    Full {
        reached: ReachedSetId,
        exits: Vec<StateId>,
    },
    /// Analysis of the block started but its exits are unknown.
    Partial { reached: ReachedSetId },
    Miss,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MissCause {
    /// An entry with the same state but another precision exists.
    Precision,
    /// An entry with the same precision but another state exists.
    Abstraction,
    NoSimilar,
}

pub struct BamCache<R: Reducer> {
    aggressive: bool,
    reached: FxHashMap<ReducedKey<R>, ReachedSetId>,
    returns: FxHashMap<ReducedKey<R>, Vec<StateId>>,
    /// Lookups answered by similarity search, pointing at the entry used.
    imprecise: FxHashMap<ReducedKey<R>, ReducedKey<R>>,
    /// Exact keys per block, in insertion order.
    by_block: FxHashMap<BlockId, Vec<ReducedKey<R>>>,
    stats: CacheStats,
}

impl<R: Reducer> BamCache<R> {
    pub fn new(aggressive: bool) -> Self {
        BamCache {
            aggressive,
            reached: FxHashMap::default(),
            returns: FxHashMap::default(),
            imprecise: FxHashMap::default(),
            by_block: FxHashMap::default(),
            stats: CacheStats::default(),
        }
    }

    #[inline]
    pub fn does_aggressive_caching(&self) -> bool {
        self.aggressive
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    fn key(
        &self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) -> ReducedKey<R> {
        self.stats
            .hashing
            .time(|| ReducedKey::new(reducer, state, precision, block))
    }

    fn lookup(&self, key: &ReducedKey<R>) -> Option<CacheResult> {
        let reached = self.stats.lookup.time(|| self.reached.get(key).copied())?;
        Some(match self.returns.get(key) {
            Some(exits) => CacheResult::Full {
                reached,
                exits: exits.clone(),
            },
            None => CacheResult::Partial { reached },
        })
    }

    pub fn get(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) -> CacheResult {
        let key = self.key(reducer, state, precision, block);
        if let Some(hit) = self.lookup(&key) {
            return hit;
        }

        if let Some(target) = self.imprecise.get(&key).cloned() {
            // exits are those recorded under the entry's own precision
            if let Some(hit) = self.lookup(&target) {
                return hit;
            }
            self.imprecise.remove(&key);
        }

        if let Some(similar) = self.look_for_similar(reducer, state, precision, block) {
            tracing::debug!(?key, ?similar, "similar cache entry");
            let hit = self.lookup(&similar);
            self.imprecise.insert(key, similar);
            if let Some(hit) = hit {
                return hit;
            }
        }
        CacheResult::Miss
    }

    /// The exact entry closest in precision to `precision` among those whose
    /// key matches `state` under their own precision. The first one found
    /// wins ties.
    fn look_for_similar(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) -> Option<ReducedKey<R>> {
        self.stats.searches += 1;
        let start = Instant::now();
        let mut best: Option<(u64, &ReducedKey<R>)> = None;
        for candidate in self.by_block.get(&block).into_iter().flatten() {
            if reducer.hash_key(state, Some(&candidate.precision)) != candidate.key {
                continue;
            }
            let distance = reducer.precision_distance(precision, &candidate.precision);
            if best.map_or(true, |(min, _)| distance < min) {
                best = Some((distance, candidate));
            }
        }
        let found = best.map(|(_, k)| k.clone());
        self.stats.search.record(start.elapsed());
        found
    }

    /// Classify a miss. Purely informative.
    pub fn find_cache_miss_cause(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) -> MissCause {
        let mut cause = MissCause::NoSimilar;
        for candidate in self.by_block.get(&block).into_iter().flatten() {
            if reducer.hash_key(state, Some(&candidate.precision)) == candidate.key {
                cause = MissCause::Precision;
                break;
            }
            if reducer.hash_key(&candidate.state, Some(precision)) == candidate.key {
                cause = MissCause::Abstraction;
                break;
            }
        }
        match cause {
            MissCause::Precision => self.stats.precision_misses += 1,
            MissCause::Abstraction => self.stats.abstraction_misses += 1,
            MissCause::NoSimilar => self.stats.no_similar_misses += 1,
        }
        cause
    }

    pub fn put_reached(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
        reached: ReachedSetId,
    ) {
        let key = self.key(reducer, state, precision, block);
        debug_assert!(
            !self.reached.contains_key(&key),
            "duplicate cache entry {:?}",
            key
        );
        if self.reached.contains_key(&key) {
            warn!(?key, "keeping the existing cache entry");
            return;
        }
        self.by_block.entry(block).or_default().push(key.clone());
        self.reached.insert(key, reached);
    }

    pub fn put_exits<P>(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
        exits: Vec<StateId>,
        sets: &ReachedSets<P>,
    ) {
        let key = self.key(reducer, state, precision, block);
        debug_assert!(
            self.reached.get(&key).map_or(false, |r| exits
                .iter()
                .all(|e| sets[*r].contains(*e))),
            "exit states must belong to the cached reached-set of {:?}",
            key
        );
        if self.reached.contains_key(&key) {
            self.returns.insert(key, exits);
        } else {
            warn!(?key, "dropping exits of an uncached reached-set");
        }
    }

    pub fn remove_return_entry(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) {
        let key = self.key(reducer, state, precision, block);
        self.returns.remove(&key);
    }

    pub fn remove_block_entry(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) {
        let key = self.key(reducer, state, precision, block);
        self.remove_key(&key);
    }

    fn remove_key(&mut self, key: &ReducedKey<R>) {
        self.returns.remove(key);
        if self.reached.remove(key).is_some() {
            if let Some(keys) = self.by_block.get_mut(&key.block) {
                keys.retain(|k| k != key);
            }
        }
        self.imprecise.retain(|alias, target| alias != key && target != key);
    }

    /// Re-key the entry for (`state`, `precision`) under `new_precision`,
    /// replacing an entry that may already exist there.
    pub fn update_precision_for_entry(
        &mut self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
        new_precision: &R::Precision,
    ) {
        let old = self.key(reducer, state, precision, block);
        let Some(reached) = self.reached.remove(&old) else {
            return;
        };
        self.returns.remove(&old);
        let new = self.key(reducer, state, new_precision, block);
        if self.reached.insert(new.clone(), reached).is_some() {
            tracing::debug!(key = ?new, "re-keyed entry replaces pinned entry");
            self.returns.remove(&new);
        }
        if let Some(keys) = self.by_block.get_mut(&block) {
            keys.retain(|k| *k != new);
            if let Some(slot) = keys.iter_mut().find(|k| **k == old) {
                *slot = new.clone();
            }
        }
        for target in self.imprecise.values_mut() {
            if *target == old {
                *target = new.clone();
            }
        }
    }

    pub fn contains_precise_key(
        &self,
        reducer: &R,
        state: &R::State,
        precision: &R::Precision,
        block: BlockId,
    ) -> bool {
        let key = self.key(reducer, state, precision, block);
        self.reached.contains_key(&key)
    }

    pub fn cached_reached_sets(&self) -> impl Iterator<Item = ReachedSetId> + '_ {
        self.reached.values().copied()
    }

    /// Exact entries with their exits, grouped by block in insertion order.
    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (&ReducedKey<R>, ReachedSetId, Option<&[StateId]>)> + '_ {
        let mut blocks: Vec<_> = self.by_block.iter().collect();
        blocks.sort_by_key(|(b, _)| **b);
        blocks.into_iter().flat_map(move |(_, keys)| {
            keys.iter().filter_map(move |k| {
                let reached = *self.reached.get(k)?;
                Some((k, reached, self.returns.get(k).map(Vec::as_slice)))
            })
        })
    }

    pub fn len(&self) -> usize {
        self.reached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }

    pub fn returns_len(&self) -> usize {
        self.returns.len()
    }

    pub fn aliases_len(&self) -> usize {
        self.imprecise.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::Arg;
    use crate::cfa::NodeId;

    /// States and precisions are plain numbers, distance is their difference.
    struct Numbers;

    impl Reducer for Numbers {
        type State = u32;
        type Precision = u32;
        type Key = (u32, Option<u32>);

        fn reduce_state(&self, s: &u32, _: &crate::block::Block, _: NodeId) -> u32 {
            *s
        }
        fn expand_state(&self, _: &u32, _: &crate::block::Block, s: &u32) -> u32 {
            *s
        }
        fn reduce_precision(&self, p: &u32, _: &crate::block::Block) -> u32 {
            *p
        }
        fn expand_precision(&self, _: &u32, _: &crate::block::Block, p: &u32) -> u32 {
            *p
        }
        fn hash_key(&self, s: &u32, p: Option<&u32>) -> (u32, Option<u32>) {
            (*s, p.copied())
        }
        fn precision_distance(&self, a: &u32, b: &u32) -> u64 {
            u64::from(a.abs_diff(*b))
        }
    }

    const B: BlockId = BlockId(0);

    struct Fixture {
        cache: BamCache<Numbers>,
        arg: Arg<u32>,
        sets: ReachedSets<u32>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                cache: BamCache::new(true),
                arg: Arg::default(),
                sets: ReachedSets::default(),
            }
        }

        /// Cache a one-state reached-set for (`state`, `precision`).
        fn entry(&mut self, state: u32, precision: u32) -> (ReachedSetId, StateId) {
            let r = self.sets.create(Some(B));
            let root = self.arg.add(state, r);
            self.sets[r].add(root, NodeId(0), precision);
            self.cache.put_reached(&Numbers, &state, &precision, B, r);
            (r, root)
        }
    }

    #[test]
    fn miss_partial_full() {
        let mut f = Fixture::new();
        assert_eq!(f.cache.get(&Numbers, &1, &10, B), CacheResult::Miss);
        let (r, root) = f.entry(1, 10);
        assert_eq!(
            f.cache.get(&Numbers, &1, &10, B),
            CacheResult::Partial { reached: r }
        );
        f.cache.put_exits(&Numbers, &1, &10, B, vec![root], &f.sets);
        assert_eq!(
            f.cache.get(&Numbers, &1, &10, B),
            CacheResult::Full {
                reached: r,
                exits: vec![root]
            }
        );
        // same key in another block is unrelated
        assert_eq!(f.cache.get(&Numbers, &1, &10, BlockId(1)), CacheResult::Miss);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "duplicate cache entry")]
    fn duplicate_put() {
        let mut f = Fixture::new();
        f.entry(1, 10);
        f.entry(1, 10);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "exit states must belong")]
    fn foreign_exit() {
        let mut f = Fixture::new();
        f.entry(1, 10);
        let (_, other) = f.entry(2, 10);
        f.cache.put_exits(&Numbers, &1, &10, B, vec![other], &f.sets);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn duplicate_put_keeps_first() {
        let mut f = Fixture::new();
        let (first, _) = f.entry(1, 10);
        f.entry(1, 10);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(
            f.cache.get(&Numbers, &1, &10, B),
            CacheResult::Partial { reached: first }
        );
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn exits_of_uncached_set_dropped() {
        let mut f = Fixture::new();
        let (_, root) = f.entry(1, 10);
        f.cache.put_exits(&Numbers, &2, &10, B, vec![root], &f.sets);
        assert_eq!(f.cache.returns_len(), 0);
    }

    #[test]
    fn similarity_then_alias() {
        let mut f = Fixture::new();
        let (near, root) = f.entry(1, 10);
        f.entry(1, 20);
        f.entry(2, 12);
        f.cache.put_exits(&Numbers, &1, &10, B, vec![root], &f.sets);
        let hit = f.cache.get(&Numbers, &1, &12, B);
        assert_eq!(
            hit,
            CacheResult::Full {
                reached: near,
                exits: vec![root]
            }
        );
        assert_eq!(f.cache.stats().searches, 1);
        assert_eq!(f.cache.get(&Numbers, &1, &12, B), hit);
        assert_eq!(f.cache.stats().searches, 1);
        assert_eq!(f.cache.aliases_len(), 1);
    }

    #[test]
    fn tie_keeps_first() {
        let mut f = Fixture::new();
        let (first, _) = f.entry(1, 10);
        f.entry(1, 14);
        for _ in 0..3 {
            assert_eq!(
                f.cache.get(&Numbers, &1, &12, B),
                CacheResult::Partial { reached: first }
            );
        }
    }

    #[test]
    fn exact_after_pin() {
        let mut f = Fixture::new();
        let (r, _) = f.entry(1, 10);
        // alias from (1, 11) to (1, 10)
        f.cache.get(&Numbers, &1, &11, B);
        f.cache.update_precision_for_entry(&Numbers, &1, &10, B, &30);
        assert!(f.cache.contains_precise_key(&Numbers, &1, &30, B));
        assert!(!f.cache.contains_precise_key(&Numbers, &1, &10, B));
        assert_eq!(
            f.cache.get(&Numbers, &1, &30, B),
            CacheResult::Partial { reached: r }
        );
        // the alias follows the entry
        assert_eq!(
            f.cache.get(&Numbers, &1, &11, B),
            CacheResult::Partial { reached: r }
        );
        assert_eq!(f.cache.stats().searches, 1);
    }

    #[test]
    fn re_key_replaces_pinned() {
        let mut f = Fixture::new();
        let (old, _) = f.entry(1, 10);
        f.entry(1, 30);
        f.cache.update_precision_for_entry(&Numbers, &1, &10, B, &30);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(
            f.cache.get(&Numbers, &1, &30, B),
            CacheResult::Partial { reached: old }
        );
        assert_eq!(f.cache.entries().count(), 1);
    }

    #[test]
    fn removal() {
        let mut f = Fixture::new();
        let (r, root) = f.entry(1, 10);
        f.cache.put_exits(&Numbers, &1, &10, B, vec![root], &f.sets);
        f.cache.get(&Numbers, &1, &15, B);
        f.cache.remove_return_entry(&Numbers, &1, &10, B);
        assert_eq!(
            f.cache.get(&Numbers, &1, &10, B),
            CacheResult::Partial { reached: r }
        );
        f.cache.remove_block_entry(&Numbers, &1, &10, B);
        assert_eq!(f.cache.get(&Numbers, &1, &10, B), CacheResult::Miss);
        assert_eq!(f.cache.get(&Numbers, &1, &15, B), CacheResult::Miss);
        assert!(f.cache.is_empty());
        assert_eq!(f.cache.aliases_len(), 0);
    }

    #[test]
    fn miss_causes() {
        let mut f = Fixture::new();
        f.entry(1, 10);
        assert_eq!(
            f.cache.find_cache_miss_cause(&Numbers, &1, &20, B),
            MissCause::Precision
        );
        assert_eq!(
            f.cache.find_cache_miss_cause(&Numbers, &2, &10, B),
            MissCause::Abstraction
        );
        assert_eq!(
            f.cache.find_cache_miss_cause(&Numbers, &2, &20, B),
            MissCause::NoSimilar
        );
        // diagnosis leaves lookups alone
        assert_eq!(f.cache.aliases_len(), 0);
        assert_eq!(f.cache.stats().precision_misses, 1);
        assert_eq!(f.cache.stats().no_similar_misses, 1);
    }
}
