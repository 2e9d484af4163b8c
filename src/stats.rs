// SPDX-License-Identifier: BSD-3-Clause
//! Counters and timers, printed as metrics.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Accumulating stopwatch. Interior mutability lets it sit behind `&self`.
#[derive(Debug, Default)]
pub struct Timer {
    total: Cell<Duration>,
    count: Cell<u64>,
}

impl Timer {
    #[inline]
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record(start.elapsed());
        result
    }

    #[inline]
    pub fn record(&self, elapsed: Duration) {
        self.total.set(self.total.get() + elapsed);
        self.count.set(self.count.get() + 1);
    }

    pub fn total(&self) -> Duration {
        self.total.get()
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({} calls)", self.total(), self.count())
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub full_hits: u64,
    pub partial_hits: u64,
    pub misses: u64,
    pub precision_misses: u64,
    pub abstraction_misses: u64,
    pub no_similar_misses: u64,
    pub searches: u64,
    pub hashing: Timer,
    pub lookup: Timer,
    pub search: Timer,
}

#[derive(Debug, Default)]
pub struct ReducerStats {
    pub reduce_state: Timer,
    pub expand_state: Timer,
    pub reduce_precision: Timer,
    pub expand_precision: Timer,
}

#[derive(Debug, Default)]
pub struct BamStats {
    pub block_calls: u64,
    pub max_depth: usize,
    pub in_flight_hits: u64,
    /// Block calls re-explored because their callee found more exits.
    pub recursive_reruns: u64,
    pub reconstructions: u64,
    pub missing_blocks: u64,
    pub repeated_states: u64,
    pub reconstruction: Timer,
    pub remove_cached_subtree: Timer,
    pub remove_subtree: Timer,
}

impl BamStats {
    pub fn print(
        &self,
        cache: &CacheStats,
        reducer: &ReducerStats,
        out: &mut impl Write,
    ) -> io::Result<()> {
        writeln!(out, "block calls: {}", self.block_calls)?;
        writeln!(out, "max block depth: {}", self.max_depth)?;
        writeln!(out, "full cache hits: {}", cache.full_hits)?;
        writeln!(out, "partial cache hits: {}", cache.partial_hits)?;
        writeln!(out, "  of which in flight: {}", self.in_flight_hits)?;
        writeln!(out, "recursive calls re-explored: {}", self.recursive_reruns)?;
        writeln!(out, "cache misses: {}", cache.misses)?;
        writeln!(out, "  caused by precision: {}", cache.precision_misses)?;
        writeln!(out, "  caused by abstraction: {}", cache.abstraction_misses)?;
        writeln!(out, "  without similar entry: {}", cache.no_similar_misses)?;
        writeln!(out, "similarity searches: {}", cache.searches)?;
        writeln!(out, "key hashing: {}", cache.hashing)?;
        writeln!(out, "exact lookups: {}", cache.lookup)?;
        writeln!(out, "similarity search: {}", cache.search)?;
        writeln!(out, "reducing states: {}", reducer.reduce_state)?;
        writeln!(out, "expanding states: {}", reducer.expand_state)?;
        writeln!(out, "reducing precisions: {}", reducer.reduce_precision)?;
        writeln!(out, "expanding precisions: {}", reducer.expand_precision)?;
        writeln!(out, "counterexample reconstructions: {}", self.reconstructions)?;
        writeln!(out, "  missing blocks: {}", self.missing_blocks)?;
        writeln!(out, "  repeated states: {}", self.repeated_states)?;
        writeln!(out, "reconstruction: {}", self.reconstruction)?;
        writeln!(out, "subtree removal: {}", self.remove_subtree)?;
        writeln!(out, "cached subtree removal: {}", self.remove_cached_subtree)?;
        Ok(())
    }
}
