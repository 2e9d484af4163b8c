// SPDX-License-Identifier: BSD-3-Clause
//! The block abstraction memoization engine.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::algorithm::{ShutdownNotifier, Status};
use crate::analysis::Analysis;
use crate::arg::{Arg, StateId};
use crate::block::{BlockId, BlockPartitioning};
use crate::cache::BamCache;
use crate::cfa::{Cfa, NodeId};
use crate::data::DataManager;
use crate::error::{Error, Result};
use crate::reached::{ReachedSet, ReachedSetId, ReachedSets};
use crate::reducer::TimedReducer;
use crate::stats::BamStats;

#[derive(Clone, Debug)]
pub struct Options {
    /// Pin exact cache keys for refined blocks before invalidating them.
    pub aggressive_caching: bool,
    /// Classify every cache miss.
    pub gather_cache_miss_statistics: bool,
    /// Abort when blocks nest deeper than this.
    pub max_recursion_depth: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            aggressive_caching: true,
            gather_cache_miss_statistics: false,
            max_recursion_depth: None,
        }
    }
}

type Cache<A> = BamCache<TimedReducer<<A as Analysis>::Reducer>>;

pub struct Bam<A: Analysis> {
    pub(crate) analysis: A,
    pub(crate) reducer: TimedReducer<A::Reducer>,
    pub(crate) cfa: Arc<Cfa>,
    pub(crate) partitioning: Arc<BlockPartitioning>,
    pub(crate) arg: Arg<A::State>,
    pub(crate) sets: ReachedSets<A::Precision>,
    pub(crate) cache: Cache<A>,
    pub(crate) data: DataManager,
    /// Block whose reached-set is being explored, `None` for the program.
    pub(crate) current_block: Option<BlockId>,
    /// Reached-sets whose sub-analysis is running, innermost last.
    pub(crate) in_flight: Vec<ReachedSetId>,
    /// Block calls answered from a reached-set still in flight, with the
    /// number of exits the set had at that time.
    pub(crate) recursive_calls: FxHashMap<ReachedSetId, Vec<(StateId, usize)>>,
    pub(crate) depth: usize,
    pub(crate) main: Option<ReachedSetId>,
    pub(crate) options: Options,
    pub(crate) shutdown: ShutdownNotifier,
    pub(crate) stats: BamStats,
}

impl<A: Analysis> Bam<A> {
    pub fn new(
        analysis: A,
        cfa: Arc<Cfa>,
        partitioning: Arc<BlockPartitioning>,
        options: Options,
    ) -> Result<Self> {
        let reducer = analysis.reducer().ok_or_else(|| Error::MissingReducer {
            analysis: analysis.name().to_string(),
        })?;
        Ok(Bam {
            analysis,
            reducer: TimedReducer::new(reducer),
            cfa,
            partitioning,
            arg: Arg::default(),
            sets: ReachedSets::default(),
            cache: BamCache::new(options.aggressive_caching),
            data: DataManager::default(),
            current_block: None,
            in_flight: Vec::new(),
            recursive_calls: FxHashMap::default(),
            depth: 0,
            main: None,
            options,
            shutdown: ShutdownNotifier::default(),
            stats: BamStats::default(),
        })
    }

    /// Explore the program from its entry, continuing where a previous run
    /// stopped.
    pub fn run_main(&mut self) -> Result<Status> {
        let main = match self.main {
            Some(main) => main,
            None => {
                let entry = self.cfa.main_entry();
                let state = self.analysis.initial_state(entry);
                let precision = self.analysis.initial_precision(entry);
                let target = self.analysis.is_target(&state);
                let main = self.sets.create(None);
                let root = self.arg.add(state, main);
                self.sets[main].add(root, entry, precision);
                self.main = Some(main);
                if target {
                    return Ok(Status::TargetFound(root));
                }
                main
            }
        };
        self.current_block = None;
        self.depth = 0;
        self.in_flight.clear();
        self.recursive_calls.clear();
        let _span = tracing::debug_span!("main", reached = %main).entered();
        self.run(main)
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }

    pub fn cfa(&self) -> &Cfa {
        &self.cfa
    }

    pub fn partitioning(&self) -> &BlockPartitioning {
        &self.partitioning
    }

    pub fn arg(&self) -> &Arg<A::State> {
        &self.arg
    }

    pub fn reached(&self, id: ReachedSetId) -> &ReachedSet<A::Precision> {
        &self.sets[id]
    }

    pub fn reached_sets(&self) -> &ReachedSets<A::Precision> {
        &self.sets
    }

    pub fn main_reached(&self) -> Option<ReachedSetId> {
        self.main
    }

    pub fn cache(&self) -> &Cache<A> {
        &self.cache
    }

    /// The analysis' reducer, as used for cache keys.
    pub fn reducer(&self) -> &TimedReducer<A::Reducer> {
        &self.reducer
    }

    pub fn data(&self) -> &DataManager {
        &self.data
    }

    pub fn stats(&self) -> &BamStats {
        &self.stats
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn shutdown_notifier(&self) -> ShutdownNotifier {
        self.shutdown.clone()
    }

    #[inline]
    pub fn state(&self, id: StateId) -> &A::State {
        self.arg.state(id)
    }

    #[inline]
    pub fn location(&self, id: StateId) -> NodeId {
        self.analysis.location(self.arg.state(id))
    }

    /// Precision of `id` in the reached-set holding it.
    pub fn precision(&self, id: StateId) -> Option<&A::Precision> {
        self.sets[self.arg.owner(id)].precision(id)
    }

    pub fn print_statistics(&self, out: &mut impl Write) -> io::Result<()> {
        self.stats
            .print(self.cache.stats(), self.reducer.stats(), out)?;
        writeln!(out, "cached reached-sets: {}", self.cache.len())?;
        let cached_states: usize = self
            .cache
            .cached_reached_sets()
            .map(|r| self.sets[r].len())
            .sum();
        writeln!(out, "states in cached reached-sets: {}", cached_states)?;
        writeln!(out, "cached exit sets: {}", self.cache.returns_len())?;
        writeln!(out, "imprecise aliases: {}", self.cache.aliases_len())?;
        writeln!(out, "reached-sets: {}", self.sets.len())?;
        writeln!(out, "ARG nodes: {}", self.arg.len())?;
        Ok(())
    }

    /// Human readable dump of cache entries and cross-block links.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cache");
        for (key, reached, exits) in self.cache.entries() {
            let block = self.partitioning.block(key.block());
            let root = self.sets[reached].first_state();
            let _ = write!(
                out,
                "  {} {:?} -> {} (root {}, {} states",
                block.name(),
                key.precision(),
                reached,
                root.map(|r| r.to_string()).unwrap_or_default(),
                self.sets[reached].len()
            );
            match exits {
                Some(exits) => {
                    let exits: Vec<String> = exits.iter().map(ToString::to_string).collect();
                    let _ = writeln!(out, ", exits [{}])", exits.join(", "));
                }
                None => {
                    let _ = writeln!(out, ", partial)");
                }
            }
        }
        out.push_str(&self.data.dump());
        out
    }
}
