// SPDX-License-Identifier: BSD-3-Clause
use std::path::PathBuf;

/// Reachability checking with block abstraction memoization
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Program description (JSON)
    #[arg()]
    pub program: PathBuf,

    /// Only make the blocks whose name matches this regex
    #[arg(long)]
    pub blocks: Option<String>,

    /// Keep imprecise cache entries instead of re-keying them on refinement
    #[arg(long)]
    pub no_aggressive_caching: bool,

    /// Record why cache lookups miss
    #[arg(long)]
    pub cache_miss_statistics: bool,

    /// Debug
    #[arg(long)]
    pub debug: bool,

    /// Maximal nesting of block analyses
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Maximal number of refinements
    #[arg(long, default_value_t = 100)]
    pub max_refinements: usize,

    /// Print statistics
    #[arg(long)]
    pub metrics: bool,

    /// Quiet
    #[arg(long)]
    pub quiet: bool,

    /// Tracing
    #[arg(long)]
    pub tracing: bool,
}
