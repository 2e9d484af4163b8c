// SPDX-License-Identifier: BSD-3-Clause
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use tracing_flame::FlameLayer;
use tracing_subscriber::{fmt, prelude::*};

use yabam::domain::{ValueAnalysis, ValueRefiner};
use yabam::layers::{SpanTimeLayer, SpanTotals};
use yabam::{cegar, Bam, BlockPartitioning, Cegar, Program, Verdict};

mod cli;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

fn setup_global_subscriber() -> Result<(impl Drop, SpanTotals)> {
    let filter_layer = tracing::level_filters::LevelFilter::TRACE;
    let fmt_layer = fmt::Layer::default().with_writer(io::stderr);
    let (flame_layer, guard) =
        FlameLayer::with_file("./tracing.folded").context("Couldn't create ./tracing.folded")?;
    let span_layer = SpanTimeLayer::new();
    let totals = span_layer.totals();
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(flame_layer)
        .with(span_layer)
        .init();
    Ok((guard, totals))
}

fn main() -> Result<()> {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let args = cli::Args::parse();

    let tracing = if args.tracing {
        Some(setup_global_subscriber()?)
    } else {
        None
    };

    let text = std::fs::read_to_string(&args.program)
        .with_context(|| format!("Couldn't read program at {}", args.program.display()))?;
    let program = Program::from_json(&text).context("Couldn't load program")?;

    let filter = args
        .blocks
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .context("Invalid --blocks regex")?;
    let cfa = Arc::new(program.cfa);
    let partitioning = Arc::new(BlockPartitioning::new(
        &cfa,
        &program.loops,
        filter.as_ref(),
    ));

    let opts = yabam::Options {
        aggressive_caching: !args.no_aggressive_caching,
        gather_cache_miss_statistics: args.cache_miss_statistics,
        max_recursion_depth: args.max_depth,
    };
    let analysis = ValueAnalysis::new(Arc::clone(&cfa), Arc::clone(&partitioning));
    let bam = Bam::new(analysis, cfa, partitioning, opts).context("Couldn't set up analysis")?;
    let mut cegar = Cegar::new(
        bam,
        ValueRefiner::new(),
        cegar::Options {
            max_refinements: args.max_refinements,
        },
    );
    let verdict = cegar.check().context("Analysis failed")?;

    let mut stdout = io::stdout().lock();
    if !args.quiet {
        writeln!(stdout, "verdict")?;
        writeln!(stdout, "-------")?;
        match &verdict {
            Verdict::Safe => writeln!(stdout, "SAFE")?,
            Verdict::Unsafe { .. } => writeln!(stdout, "UNSAFE")?,
            Verdict::Unknown => writeln!(stdout, "UNKNOWN")?,
        }
        if let Verdict::Unsafe { path } = &verdict {
            writeln!(stdout)?;
            writeln!(stdout, "counterexample")?;
            writeln!(stdout, "--------------")?;
            for state in path {
                writeln!(stdout, "{}", cegar.bam().state(*state))?;
            }
        }
    }

    if args.debug {
        writeln!(stdout)?;
        writeln!(stdout, "blocks")?;
        writeln!(stdout, "------")?;
        write!(stdout, "{}", cegar.bam().dump())?;
    }

    if args.metrics {
        writeln!(stdout)?;
        writeln!(stdout, "metrics")?;
        writeln!(stdout, "-------")?;
        writeln!(stdout, "refinements: {}", cegar.refinements())?;
        writeln!(stdout, "reruns: {}", cegar.reruns())?;
        cegar.bam().print_statistics(&mut stdout)?;
        if let Some((_, totals)) = &tracing {
            totals.print(&mut stdout)?;
        }
    }

    Ok(())
}
