// SPDX-License-Identifier: BSD-3-Clause
//! Counterexample-guided abstraction refinement around the engine.

use tracing::{debug, info};

use crate::algorithm::Status;
use crate::analysis::Analysis;
use crate::arg::StateId;
use crate::bam::Bam;
use crate::cex::Reconstruction;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct Options {
    /// Give up after this many refinements.
    pub max_refinements: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_refinements: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Refinement<P> {
    /// The path is a real error trace.
    Feasible,
    /// The path cannot be executed. Tracking `precision` from `path[cut]`
    /// on rules it out.
    Spurious { cut: usize, precision: P },
}

/// Decides whether a counterexample path is feasible.
pub trait Refiner<A: Analysis> {
    fn refine(&mut self, bam: &Bam<A>, path: &[StateId]) -> Result<Refinement<A::Precision>>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Safe,
    Unsafe { path: Vec<StateId> },
    Unknown,
}

pub struct Cegar<A: Analysis, R> {
    bam: Bam<A>,
    refiner: R,
    options: Options,
    refinements: usize,
    reruns: usize,
}

impl<A: Analysis, R: Refiner<A>> Cegar<A, R> {
    pub fn new(bam: Bam<A>, refiner: R, options: Options) -> Self {
        Cegar {
            bam,
            refiner,
            options,
            refinements: 0,
            reruns: 0,
        }
    }

    pub fn bam(&self) -> &Bam<A> {
        &self.bam
    }

    pub fn bam_mut(&mut self) -> &mut Bam<A> {
        &mut self.bam
    }

    pub fn refinements(&self) -> usize {
        self.refinements
    }

    /// Analysis reruns forced by stale cached blocks.
    pub fn reruns(&self) -> usize {
        self.reruns
    }

    pub fn check(&mut self) -> Result<Verdict> {
        loop {
            let target = match self.bam.run_main()? {
                Status::Complete => {
                    info!(refinements = self.refinements, "no target reachable");
                    return Ok(Verdict::Safe);
                }
                Status::TargetFound(target) => target,
            };
            let reached = self.bam.arg().owner(target);
            let cex = match self.bam.reconstruct_counterexample(target, reached)? {
                Reconstruction::Found(cex) => cex,
                Reconstruction::MissingBlock => {
                    self.reruns += 1;
                    if self.reruns > self.options.max_refinements {
                        return Ok(Verdict::Unknown);
                    }
                    debug!("stale block on the counterexample, rerunning");
                    continue;
                }
                Reconstruction::RepeatedState => return Ok(Verdict::Unknown),
            };
            let path = cex.path();
            match self.refiner.refine(&self.bam, &path)? {
                Refinement::Feasible => {
                    info!(
                        refinements = self.refinements,
                        len = path.len(),
                        "feasible counterexample"
                    );
                    return Ok(Verdict::Unsafe { path });
                }
                Refinement::Spurious { cut, precision } => {
                    if self.refinements >= self.options.max_refinements {
                        return Ok(Verdict::Unknown);
                    }
                    self.refinements += 1;
                    debug!(cut = %path[cut], ?precision, "spurious counterexample");
                    self.bam.remove_subtree(&path, cut, &precision);
                }
            }
        }
    }
}
