// SPDX-License-Identifier: BSD-3-Clause
//! Feasibility check of counterexample paths by concrete replay.

use tracing::{debug, trace};

use crate::analysis::Analysis;
use crate::arg::StateId;
use crate::bam::Bam;
use crate::cegar::{Refinement, Refiner};
use crate::domain::value::{ValueAnalysis, ValuePrecision, ValueState};
use crate::error::{Error, Result};

/// Replays a path tracking every variable it mentions. A path the replay
/// cannot follow is spurious, and the variables seen up to the failing step
/// become the refinement.
#[derive(Debug, Default)]
pub struct ValueRefiner {
    checked: usize,
}

impl ValueRefiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths checked so far.
    pub fn checked(&self) -> usize {
        self.checked
    }
}

impl Refiner<ValueAnalysis> for ValueRefiner {
    fn refine(
        &mut self,
        bam: &Bam<ValueAnalysis>,
        path: &[StateId],
    ) -> Result<Refinement<ValuePrecision>> {
        self.checked += 1;
        let Some(first) = path.first() else {
            return Ok(Refinement::Feasible);
        };
        let cfa = bam.cfa();
        let analysis = bam.analysis();

        let mut everything = ValuePrecision::new();
        for pair in path.windows(2) {
            for edge in cfa.edges_between(bam.location(pair[0]), bam.location(pair[1])) {
                everything.extend(edge.variables());
            }
        }

        let mut state = ValueState::new(bam.location(*first));
        let mut seen = ValuePrecision::new();
        for i in 1..path.len() {
            let from = bam.location(path[i - 1]);
            let to = bam.location(path[i]);
            let mut next = None;
            let mut any_edge = false;
            for edge in cfa.edges_between(from, to) {
                any_edge = true;
                if let Some(succ) = analysis.successors(&state, &everything, edge)?.pop() {
                    seen.extend(edge.variables());
                    next = Some(succ);
                    break;
                }
            }
            if !any_edge {
                return Err(Error::domain(format!("path has no edge {from} -> {to}")));
            }
            match next {
                Some(succ) => {
                    trace!(step = i, state = %succ, "replayed");
                    state = succ;
                }
                None => {
                    for edge in cfa.edges_between(from, to) {
                        seen.extend(edge.variables());
                    }
                    debug!(step = i, ?seen, "path is infeasible");
                    let cut = cut_point(bam, path, i, &seen)?;
                    return Ok(Refinement::Spurious {
                        cut,
                        precision: seen,
                    });
                }
            }
        }
        Ok(Refinement::Feasible)
    }
}

/// First step up to `failed` whose edge uses a variable of `refinement` that
/// the state before it does not track.
fn cut_point(
    bam: &Bam<ValueAnalysis>,
    path: &[StateId],
    failed: usize,
    refinement: &ValuePrecision,
) -> Result<usize> {
    let none = ValuePrecision::new();
    let cfa = bam.cfa();
    (1..=failed)
        .find(|&i| {
            let tracked = bam.precision(path[i - 1]).unwrap_or(&none);
            cfa.edges_between(bam.location(path[i - 1]), bam.location(path[i]))
                .flat_map(|e| e.variables())
                .any(|v| refinement.contains(&v) && !tracked.contains(&v))
        })
        .ok_or(Error::RefinementStuck)
}
