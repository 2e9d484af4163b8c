// SPDX-License-Identifier: BSD-3-Clause
//! The worklist fixpoint algorithm run on every reached-set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::analysis::Analysis;
use crate::arg::StateId;
use crate::bam::Bam;
use crate::cfa::NodeId;
use crate::error::{Error, Result};
use crate::reached::ReachedSetId;

/// Cooperative cancellation, checked between steps of the algorithm.
#[derive(Clone, Debug, Default)]
pub struct ShutdownNotifier(Arc<AtomicBool>);

impl ShutdownNotifier {
    pub fn request_shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// The waitlist ran empty.
    Complete,
    /// Exploration stopped at this target state, which is the newest state
    /// of the reached-set.
    TargetFound(StateId),
}

impl<A: Analysis> Bam<A> {
    /// Explore `reached` until its waitlist is empty or a target shows up.
    pub fn run(&mut self, reached: ReachedSetId) -> Result<Status> {
        loop {
            self.shutdown.check()?;
            let Some(id) = self.sets[reached].pop_waiting() else {
                return Ok(Status::Complete);
            };
            trace!(state = %id, %reached, "exploring");
            let successors = self.successors(id)?;
            let total = successors.len();
            for (n, successor) in successors.into_iter().enumerate() {
                let location = self.analysis.location(&successor.state);
                if self.is_covered(reached, location, &successor.state) {
                    trace!(parent = %id, %location, "covered");
                    continue;
                }
                let target = self.analysis.is_target(&successor.state);
                let new = self.arg.add(successor.state, reached);
                self.arg.add_parent(new, id);
                self.sets[reached].add(new, location, successor.precision);
                if let Some(exit) = successor.exit {
                    self.data.register_expanded(new, exit);
                }
                if target {
                    if n + 1 < total {
                        self.sets[reached].reinsert_waiting(id);
                    }
                    debug!(state = %new, %location, %reached, "target found");
                    return Ok(Status::TargetFound(new));
                }
            }
        }
    }

    fn is_covered(&self, reached: ReachedSetId, location: NodeId, state: &A::State) -> bool {
        self.sets[reached]
            .at_location(location)
            .any(|other| self.analysis.is_less_or_equal(state, self.arg.state(other)))
    }
}
