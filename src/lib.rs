// SPDX-License-Identifier: BSD-3-Clause
pub mod algorithm;
pub mod analysis;
pub mod arg;
pub mod bam;
pub mod block;
pub mod cache;
pub mod cegar;
pub mod cex;
pub mod cfa;
pub mod data;
pub mod domain;
pub mod error;
pub mod hash;
pub mod lattice;
pub mod layers;
pub mod program;
pub mod reached;
pub mod reducer;
pub mod remover;
pub mod stats;
pub mod transfer;

pub use algorithm::{ShutdownNotifier, Status};
pub use analysis::Analysis;
pub use arg::StateId;
pub use bam::{Bam, Options};
pub use block::{Block, BlockKind, BlockPartitioning};
pub use cegar::{Cegar, Refinement, Refiner, Verdict};
pub use cex::{Counterexample, Reconstruction};
pub use cfa::{Cfa, NodeId};
pub use error::{Error, Result};
pub use program::Program;
pub use reached::ReachedSetId;
pub use reducer::Reducer;
