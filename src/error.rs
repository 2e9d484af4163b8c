// SPDX-License-Identifier: BSD-3-Clause
//! Errors raised by the analysis core.

/// Failures that abort an analysis run.
///
/// Stale cache references and repeated states during counterexample
/// reconstruction are *not* errors; they are reported through
/// [`crate::cex::Reconstruction`] and resolved by the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wrapped analysis cannot reduce its states to a block.
    #[error("analysis `{analysis}` provides no reducer, block abstraction memoization is unavailable")]
    MissingReducer { analysis: String },

    /// The sub-analysis of a block failed.
    #[error("recursive analysis of block `{block}` failed")]
    RecursiveAnalysisFailed {
        block: String,
        #[source]
        source: Box<Error>,
    },

    #[error("analysis interrupted")]
    Interrupted,

    /// The wrapped domain could not compute a successor.
    #[error("transfer failed: {message}")]
    Domain { message: String },

    #[error("block nesting exceeded the limit of {limit}")]
    RecursionLimit { limit: usize },

    /// The refiner judged a path spurious but found nothing new to track.
    #[error("refinement made no progress")]
    RefinementStuck,
}

impl Error {
    pub fn domain(message: impl Into<String>) -> Self {
        Error::Domain {
            message: message.into(),
        }
    }

    /// Whether this failure already carries the context of a failed block.
    pub(crate) fn is_wrapped(&self) -> bool {
        matches!(
            self,
            Error::RecursiveAnalysisFailed { .. }
            | Error::Interrupted
            | Error::RecursionLimit { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
