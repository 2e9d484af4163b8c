// SPDX-License-Identifier: BSD-3-Clause
//! What a wrapped abstract domain has to provide.

use std::fmt::Debug;

use crate::cfa::{Edge, NodeId};
use crate::error::Result;
use crate::reducer::Reducer;

pub trait Analysis {
    type State: Clone + Debug;
    type Precision: Clone + Debug + PartialEq;
    type Reducer: Reducer<State = Self::State, Precision = Self::Precision>;

    fn name(&self) -> &str;

    /// The capability to cut states down to a block, if the domain has one.
    fn reducer(&self) -> Option<Self::Reducer>;

    fn initial_state(&self, node: NodeId) -> Self::State;

    fn initial_precision(&self, node: NodeId) -> Self::Precision;

    fn location(&self, state: &Self::State) -> NodeId;

    /// Single-step transfer along `edge`, which leaves `state`'s location.
    fn successors(
        &self,
        state: &Self::State,
        precision: &Self::Precision,
        edge: &Edge,
    ) -> Result<Vec<Self::State>>;

    /// Coverage check used by the stop operator.
    fn is_less_or_equal(&self, state: &Self::State, other: &Self::State) -> bool;

    fn is_target(&self, state: &Self::State) -> bool;

    /// `current` strengthened with what a refinement found.
    fn refine_precision(
        &self,
        current: &Self::Precision,
        refinement: &Self::Precision,
    ) -> Self::Precision;
}
