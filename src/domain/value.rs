// SPDX-License-Identifier: BSD-3-Clause
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::analysis::Analysis;
use crate::block::BlockPartitioning;
use crate::cfa::{Cfa, Cmp, Edge, EdgeKind, Expr, NodeId, Operation};
use crate::domain::reducer::ValueReducer;
use crate::error::{Error, Result};
use crate::lattice::Value;

/// Tracked variable names.
pub type ValuePrecision = BTreeSet<String>;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ValueState {
    pub location: NodeId,
    /// Return sites of the open calls, innermost last.
    pub stack: Vec<NodeId>,
    /// Known values; a missing variable may hold anything.
    pub values: BTreeMap<String, i64>,
}

impl ValueState {
    pub fn new(location: NodeId) -> Self {
        ValueState {
            location,
            stack: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn value(&self, var: &str) -> Value {
        Value::from(self.values.get(var).copied())
    }
}

impl fmt::Display for ValueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if !self.stack.is_empty() {
            let stack: Vec<String> = self.stack.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", stack.join(" "))?;
        }
        let values: Vec<String> = self
            .values
            .iter()
            .map(|(var, val)| format!("{var}={val}"))
            .collect();
        write!(f, " {{{}}}", values.join(", "))
    }
}

pub struct ValueAnalysis {
    cfa: Arc<Cfa>,
    partitioning: Arc<BlockPartitioning>,
    initial_precision: ValuePrecision,
}

impl ValueAnalysis {
    pub fn new(cfa: Arc<Cfa>, partitioning: Arc<BlockPartitioning>) -> Self {
        ValueAnalysis {
            cfa,
            partitioning,
            initial_precision: ValuePrecision::new(),
        }
    }

    /// Track `precision` from the start.
    pub fn with_initial_precision(mut self, precision: ValuePrecision) -> Self {
        self.initial_precision = precision;
        self
    }

    pub fn cfa(&self) -> &Cfa {
        &self.cfa
    }

    pub fn eval(&self, expr: &Expr, state: &ValueState) -> Value {
        match expr {
            Expr::Const(c) => Value::constant(*c),
            Expr::Var(v) => state.value(v),
            Expr::Nondet => Value::top(),
            Expr::Add(l, r) => self.eval(l, state).add(self.eval(r, state)),
            Expr::Sub(l, r) => self.eval(l, state).sub(self.eval(r, state)),
            Expr::Mul(l, r) => self.eval(l, state).mul(self.eval(r, state)),
        }
    }

    /// `None` when the assumption cannot hold.
    fn assume(
        &self,
        mut next: ValueState,
        precision: &ValuePrecision,
        lhs: &Expr,
        op: Cmp,
        rhs: &Expr,
    ) -> Option<ValueState> {
        let l = self.eval(lhs, &next).as_constant();
        let r = self.eval(rhs, &next).as_constant();
        match (l, r) {
            (Some(a), Some(b)) => return op.holds(a, b).then_some(next),
            (None, Some(c)) if op == Cmp::Eq => bind(&mut next, precision, lhs, c),
            (Some(c), None) if op == Cmp::Eq => bind(&mut next, precision, rhs, c),
            _ => (),
        }
        Some(next)
    }
}

fn bind(state: &mut ValueState, precision: &ValuePrecision, expr: &Expr, value: i64) {
    if let Expr::Var(v) = expr {
        if precision.contains(v) {
            state.values.insert(v.clone(), value);
        }
    }
}

impl Analysis for ValueAnalysis {
    type State = ValueState;
    type Precision = ValuePrecision;
    type Reducer = ValueReducer;

    fn name(&self) -> &str {
        "value"
    }

    fn reducer(&self) -> Option<ValueReducer> {
        Some(ValueReducer::new(&self.cfa, &self.partitioning))
    }

    fn initial_state(&self, node: NodeId) -> ValueState {
        ValueState::new(node)
    }

    fn initial_precision(&self, _node: NodeId) -> ValuePrecision {
        self.initial_precision.clone()
    }

    #[inline]
    fn location(&self, state: &ValueState) -> NodeId {
        state.location
    }

    fn successors(
        &self,
        state: &ValueState,
        precision: &ValuePrecision,
        edge: &Edge,
    ) -> Result<Vec<ValueState>> {
        if edge.from != state.location {
            return Err(Error::domain(format!(
                "edge {} does not leave {}",
                edge, state.location
            )));
        }
        let mut next = state.clone();
        next.location = edge.to;
        match &edge.kind {
            EdgeKind::Ordinary(Operation::Skip) => (),
            EdgeKind::Ordinary(Operation::Assign { var, expr }) => {
                match self.eval(expr, state).as_constant() {
                    Some(c) if precision.contains(var) => {
                        next.values.insert(var.clone(), c);
                    }
                    _ => {
                        next.values.remove(var);
                    }
                }
            }
            EdgeKind::Ordinary(Operation::Assume { lhs, op, rhs }) => {
                return Ok(self
                    .assume(next, precision, lhs, *op, rhs)
                    .into_iter()
                    .collect());
            }
            EdgeKind::Call { return_site, .. } => next.stack.push(*return_site),
            EdgeKind::Return { .. } => match next.stack.last() {
                Some(top) if *top == edge.to => {
                    next.stack.pop();
                }
                Some(_) => return Ok(Vec::new()),
                // block-local states do not know their caller
                None => (),
            },
        }
        Ok(vec![next])
    }

    fn is_less_or_equal(&self, state: &ValueState, other: &ValueState) -> bool {
        state.location == other.location
            && state.stack == other.stack
            && other
                .values
                .iter()
                .all(|(var, val)| state.value(var).is_less_or_equal(Value::constant(*val)))
    }

    #[inline]
    fn is_target(&self, state: &ValueState) -> bool {
        self.cfa.is_error(state.location)
    }

    fn refine_precision(
        &self,
        current: &ValuePrecision,
        refinement: &ValuePrecision,
    ) -> ValuePrecision {
        current.union(refinement).cloned().collect()
    }
}
