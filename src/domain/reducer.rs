// SPDX-License-Identifier: BSD-3-Clause
//! Reduction to the variables a block touches.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::block::{Block, BlockId, BlockPartitioning};
use crate::cfa::{Cfa, NodeId};
use crate::domain::value::{ValuePrecision, ValueState};
use crate::reducer::Reducer;

#[derive(Debug)]
pub struct ValueReducer {
    /// Variables occurring on edges leaving a block's nodes.
    block_variables: FxHashMap<BlockId, BTreeSet<String>>,
    none: BTreeSet<String>,
}

impl ValueReducer {
    pub fn new(cfa: &Cfa, partitioning: &BlockPartitioning) -> Self {
        let block_variables = partitioning
            .blocks()
            .map(|block| {
                let vars = block
                    .nodes()
                    .flat_map(|n| cfa.leaving_edges(n))
                    .flat_map(|e| e.variables())
                    .collect();
                (block.id(), vars)
            })
            .collect();
        ValueReducer {
            block_variables,
            none: BTreeSet::new(),
        }
    }

    pub fn variables(&self, block: &Block) -> &BTreeSet<String> {
        self.block_variables.get(&block.id()).unwrap_or(&self.none)
    }
}

impl Reducer for ValueReducer {
    type State = ValueState;
    type Precision = ValuePrecision;
    type Key = (ValueState, Option<ValuePrecision>);

    fn reduce_state(&self, expanded: &ValueState, block: &Block, _call_node: NodeId) -> ValueState {
        let vars = self.variables(block);
        ValueState {
            location: expanded.location,
            stack: Vec::new(),
            values: expanded
                .values
                .iter()
                .filter(|(var, _)| vars.contains(*var))
                .map(|(var, val)| (var.clone(), *val))
                .collect(),
        }
    }

    fn expand_state(&self, root: &ValueState, block: &Block, reduced: &ValueState) -> ValueState {
        let vars = self.variables(block);
        let mut values = reduced.values.clone();
        for (var, val) in &root.values {
            if !vars.contains(var) {
                values.insert(var.clone(), *val);
            }
        }
        ValueState {
            location: reduced.location,
            stack: root.stack.clone(),
            values,
        }
    }

    fn reduce_precision(&self, precision: &ValuePrecision, block: &Block) -> ValuePrecision {
        precision
            .intersection(self.variables(block))
            .cloned()
            .collect()
    }

    fn expand_precision(
        &self,
        root: &ValuePrecision,
        block: &Block,
        reduced: &ValuePrecision,
    ) -> ValuePrecision {
        let mut precision: ValuePrecision =
            root.difference(self.variables(block)).cloned().collect();
        precision.extend(reduced.iter().cloned());
        precision
    }

    fn hash_key(
        &self,
        state: &ValueState,
        precision: Option<&ValuePrecision>,
    ) -> (ValueState, Option<ValuePrecision>) {
        (state.clone(), precision.cloned())
    }

    fn precision_distance(&self, a: &ValuePrecision, b: &ValuePrecision) -> u64 {
        a.symmetric_difference(b).count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use serde_json::json;

    fn setup() -> (Cfa, BlockPartitioning) {
        let p = Program::from_value(json!({
            "main": "main",
            "functions": [
                {"name": "main", "entry": 0, "exit": 2, "edges": [
                    {"from": 0, "to": 1, "op": {"assign": {"var": "a", "expr": {"const": 1}}}},
                    {"from": 1, "to": 2, "op": {"call": {"callee": "f"}}}
                ]},
                {"name": "f", "entry": 10, "exit": 12, "edges": [
                    {"from": 10, "to": 11, "op": {"assign": {"var": "x", "expr": {"const": 0}}}},
                    {"from": 11, "to": 12, "op": {"call": {"callee": "g"}}}
                ]},
                {"name": "g", "entry": 20, "exit": 21, "edges": [
                    {"from": 20, "to": 21, "op": {"assume": {"lhs": {"var": "y"}, "op": "lt", "rhs": {"var": "x"}}}}
                ]}
            ]
        }))
        .unwrap();
        let partitioning = BlockPartitioning::new(&p.cfa, &p.loops, None);
        (p.cfa, partitioning)
    }

    fn vars(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn block_variables_include_callees() {
        let (cfa, partitioning) = setup();
        let reducer = ValueReducer::new(&cfa, &partitioning);
        let f = partitioning.block_by_name("f").unwrap();
        let g = partitioning.block_by_name("g").unwrap();
        assert_eq!(reducer.variables(f), &vars(&["x", "y"]));
        assert_eq!(reducer.variables(g), &vars(&["x", "y"]));
    }

    #[test]
    fn reduce_then_expand() {
        let (cfa, partitioning) = setup();
        let reducer = ValueReducer::new(&cfa, &partitioning);
        let f = partitioning.block_by_name("f").unwrap();
        let mut root = ValueState::new(NodeId(10));
        root.stack.push(NodeId(2));
        root.values.insert("a".into(), 1);
        root.values.insert("x".into(), 5);
        let reduced = reducer.reduce_state(&root, f, f.entry());
        assert!(reduced.stack.is_empty());
        assert_eq!(reduced.values.keys().collect::<Vec<_>>(), vec!["x"]);

        let mut exit = reduced.clone();
        exit.location = NodeId(12);
        exit.values.insert("x".into(), 0);
        let expanded = reducer.expand_state(&root, f, &exit);
        assert_eq!(expanded.location, NodeId(12));
        assert_eq!(expanded.stack, vec![NodeId(2)]);
        assert_eq!(expanded.values.get("a"), Some(&1));
        assert_eq!(expanded.values.get("x"), Some(&0));
    }

    #[test]
    fn precisions() {
        let (cfa, partitioning) = setup();
        let reducer = ValueReducer::new(&cfa, &partitioning);
        let f = partitioning.block_by_name("f").unwrap();
        let outer = vars(&["a", "x"]);
        let reduced = reducer.reduce_precision(&outer, f);
        assert_eq!(reduced, vars(&["x"]));
        let expanded = reducer.expand_precision(&outer, f, &vars(&["y"]));
        assert_eq!(expanded, vars(&["a", "y"]));
        assert_eq!(reducer.precision_distance(&outer, &vars(&["x", "y"])), 2);
        assert_eq!(reducer.precision_distance(&outer, &outer), 0);
    }
}
