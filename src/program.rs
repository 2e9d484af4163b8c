// SPDX-License-Identifier: BSD-3-Clause
//! JSON description of a program and its validation into a [`Cfa`].

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::block::LoopRegion;
use crate::cfa::{Cfa, Cmp, Edge, EdgeKind, Expr, Function, FunctionId, NodeId, Operation};

#[derive(Debug, thiserror::Error)]
#[error("Malformed program: {0}")]
pub struct Error(pub String);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramDecl {
    main: String,
    functions: Vec<FunctionDecl>,
    #[serde(default)]
    errors: Vec<NodeId>,
    #[serde(default)]
    loops: Vec<LoopDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionDecl {
    name: String,
    entry: NodeId,
    exit: NodeId,
    #[serde(default)]
    nodes: Vec<NodeId>,
    #[serde(default)]
    edges: Vec<EdgeDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EdgeDecl {
    from: NodeId,
    to: NodeId,
    op: OpDecl,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum OpDecl {
    Skip,
    Assign { var: String, expr: Expr },
    Assume { lhs: Expr, op: Cmp, rhs: Expr },
    Call { callee: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoopDecl {
    name: String,
    entry: NodeId,
    nodes: Vec<NodeId>,
    exits: Vec<NodeId>,
}

#[derive(Debug)]
pub struct Program {
    pub cfa: Cfa,
    pub loops: Vec<LoopRegion>,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let decl: ProgramDecl = serde_json::from_str(text).map_err(|e| Error(e.to_string()))?;
        Self::build(decl)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        let decl: ProgramDecl =
            serde_json::from_value(value).map_err(|e| Error(e.to_string()))?;
        Self::build(decl)
    }

    fn build(decl: ProgramDecl) -> Result<Self, Error> {
        let mut ids: FxHashMap<&str, FunctionId> = FxHashMap::default();
        for (idx, f) in decl.functions.iter().enumerate() {
            if ids.insert(&f.name, FunctionId(idx as u32)).is_some() {
                return Err(Error(format!("duplicate function `{}`", f.name)));
            }
        }
        let main = *ids
            .get(decl.main.as_str())
            .ok_or_else(|| Error(format!("unknown main function `{}`", decl.main)))?;

        let mut owner: FxHashMap<NodeId, FunctionId> = FxHashMap::default();
        let mut functions = Vec::with_capacity(decl.functions.len());
        for (idx, f) in decl.functions.iter().enumerate() {
            let fid = FunctionId(idx as u32);
            let mut nodes: BTreeSet<NodeId> = f.nodes.iter().copied().collect();
            nodes.insert(f.entry);
            nodes.insert(f.exit);
            for e in &f.edges {
                nodes.insert(e.from);
                nodes.insert(e.to);
            }
            for n in &nodes {
                if let Some(other) = owner.insert(*n, fid) {
                    return Err(Error(format!(
                        "node {} used by both `{}` and `{}`",
                        n, decl.functions[other.0 as usize].name, f.name
                    )));
                }
            }
            functions.push(Function {
                name: f.name.clone(),
                entry: f.entry,
                exit: f.exit,
                nodes,
                callees: BTreeSet::new(),
            });
        }

        let mut edges = Vec::new();
        for (idx, f) in decl.functions.iter().enumerate() {
            for e in &f.edges {
                let op = match &e.op {
                    OpDecl::Call { callee } => {
                        let callee_id = *ids.get(callee.as_str()).ok_or_else(|| {
                            Error(format!("unknown callee `{}` in `{}`", callee, f.name))
                        })?;
                        let target = &functions[callee_id.0 as usize];
                        edges.push(Edge {
                            from: e.from,
                            to: target.entry,
                            kind: EdgeKind::Call {
                                callee: callee_id,
                                return_site: e.to,
                            },
                        });
                        edges.push(Edge {
                            from: target.exit,
                            to: e.to,
                            kind: EdgeKind::Return { callee: callee_id },
                        });
                        functions[idx].callees.insert(callee_id);
                        continue;
                    }
                    OpDecl::Skip => Operation::Skip,
                    OpDecl::Assign { var, expr } => Operation::Assign {
                        var: var.clone(),
                        expr: expr.clone(),
                    },
                    OpDecl::Assume { lhs, op, rhs } => Operation::Assume {
                        lhs: lhs.clone(),
                        op: *op,
                        rhs: rhs.clone(),
                    },
                };
                edges.push(Edge {
                    from: e.from,
                    to: e.to,
                    kind: EdgeKind::Ordinary(op),
                });
            }
        }

        let declared = |n: &NodeId, what: &str| {
            if owner.contains_key(n) {
                Ok(())
            } else {
                Err(Error(format!("{} refers to undeclared node {}", what, n)))
            }
        };

        let mut errors = FxHashSet::default();
        for n in &decl.errors {
            declared(n, "error location")?;
            errors.insert(*n);
        }

        let mut loops = Vec::with_capacity(decl.loops.len());
        for l in decl.loops {
            let what = format!("loop `{}`", l.name);
            for n in std::iter::once(&l.entry).chain(&l.nodes).chain(&l.exits) {
                declared(n, what.as_str())?;
            }
            let nodes: BTreeSet<NodeId> = l.nodes.iter().copied().collect();
            if !nodes.contains(&l.entry) || !l.exits.iter().all(|x| nodes.contains(x)) {
                return Err(Error(format!(
                    "loop `{}` must contain its entry and exits",
                    l.name
                )));
            }
            loops.push(LoopRegion {
                name: l.name,
                entry: l.entry,
                nodes,
                exits: l.exits.into_iter().collect(),
            });
        }

        tracing::debug!(
            functions = functions.len(),
            edges = edges.len(),
            "loaded program"
        );
        Ok(Program {
            cfa: Cfa::new(functions, main, edges, errors),
            loops,
        })
    }
}
