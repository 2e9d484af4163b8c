// SPDX-License-Identifier: BSD-3-Clause
//! Control-flow automaton of the analyzed program.
//!
//! All variables are global integers. Functions communicate through them, so
//! calls and returns only transfer control.

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FunctionId(pub(crate) u32);

#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expr {
    Const(i64),
    Var(String),
    Nondet,
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) | Expr::Nondet => (),
            Expr::Var(v) => {
                out.insert(v.clone());
            }
            Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Nondet => write!(f, "nondet()"),
            Expr::Add(l, r) => write!(f, "({l} + {r})"),
            Expr::Sub(l, r) => write!(f, "({l} - {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cmp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl Cmp {
    #[inline]
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cmp::Lt => lhs < rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Eq => lhs == rhs,
            Cmp::Ne => lhs != rhs,
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
        }
    }
}

impl fmt::Display for Cmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Skip,
    Assign { var: String, expr: Expr },
    Assume { lhs: Expr, op: Cmp, rhs: Expr },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Skip => write!(f, "skip"),
            Operation::Assign { var, expr } => write!(f, "{var} := {expr}"),
            Operation::Assume { lhs, op, rhs } => write!(f, "[{lhs} {op} {rhs}]"),
        }
    }
}

/// Closed set of edge kinds; everything dispatches on it with an exhaustive
/// `match`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EdgeKind {
    Ordinary(Operation),
    Call {
        callee: FunctionId,
        return_site: NodeId,
    },
    Return {
        callee: FunctionId,
    },
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    /// Variables read or written by this edge.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        if let EdgeKind::Ordinary(op) = &self.kind {
            match op {
                Operation::Skip => (),
                Operation::Assign { var, expr } => {
                    vars.insert(var.clone());
                    expr.collect_variables(&mut vars);
                }
                Operation::Assume { lhs, rhs, .. } => {
                    lhs.collect_variables(&mut vars);
                    rhs.collect_variables(&mut vars);
                }
            }
        }
        vars
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub entry: NodeId,
    pub exit: NodeId,
    pub nodes: BTreeSet<NodeId>,
    /// Functions called directly from this one
    pub callees: BTreeSet<FunctionId>,
}

#[derive(Debug)]
pub struct Cfa {
    functions: Vec<Function>,
    main: FunctionId,
    leaving: FxHashMap<NodeId, Vec<Edge>>,
    function_of: FxHashMap<NodeId, FunctionId>,
    errors: FxHashSet<NodeId>,
}

impl Cfa {
    pub(crate) fn new(
        functions: Vec<Function>,
        main: FunctionId,
        edges: Vec<Edge>,
        errors: FxHashSet<NodeId>,
    ) -> Self {
        let mut function_of = FxHashMap::default();
        for (idx, f) in functions.iter().enumerate() {
            for n in &f.nodes {
                function_of.insert(*n, FunctionId(idx as u32));
            }
        }
        let mut leaving: FxHashMap<NodeId, Vec<Edge>> = FxHashMap::default();
        for e in edges {
            leaving.entry(e.from).or_default().push(e);
        }
        Cfa {
            functions,
            main,
            leaving,
            function_of,
            errors,
        }
    }

    #[inline]
    pub fn main(&self) -> FunctionId {
        self.main
    }

    #[inline]
    pub fn main_entry(&self) -> NodeId {
        self.function(self.main).entry
    }

    #[inline]
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> + '_ {
        self.functions
            .iter()
            .enumerate()
            .map(|(idx, f)| (FunctionId(idx as u32), f))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    #[inline]
    pub fn function_of(&self, node: NodeId) -> Option<FunctionId> {
        self.function_of.get(&node).copied()
    }

    #[inline]
    pub fn leaving_edges(&self, node: NodeId) -> &[Edge] {
        self.leaving.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges_between(&self, from: NodeId, to: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.leaving_edges(from).iter().filter(move |e| e.to == to)
    }

    #[inline]
    pub fn is_error(&self, node: NodeId) -> bool {
        self.errors.contains(&node)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EdgeKind::Ordinary(op) => write!(f, "{} -> {}: {}", self.from, self.to, op),
            EdgeKind::Call { callee, .. } => {
                write!(f, "{} -> {}: call #{}", self.from, self.to, callee.0)
            }
            EdgeKind::Return { callee } => {
                write!(f, "{} -> {}: return #{}", self.from, self.to, callee.0)
            }
        }
    }
}
