// SPDX-License-Identifier: BSD-3-Clause
//! Block partitioning.
//!
//! A block is a region of the program that is analyzed once per distinct
//! reduced entry and replayed at every other call site.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::cfa::{Cfa, FunctionId, NodeId};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(pub(crate) u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockKind {
    Function,
    Loop,
}

/// Declared loop region, taken over as a block as is.
#[derive(Clone, Debug)]
pub struct LoopRegion {
    pub name: String,
    pub entry: NodeId,
    pub nodes: BTreeSet<NodeId>,
    pub exits: BTreeSet<NodeId>,
}

/// Immutable once partitioning is done. Blocks compare by identity.
#[derive(Debug)]
pub struct Block {
    id: BlockId,
    name: String,
    kind: BlockKind,
    entry: NodeId,
    nodes: BTreeSet<NodeId>,
    return_nodes: BTreeSet<NodeId>,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Block {}

impl Block {
    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    #[inline]
    pub fn is_return_node(&self, node: NodeId) -> bool {
        self.return_nodes.contains(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn return_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.return_nodes.iter().copied()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Default)]
pub struct BlockPartitioning {
    blocks: Vec<Block>,
    by_call_node: FxHashMap<NodeId, BlockId>,
    by_return_node: FxHashMap<NodeId, BlockId>,
}

impl BlockPartitioning {
    /// Every function except `main` whose name matches `filter` becomes a
    /// block, followed by the declared loop regions.
    pub fn new(cfa: &Cfa, loops: &[LoopRegion], filter: Option<&Regex>) -> Self {
        let mut partitioning = BlockPartitioning::default();
        for (fid, function) in cfa.functions() {
            if fid == cfa.main() {
                continue;
            }
            if let Some(re) = filter {
                if !re.is_match(&function.name) {
                    continue;
                }
            }
            let mut nodes = BTreeSet::new();
            for callee in reachable_functions(cfa, fid) {
                nodes.extend(cfa.function(callee).nodes.iter().copied());
            }
            partitioning.push(
                function.name.clone(),
                BlockKind::Function,
                function.entry,
                nodes,
                BTreeSet::from([function.exit]),
            );
        }
        for l in loops {
            partitioning.push(
                l.name.clone(),
                BlockKind::Loop,
                l.entry,
                l.nodes.clone(),
                l.exits.clone(),
            );
        }
        tracing::debug!(blocks = partitioning.blocks.len(), "partitioned program");
        partitioning
    }

    fn push(
        &mut self,
        name: String,
        kind: BlockKind,
        entry: NodeId,
        nodes: BTreeSet<NodeId>,
        return_nodes: BTreeSet<NodeId>,
    ) {
        let id = BlockId(self.blocks.len() as u32);
        if self.by_call_node.contains_key(&entry) {
            tracing::warn!(%entry, block = name, "node already starts a block, ignoring");
            return;
        }
        self.by_call_node.insert(entry, id);
        for r in &return_nodes {
            self.by_return_node.entry(*r).or_insert(id);
        }
        self.blocks.push(Block {
            id,
            name,
            kind,
            entry,
            nodes,
            return_nodes,
        });
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter()
    }

    #[inline]
    pub fn is_call_node(&self, node: NodeId) -> bool {
        self.by_call_node.contains_key(&node)
    }

    pub fn block_for_call_node(&self, node: NodeId) -> Option<&Block> {
        self.by_call_node.get(&node).map(|id| self.block(*id))
    }

    pub fn block_for_return_node(&self, node: NodeId) -> Option<&Block> {
        self.by_return_node.get(&node).map(|id| self.block(*id))
    }

    pub fn block_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }
}

/// `f` and every function transitively callable from it.
fn reachable_functions(cfa: &Cfa, f: FunctionId) -> BTreeSet<FunctionId> {
    let mut seen = BTreeSet::from([f]);
    let mut todo = vec![f];
    while let Some(next) = todo.pop() {
        for callee in &cfa.function(next).callees {
            if seen.insert(*callee) {
                todo.push(*callee);
            }
        }
    }
    seen
}
