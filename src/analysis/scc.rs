use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::{
    FxHashMap,
    ir::{BlockName, Scfg},
};

/// An iterator over the strongly connected components of an [`Scfg`], or of
/// the subgraph induced by a node subset.
///
/// This is an iterative Tarjan traversal: a DFS driven by an explicit visit
/// stack, with per-node visit numbers doubling as DFS flags, and a node stack
/// from which each complete component is popped. Components are yielded in
/// reverse topological order of the condensed graph.
///
/// Traversal follows effective successors only, in declared jump-target
/// order, and roots are taken in sorted name order, so the output is
/// deterministic for equal graphs.
pub struct StronglyConnectedComponents<'a> {
    graph: &'a Scfg,
    filter: Option<&'a BTreeSet<BlockName>>,
    /// Global visit counter.
    next_visit_num: usize,
    /// Per-node visit counters; `usize::MAX` marks a node already assigned to
    /// a component.
    visit_numbers: FxHashMap<&'a BlockName, usize>,
    /// Roots not yet visited, in sorted order.
    roots: Vec<&'a BlockName>,
    /// Stack holding the nodes of partially discovered components.
    node_stack: Vec<&'a BlockName>,
    /// DFS stack: the current node, its remaining children, and the minimum
    /// uplink value seen through it.
    visit_stack: Vec<StackElement<'a>>,
}

struct StackElement<'a> {
    node: &'a BlockName,
    children: SmallVec<[&'a BlockName; 2]>,
    next_child: usize,
    min_visited: usize,
}

impl<'a> StronglyConnectedComponents<'a> {
    pub fn new(graph: &'a Scfg, filter: Option<&'a BTreeSet<BlockName>>) -> Self {
        let mut roots: Vec<&'a BlockName> = match filter {
            Some(nodes) => graph.names().filter(|n| nodes.contains(*n)).collect(),
            None => graph.names().collect(),
        };
        roots.sort();
        // Popped back-to-front.
        roots.reverse();
        Self {
            graph,
            filter,
            next_visit_num: 0,
            visit_numbers: FxHashMap::default(),
            roots,
            node_stack: Vec::new(),
            visit_stack: Vec::new(),
        }
    }

    fn in_scope(&self, name: &BlockName) -> bool {
        self.graph.contains(name.as_str())
            && self.filter.is_none_or(|nodes| nodes.contains(name))
    }

    fn children_of(&self, node: &'a BlockName) -> SmallVec<[&'a BlockName; 2]> {
        let graph = self.graph;
        graph[node]
            .effective_jump_targets()
            .filter(|t| self.in_scope(t))
            .collect()
    }

    /// A single "visit" within the non-recursive DFS traversal.
    fn visit_one(&mut self, node: &'a BlockName) {
        let visit_num = self.next_visit_num;
        self.next_visit_num += 1;
        self.visit_numbers.insert(node, visit_num);
        self.node_stack.push(node);
        let children = self.children_of(node);
        self.visit_stack.push(StackElement {
            node,
            children,
            next_child: 0,
            min_visited: visit_num,
        });
    }

    /// Descends until the node on top of the visit stack has no unvisited
    /// children left.
    fn visit_children(&mut self) {
        loop {
            let top = self.visit_stack.last_mut().expect("visit stack not empty");
            let Some(child) = top.children.get(top.next_child).copied() else {
                return;
            };
            top.next_child += 1;
            match self.visit_numbers.get(child).copied() {
                None => self.visit_one(child),
                Some(child_num) => {
                    let top = self.visit_stack.last_mut().expect("visit stack not empty");
                    top.min_visited = top.min_visited.min(child_num);
                }
            }
        }
    }

    /// Resumes the DFS until the next complete component is on the node
    /// stack, and pops it.
    fn next_scc(&mut self) -> Option<BTreeSet<BlockName>> {
        loop {
            if self.visit_stack.is_empty() {
                let root = loop {
                    let candidate = self.roots.pop()?;
                    if !self.visit_numbers.contains_key(candidate) {
                        break candidate;
                    }
                };
                self.visit_one(root);
            }

            while !self.visit_stack.is_empty() {
                self.visit_children();

                let visiting = self.visit_stack.pop().expect("visit stack not empty");

                // Propagate the uplink so the parent can detect whether it
                // starts a component.
                if let Some(parent) = self.visit_stack.last_mut() {
                    parent.min_visited = parent.min_visited.min(visiting.min_visited);
                }

                if visiting.min_visited != self.visit_numbers[visiting.node] {
                    continue;
                }

                // A full component is on the node stack: everything from
                // `visiting.node` upwards.
                let mut scc = BTreeSet::new();
                loop {
                    let node = self.node_stack.pop().expect("component on node stack");
                    *self.visit_numbers.get_mut(node).expect("visited") = usize::MAX;
                    scc.insert(node.clone());
                    if node == visiting.node {
                        return Some(scc);
                    }
                }
            }
        }
    }
}

impl Iterator for StronglyConnectedComponents<'_> {
    type Item = BTreeSet<BlockName>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_scc()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ir::Block;

    fn names(items: &[&str]) -> BTreeSet<BlockName> {
        items.iter().copied().map(BlockName::from).collect()
    }

    #[test]
    fn acyclic_graph_yields_singletons() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b", "c"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["d"])).unwrap();
        scfg.add_block(Block::basic("c").with_jump_targets(["d"])).unwrap();
        scfg.add_block(Block::basic("d")).unwrap();
        let sccs = scfg.compute_scc();
        assert_eq!(sccs.len(), 4);
        assert!(sccs.iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn nested_cycles_collapse_into_one_component() {
        // a -> b -> c -> b, c -> d -> a: one big SCC {a, b, c, d} plus the
        // trailing exit.
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["c"])).unwrap();
        scfg.add_block(Block::basic("c").with_jump_targets(["b", "d"])).unwrap();
        scfg.add_block(Block::basic("d").with_jump_targets(["a", "e"])).unwrap();
        scfg.add_block(Block::basic("e")).unwrap();
        let sccs = scfg.compute_scc();
        let biggest = sccs.iter().max_by_key(|scc| scc.len()).unwrap();
        assert_eq!(biggest, &names(&["a", "b", "c", "d"]));
    }

    #[test]
    fn subgraph_restriction_cuts_outside_edges() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["c"])).unwrap();
        scfg.add_block(Block::basic("c").with_jump_targets(["b", "d"])).unwrap();
        scfg.add_block(Block::basic("d").with_jump_targets(["a"])).unwrap();
        let inner = names(&["b", "c"]);
        let sccs = scfg.compute_scc_subgraph(&inner);
        assert_eq!(sccs, [names(&["b", "c"])]);
    }

    #[test]
    fn self_loop_is_a_singleton_component() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["a", "b"])).unwrap();
        scfg.add_block(Block::basic("b")).unwrap();
        let sccs = scfg.compute_scc();
        assert!(sccs.contains(&names(&["a"])));
    }

    #[test]
    fn components_come_out_in_reverse_topological_order() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["c"])).unwrap();
        scfg.add_block(Block::basic("c")).unwrap();
        let sccs = scfg.compute_scc();
        assert_eq!(sccs, [names(&["c"]), names(&["b"]), names(&["a"])]);
    }
}
