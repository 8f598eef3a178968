//! Graph analyses: head discovery, strongly connected components, boundary
//! sets of node subsets, reachability, and structural verification.
//!
//! Every analysis traverses *effective* edges only — jump targets that are
//! not marked as backedges — and converts sets to sequences by sorting on
//! name, so results are deterministic for equal graphs.

mod scc;

use std::collections::BTreeSet;

use crate::{
    Error, FxHashSet, Result,
    ir::{BlockName, Scfg},
};

pub use self::scc::StronglyConnectedComponents;

impl Scfg {
    /// Returns the unique block with no incoming effective edge.
    ///
    /// Requires graph closure; fails when no candidate or more than one
    /// candidate exists.
    pub fn find_head(&self) -> Result<BlockName> {
        let mut targeted: FxHashSet<&BlockName> = FxHashSet::default();
        for block in self.blocks() {
            targeted.extend(block.effective_jump_targets());
        }
        let mut candidates: Vec<BlockName> = self
            .names()
            .filter(|name| !targeted.contains(name))
            .cloned()
            .collect();
        candidates.sort();
        match candidates.len() {
            0 => Err(Error::NoHead),
            1 => Ok(candidates.pop().expect("one candidate")),
            _ => Err(Error::MultipleHeads(candidates)),
        }
    }

    /// Computes the strongly connected components of the graph over effective
    /// edges.
    ///
    /// The result is a sequence of sets in reverse topological order of the
    /// condensed graph; iteration within a set is sorted by name. An SCC of
    /// size two or more, or a singleton whose block targets itself, identifies
    /// a loop.
    pub fn compute_scc(&self) -> Vec<BTreeSet<BlockName>> {
        StronglyConnectedComponents::new(self, None).collect()
    }

    /// Computes the strongly connected components of the subgraph induced by
    /// `nodes`.
    pub fn compute_scc_subgraph(&self, nodes: &BTreeSet<BlockName>) -> Vec<BTreeSet<BlockName>> {
        StronglyConnectedComponents::new(self, Some(nodes)).collect()
    }

    /// For a node subset `S`, returns `(headers, entries)`: the members of
    /// `S` with at least one effective predecessor outside `S`, and the
    /// non-members with at least one effective edge into `S`.
    ///
    /// If no member of `S` has an outside predecessor but the graph head lies
    /// inside `S`, the head is the header: control enters the subset there
    /// without traversing any edge.
    pub fn find_headers_and_entries(
        &self,
        nodes: &BTreeSet<BlockName>,
    ) -> Result<(BTreeSet<BlockName>, BTreeSet<BlockName>)> {
        let mut headers = BTreeSet::new();
        let mut entries = BTreeSet::new();
        for block in self.blocks() {
            if nodes.contains(block.name()) {
                continue;
            }
            for target in block.effective_jump_targets() {
                if nodes.contains(target) {
                    headers.insert(target.clone());
                    entries.insert(block.name().clone());
                }
            }
        }
        if headers.is_empty() {
            let head = self.find_head()?;
            if nodes.contains(&head) {
                headers.insert(head);
            }
        }
        Ok((headers, entries))
    }

    /// For a node subset `S`, returns `(exiting, exits)`: the members of `S`
    /// with at least one effective successor outside `S`, and the successors
    /// themselves.
    ///
    /// Exits are collected by name whether or not they are present in this
    /// graph; inside a subregion the exiting block may name a successor that
    /// lives in the enclosing graph.
    pub fn find_exiting_and_exits(
        &self,
        nodes: &BTreeSet<BlockName>,
    ) -> (BTreeSet<BlockName>, BTreeSet<BlockName>) {
        let mut exiting = BTreeSet::new();
        let mut exits = BTreeSet::new();
        for name in nodes {
            let Some(block) = self.get(name.as_str()) else {
                continue;
            };
            for target in block.effective_jump_targets() {
                if !nodes.contains(target) {
                    exiting.insert(name.clone());
                    exits.insert(target.clone());
                }
            }
        }
        (exiting, exits)
    }

    /// Returns true when `to` can be reached from `from` by traversing one or
    /// more effective edges.
    pub fn is_reachable_dfs(&self, from: &BlockName, to: &BlockName) -> bool {
        let Some(start) = self.get(from.as_str()) else {
            return false;
        };
        let mut seen = FxHashSet::default();
        let mut stack: Vec<&BlockName> = start.effective_jump_targets().collect();
        while let Some(name) = stack.pop() {
            if name == to {
                return true;
            }
            if !seen.insert(name) {
                continue;
            }
            if let Some(block) = self.get(name.as_str()) {
                stack.extend(block.effective_jump_targets());
            }
        }
        false
    }

    /// The set of blocks reachable from `start` (inclusive) over effective
    /// edges, never traversing into `stop`.
    ///
    /// Only names present in this graph are returned; references to blocks
    /// of an enclosing graph are boundary edges, not reachable blocks.
    pub(crate) fn reachable_from(
        &self,
        start: &BlockName,
        stop: Option<&BlockName>,
    ) -> BTreeSet<BlockName> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(name) = stack.pop() {
            if Some(&name) == stop || !self.contains(name.as_str()) {
                continue;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(block) = self.get(name.as_str()) {
                stack.extend(block.effective_jump_targets().cloned());
            }
        }
        seen
    }

    /// The blocks present in the graph but not reachable from the head.
    ///
    /// Transformations preserve unreachable blocks (dead code is not pruned);
    /// this analysis is how callers flag them.
    pub fn find_unreachable(&self) -> Result<BTreeSet<BlockName>> {
        let head = self.find_head()?;
        let reachable = self.reachable_from(&head, None);
        Ok(self
            .names()
            .filter(|name| !reachable.contains(*name))
            .cloned()
            .collect())
    }

    /// Fails with [`Error::UnreachableBlock`] if any block is unreachable
    /// from the head.
    pub fn verify_reachability(&self) -> Result<()> {
        match self.find_unreachable()?.into_iter().next() {
            None => Ok(()),
            Some(name) => Err(Error::UnreachableBlock(name)),
        }
    }

    /// Verifies the structural invariants of a (restructured) graph:
    ///
    /// * closure: every referenced name resolves within its level, or — for
    ///   names inside a subregion — within an enclosing level;
    /// * name uniqueness across the flattened region tree;
    /// * every region block names a header and exiting block that exist in
    ///   its subregion, the subregion's entry is the header, and its unique
    ///   exiting block is the exiting block.
    ///
    /// Called at the end of `restructure`; any failure indicates a bug in the
    /// transformation rather than bad input.
    pub fn verify(&self) -> Result<()> {
        let mut all_names = FxHashSet::default();
        self.verify_level(&FxHashSet::default(), &mut all_names)
    }

    fn verify_level<'a>(
        &'a self,
        ambient: &FxHashSet<&'a BlockName>,
        all_names: &mut FxHashSet<BlockName>,
    ) -> Result<()> {
        for name in self.names() {
            if !all_names.insert(name.clone()) {
                return Err(Error::invariant(format!(
                    "block name `{name}` appears in more than one region"
                )));
            }
        }
        for block in self.blocks() {
            for target in block.jump_targets() {
                if !self.contains(target.as_str()) && !ambient.contains(target) {
                    return Err(Error::UndefinedTarget {
                        from: block.name().clone(),
                        target: target.clone(),
                    });
                }
            }
            let Some(region) = block.as_region() else {
                continue;
            };
            let sub = &region.subregion;
            if !sub.contains(region.header.as_str()) {
                return Err(Error::invariant(format!(
                    "region `{}` header `{}` is not part of its subregion",
                    block.name(),
                    region.header
                )));
            }
            if !sub.contains(region.exiting.as_str()) {
                return Err(Error::invariant(format!(
                    "region `{}` exiting block `{}` is not part of its subregion",
                    block.name(),
                    region.exiting
                )));
            }
            let entry = sub.find_head()?;
            if entry != region.header {
                return Err(Error::invariant(format!(
                    "region `{}` enters at `{entry}`, expected header `{}`",
                    block.name(),
                    region.header
                )));
            }
            let level: BTreeSet<BlockName> = sub.names().cloned().collect();
            let (exiting, _) = sub.find_exiting_and_exits(&level);
            let exiting_or_final: BTreeSet<BlockName> = if exiting.is_empty() {
                sub.blocks()
                    .filter(|b| b.is_exiting())
                    .map(|b| b.name().clone())
                    .collect()
            } else {
                exiting
            };
            if exiting_or_final.len() != 1 || !exiting_or_final.contains(&region.exiting) {
                return Err(Error::invariant(format!(
                    "region `{}` must leave through `{}`, found {exiting_or_final:?}",
                    block.name(),
                    region.exiting
                )));
            }
            let mut sub_ambient: FxHashSet<&BlockName> = ambient.clone();
            sub_ambient.extend(self.names());
            sub.verify_level(&sub_ambient, all_names)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ir::Block;

    fn sample() -> Scfg {
        // a -> b -> c -> b (backedge candidate unmarked), c -> d
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["c"])).unwrap();
        scfg.add_block(Block::basic("c").with_jump_targets(["b", "d"])).unwrap();
        scfg.add_block(Block::basic("d")).unwrap();
        scfg
    }

    fn names(items: &[&str]) -> BTreeSet<BlockName> {
        items.iter().copied().map(BlockName::from).collect()
    }

    #[test]
    fn find_head_requires_a_unique_candidate() {
        let scfg = sample();
        assert_eq!(scfg.find_head().unwrap(), "a");

        let mut two_heads = sample();
        two_heads.add_block(Block::basic("z").with_jump_targets(["d"])).unwrap();
        assert!(matches!(two_heads.find_head(), Err(Error::MultipleHeads(_))));

        let mut headless = Scfg::new();
        headless.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        headless.add_block(Block::basic("b").with_jump_targets(["a"])).unwrap();
        assert!(matches!(headless.find_head(), Err(Error::NoHead)));
    }

    #[test]
    fn scc_identifies_the_loop() {
        let scfg = sample();
        let sccs = scfg.compute_scc();
        let loops: Vec<_> = sccs.iter().filter(|scc| scc.len() > 1).collect();
        assert_eq!(loops, [&names(&["b", "c"])]);
    }

    #[test]
    fn marked_backedges_break_the_cycle() {
        let mut scfg = sample();
        let latch = scfg["c"].clone().replace_backedge(&"b".into()).unwrap();
        scfg.replace_block(latch).unwrap();
        assert!(scfg.compute_scc().iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn boundary_sets_of_the_loop() {
        let scfg = sample();
        let lp = names(&["b", "c"]);
        let (headers, entries) = scfg.find_headers_and_entries(&lp).unwrap();
        assert_eq!(headers, names(&["b"]));
        assert_eq!(entries, names(&["a"]));
        let (exiting, exits) = scfg.find_exiting_and_exits(&lp);
        assert_eq!(exiting, names(&["c"]));
        assert_eq!(exits, names(&["d"]));
    }

    #[test]
    fn headers_fall_back_to_the_graph_head() {
        let scfg = sample();
        let subset = names(&["a", "b"]);
        // "b" has an outside predecessor ("c"), so the fallback is not used.
        let (headers, _) = scfg.find_headers_and_entries(&subset).unwrap();
        assert_eq!(headers, names(&["b"]));

        let whole: BTreeSet<BlockName> = scfg.names().cloned().collect();
        let (headers, entries) = scfg.find_headers_and_entries(&whole).unwrap();
        assert_eq!(headers, names(&["a"]));
        assert!(entries.is_empty());
    }

    #[test]
    fn reachability_follows_effective_edges_only() {
        let mut scfg = sample();
        assert!(scfg.is_reachable_dfs(&"a".into(), &"d".into()));
        assert!(scfg.is_reachable_dfs(&"c".into(), &"b".into()));
        let latch = scfg["c"].clone().replace_backedge(&"b".into()).unwrap();
        scfg.replace_block(latch).unwrap();
        assert!(!scfg.is_reachable_dfs(&"c".into(), &"b".into()));
    }

    #[test]
    fn unreachable_blocks_are_reported() {
        let mut scfg = sample();
        assert!(scfg.verify_reachability().is_ok());
        // A stranded cycle: both blocks have predecessors, so the head stays
        // unique, but neither is reachable from it.
        scfg.add_block(Block::basic("dead1").with_jump_targets(["dead2"])).unwrap();
        scfg.add_block(Block::basic("dead2").with_jump_targets(["dead1"])).unwrap();
        let unreachable = scfg.find_unreachable().unwrap();
        assert_eq!(unreachable, names(&["dead1", "dead2"]));
        assert!(matches!(
            scfg.verify_reachability(),
            Err(Error::UnreachableBlock(_))
        ));
    }

    #[test]
    fn closure_violations_are_detected() {
        let mut scfg = sample();
        scfg.replace_block(Block::basic("d").with_jump_targets(["nowhere"])).unwrap();
        assert!(matches!(scfg.verify(), Err(Error::UndefinedTarget { .. })));
    }
}
