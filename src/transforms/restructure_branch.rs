use std::collections::BTreeSet;

use super::for_each_subregion;
use crate::{
    Error, FxHashMap, Result,
    ir::{BlockName, DispatchKind, RegionKind, Scfg, kind},
};

/// Wraps every branching construct of the (acyclic) effective-edge skeleton
/// into a [`RegionKind::Branch`] region, recursing into existing subregions
/// first so loop bodies are restructured before the level that contains them.
///
/// Branch heads — blocks with two or more distinct effective successors — are
/// processed bottom-up, deepest first, so an inner branch is already a single
/// region node by the time the branch enclosing it is wrapped. For each head:
///
/// * arms that are themselves the continuation get a
///   [`SyntheticFill`](crate::SyntheticKind::Fill) body;
/// * bodies exiting to more than one continuation are funneled through a
///   control-variable [`SyntheticExitBranch`](DispatchKind::ExitBranch),
///   which takes the continuation's place after the region;
/// * several exiting blocks are merged by a
///   [`SyntheticTail`](crate::SyntheticKind::Tail) in front of the
///   continuation, so the region leaves through exactly one block.
///
/// Freshly wrapped branch regions are final and are not re-entered; a
/// dispatcher synthesized for a multi-continuation repair lies strictly later
/// in topological order than its head, so the bottom-up sweep terminates.
pub fn restructure_branch(scfg: &mut Scfg) -> Result<()> {
    for_each_subregion(scfg, restructure_branch)?;
    // Generous bound: each iteration retires one branch head and synthesizes
    // at most one new dispatcher.
    let mut remaining = 2 * scfg.len() + 8;
    while let Some(head) = next_branch_head(scfg)? {
        if remaining == 0 {
            return Err(Error::invariant(
                "branch restructuring failed to converge".to_string(),
            ));
        }
        remaining -= 1;
        log::debug!(target: "scfg::branches", "restructuring branch construct at {head}");
        process_branch(scfg, head)?;
    }
    Ok(())
}

/// The deepest unwrapped branch head: the last block in topological order of
/// the effective edges with two or more distinct successors.
fn next_branch_head(scfg: &Scfg) -> Result<Option<BlockName>> {
    let order = topo_order(scfg)?;
    for name in order.iter().rev() {
        let succs = distinct_successors(scfg, name);
        if succs.len() < 2 {
            continue;
        }
        if succs.iter().any(|s| !scfg.contains(s.as_str())) {
            // The block dispatches to successors of an enclosing region;
            // only the parent level can give it structure.
            log::warn!(
                target: "scfg::branches",
                "skipping branch head {name} with region-external successors"
            );
            continue;
        }
        return Ok(Some(name.clone()));
    }
    Ok(None)
}

fn distinct_successors(scfg: &Scfg, name: &BlockName) -> Vec<BlockName> {
    let mut succs = Vec::new();
    for target in scfg[name].effective_jump_targets() {
        if !succs.contains(target) {
            succs.push(target.clone());
        }
    }
    succs
}

fn process_branch(scfg: &mut Scfg, head: BlockName) -> Result<()> {
    let succs = distinct_successors(scfg, &head);

    // The continuation is the join the arms converge on: the earliest block
    // reachable through every arm. Arms that leave the region without
    // converging are caught by the exit repairs below.
    let mut common: Option<BTreeSet<BlockName>> = None;
    for s in &succs {
        let reach = scfg.reachable_from(s, None);
        common = Some(match common {
            None => reach,
            Some(prev) => prev.intersection(&reach).cloned().collect(),
        });
    }
    let common = common.unwrap_or_default();
    let continuation = if common.is_empty() {
        None
    } else {
        Some(select_join(scfg, &common)?)
    };

    let mut interior: BTreeSet<BlockName> = BTreeSet::from([head.clone()]);

    // Empty arm repair: an arm that targets the continuation directly gets a
    // synthetic fill as its body.
    if let Some(t) = &continuation {
        let positions: Vec<usize> = scfg[&head]
            .jump_targets()
            .iter()
            .enumerate()
            .filter(|(_, target)| *target == t)
            .map(|(position, _)| position)
            .collect();
        if !positions.is_empty() {
            let fill = scfg.new_block_name(kind::SYNTH_FILL);
            log::trace!(target: "scfg::branches", "filling empty arm {head} -> {t} with {fill}");
            scfg.insert_synthetic_fill(fill.clone(), &head, t, &positions)?;
            interior.insert(fill);
        }
    }

    // The arm bodies: everything reachable from each arm entry short of the
    // continuation.
    for s in distinct_successors(scfg, &head) {
        interior.extend(scfg.reachable_from(&s, continuation.as_ref()));
    }

    let (_, exits) = scfg.find_exiting_and_exits(&interior);
    let continuation = match exits.len() {
        // The arms never leave the interior: the branch swallows the level's
        // final block, and a synthetic tail becomes the continuation.
        0 => {
            let terminal: Vec<BlockName> = interior
                .iter()
                .filter(|name| scfg[*name].is_exiting())
                .cloned()
                .collect();
            let tail = scfg.new_block_name(kind::SYNTH_TAIL);
            scfg.insert_synthetic_tail(tail.clone(), &terminal, &[])?;
            interior.insert(tail);
            None
        }
        1 => Some(exits.into_iter().next().expect("one exit")),
        // The bodies exit to several continuations: reroute every exiting
        // edge through a dispatcher that takes their place.
        _ => {
            let (exiting, _) = scfg.find_exiting_and_exits(&interior);
            let exiting_sorted: Vec<BlockName> = exiting.into_iter().collect();
            let exits_sorted: Vec<BlockName> = exits.into_iter().collect();
            let dispatcher = scfg.new_block_name(kind::SYNTH_EXIT_BRANCH);
            log::debug!(
                target: "scfg::branches",
                "merging {} continuation(s) of {head} behind {dispatcher}",
                exits_sorted.len(),
            );
            let control = scfg.insert_block_and_control_blocks(
                dispatcher.clone(),
                &exiting_sorted,
                &exits_sorted,
                DispatchKind::ExitBranch,
            )?;
            interior.extend(control.assignment_blocks);
            Some(dispatcher)
        }
    };

    // Single exit repair: when several interior blocks reach the
    // continuation, merge them behind a synthetic tail.
    if let Some(t) = &continuation {
        let (exiting, _) = scfg.find_exiting_and_exits(&interior);
        if exiting.len() > 1 {
            let exiting_sorted: Vec<BlockName> = exiting.into_iter().collect();
            let tail = scfg.new_block_name(kind::SYNTH_TAIL);
            scfg.insert_synthetic_tail(
                tail.clone(),
                &exiting_sorted,
                std::slice::from_ref(t),
            )?;
            interior.insert(tail);
        }
    }

    scfg.wrap_region(&interior, RegionKind::Branch)?;
    Ok(())
}

/// Picks the join block out of the arms' common reachable set: the member
/// that reaches all others (the earliest join), or failing that the member
/// reached from all others (the final join).
fn select_join(scfg: &Scfg, common: &BTreeSet<BlockName>) -> Result<BlockName> {
    if common.len() == 1 {
        return Ok(common.first().expect("non-empty").clone());
    }
    for candidate in common {
        if common
            .iter()
            .all(|other| other == candidate || scfg.is_reachable_dfs(candidate, other))
        {
            return Ok(candidate.clone());
        }
    }
    for candidate in common {
        if common
            .iter()
            .all(|other| other == candidate || scfg.is_reachable_dfs(other, candidate))
        {
            return Ok(candidate.clone());
        }
    }
    let fallback = common.first().expect("non-empty").clone();
    log::warn!(
        target: "scfg::branches",
        "no unique join among {common:?}; falling back to {fallback}"
    );
    Ok(fallback)
}

/// Topological order of the level over effective edges, smallest name first
/// among ready blocks. Fails if a cycle survived loop restructuring.
fn topo_order(scfg: &Scfg) -> Result<Vec<BlockName>> {
    let mut indegree: FxHashMap<&BlockName, usize> =
        scfg.names().map(|name| (name, 0)).collect();
    for block in scfg.blocks() {
        for target in block.effective_jump_targets() {
            if let Some(count) = indegree.get_mut(target) {
                *count += 1;
            }
        }
    }
    let mut ready: BTreeSet<&BlockName> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(scfg.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.clone());
        for target in scfg[name].effective_jump_targets() {
            if let Some(count) = indegree.get_mut(target) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(scfg[target].name());
                }
            }
        }
    }
    if order.len() != scfg.len() {
        return Err(Error::invariant(
            "cannot order branches: a cycle survived loop restructuring".to_string(),
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ir::{Block, BlockKind, RegionBlock, SyntheticKind};

    fn block(name: &str, targets: &[&str]) -> Block {
        Block::basic(name).with_jump_targets(targets.iter().copied())
    }

    fn single_region(scfg: &Scfg) -> (&Block, &RegionBlock) {
        let mut regions = scfg.blocks().filter(|b| b.is_region());
        let node = regions.next().expect("one region");
        assert!(regions.next().is_none(), "expected a single region");
        (node, node.as_region().expect("region"))
    }

    #[test]
    fn diamond_becomes_a_branch_region() {
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b", "c"])).unwrap();
        scfg.add_block(block("b", &["d"])).unwrap();
        scfg.add_block(block("c", &["d"])).unwrap();
        scfg.add_block(block("d", &[])).unwrap();
        restructure_branch(&mut scfg).unwrap();

        let (node, region) = single_region(&scfg);
        assert_eq!(node.name(), "branch_region_0");
        assert_eq!(node.jump_targets(), ["d"]);
        assert_eq!(region.kind, RegionKind::Branch);
        assert_eq!(region.header, "a");
        assert_eq!(region.exiting, "synth_tail_0");

        let sub = &region.subregion;
        assert_eq!(sub["b"].jump_targets(), ["synth_tail_0"]);
        assert_eq!(sub["c"].jump_targets(), ["synth_tail_0"]);
        assert_eq!(sub["synth_tail_0"].jump_targets(), ["d"]);
    }

    #[test]
    fn empty_arm_is_filled() {
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b", "c"])).unwrap();
        scfg.add_block(block("b", &["c"])).unwrap();
        scfg.add_block(block("c", &[])).unwrap();
        restructure_branch(&mut scfg).unwrap();

        let (node, region) = single_region(&scfg);
        assert_eq!(node.jump_targets(), ["c"]);
        assert_eq!(region.header, "a");

        let sub = &region.subregion;
        assert_eq!(sub["a"].jump_targets(), ["b", "synth_fill_0"]);
        assert_eq!(
            sub["synth_fill_0"].kind(),
            &BlockKind::Synthetic(SyntheticKind::Fill)
        );
        assert_eq!(sub["synth_fill_0"].jump_targets(), ["synth_tail_0"]);
        assert_eq!(sub["b"].jump_targets(), ["synth_tail_0"]);
        assert_eq!(sub["synth_tail_0"].jump_targets(), ["c"]);
    }

    #[test]
    fn nested_branches_wrap_bottom_up() {
        // a -> {b -> {d|e} -> f | c} -> g
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b", "c"])).unwrap();
        scfg.add_block(block("b", &["d", "e"])).unwrap();
        scfg.add_block(block("c", &["g"])).unwrap();
        scfg.add_block(block("d", &["f"])).unwrap();
        scfg.add_block(block("e", &["f"])).unwrap();
        scfg.add_block(block("f", &["g"])).unwrap();
        scfg.add_block(block("g", &[])).unwrap();
        restructure_branch(&mut scfg).unwrap();

        // The outer region contains the inner one as a single node.
        let (node, outer) = single_region(&scfg);
        assert_eq!(node.name(), "branch_region_1");
        assert_eq!(node.jump_targets(), ["g"]);
        assert_eq!(outer.header, "a");
        let inner_node = outer
            .subregion
            .blocks()
            .find(|b| b.is_region())
            .expect("inner branch region");
        assert_eq!(inner_node.name(), "branch_region_0");
        assert_eq!(inner_node.jump_targets(), ["f"]);
        let inner = inner_node.as_region().unwrap();
        assert_eq!(inner.header, "b");
        assert_eq!(inner.exiting, "synth_tail_0");
    }

    #[test]
    fn arms_with_distinct_continuations_get_an_exit_dispatcher() {
        // The arms of "a" leak to two different blocks of an enclosing
        // graph ("x" and "y" are boundary references, not part of this
        // level), so their exits are funneled through a dispatcher.
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b", "c"])).unwrap();
        scfg.add_block(block("b", &["x"])).unwrap();
        scfg.add_block(block("c", &["y"])).unwrap();
        restructure_branch(&mut scfg).unwrap();

        let dispatcher = &scfg["synth_exit_branch_0"];
        let BlockKind::Branch(dispatch) = dispatcher.kind() else {
            panic!("expected a dispatcher");
        };
        assert_eq!(dispatch.kind, DispatchKind::ExitBranch);
        assert_eq!(dispatcher.jump_targets(), ["x", "y"]);

        let (node, region) = single_region(&scfg);
        assert_eq!(node.jump_targets(), ["synth_exit_branch_0"]);
        let sub = &region.subregion;
        // Each arm records its continuation before falling into the tail.
        assert_eq!(sub["b"].jump_targets(), ["synth_assign_0"]);
        assert_eq!(sub["c"].jump_targets(), ["synth_assign_1"]);
        let BlockKind::Assignment(assign) = sub["synth_assign_0"].kind() else {
            panic!("expected an assignment");
        };
        assert_eq!(assign.assignments.len(), 1);
        assert_eq!(sub["synth_assign_0"].jump_targets(), ["synth_tail_0"]);
        assert_eq!(region.exiting, "synth_tail_0");
        assert_eq!(sub["synth_tail_0"].jump_targets(), ["synth_exit_branch_0"]);
    }

    #[test]
    fn straight_line_graphs_are_untouched() {
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b"])).unwrap();
        scfg.add_block(block("b", &["c"])).unwrap();
        scfg.add_block(block("c", &[])).unwrap();
        restructure_branch(&mut scfg).unwrap();
        assert_eq!(scfg.len(), 3);
        assert!(scfg.blocks().all(|b| !b.is_region()));
    }
}
