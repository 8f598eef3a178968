use std::collections::BTreeSet;

use super::for_each_subregion;
use crate::{
    Error, Result,
    ir::{
        Block, BlockKind, BlockName, BranchDispatch, DispatchKind, RegionKind, Scfg,
        VariableAssignment, kind,
    },
};

/// Restructures every loop of the graph into a [`RegionKind::Loop`] region
/// with a single header and a single exiting latch, recursing into nested
/// subregions.
///
/// Loops are the strongly connected components of the effective edge
/// relation: components of size two or more, and singletons that target
/// themselves. Each is normalized in place and then wrapped:
///
/// * Several headers are unified behind a dispatching
///   [`SyntheticHead`](DispatchKind::Head); every entry edge assigns a
///   control variable selecting the original header.
/// * Every latching or exiting edge is rerouted through an assignment block
///   into a single [`SyntheticExitingLatch`](DispatchKind::ExitingLatch),
///   which reads a dedicated loop-continuation variable to decide between
///   the backedge to the header and the way out.
/// * A loop with several distinct exit blocks leaves through a
///   [`SyntheticExitBranch`](DispatchKind::ExitBranch) placed after (outside)
///   the region, dispatching on the exit variable the assignment blocks set.
///
/// After the latch's backedge is marked, removing backedges leaves the level
/// acyclic, so a revisit of the wrapped region only discovers loops that are
/// still unstructured.
pub fn restructure_loop(scfg: &mut Scfg) -> Result<()> {
    let mut loops: Vec<BTreeSet<BlockName>> = scfg
        .compute_scc()
        .into_iter()
        .filter(|scc| is_loop(scfg, scc))
        .collect();
    loops.sort_by(|a, b| a.first().cmp(&b.first()));
    for mut lp in loops {
        log::debug!(target: "scfg::loops", "restructuring loop of {} block(s)", lp.len());
        restructure_one(scfg, &mut lp)?;
        scfg.wrap_region(&lp, RegionKind::Loop)?;
    }
    for_each_subregion(scfg, restructure_loop)
}

fn is_loop(scfg: &Scfg, scc: &BTreeSet<BlockName>) -> bool {
    if scc.len() > 1 {
        return true;
    }
    let name = scc.first().expect("non-empty component");
    scfg[name].effective_jump_targets().any(|t| t == name)
}

fn restructure_one(scfg: &mut Scfg, lp: &mut BTreeSet<BlockName>) -> Result<()> {
    let (headers, entries) = scfg.find_headers_and_entries(lp)?;
    let (exiting_blocks, exit_blocks) = scfg.find_exiting_and_exits(lp);
    if headers.is_empty() {
        return Err(Error::invariant(format!("loop {lp:?} has no header")));
    }

    let headers_sorted: Vec<BlockName> = headers.iter().cloned().collect();
    let entries_sorted: Vec<BlockName> = entries.iter().cloned().collect();

    let mut headers_were_unified = false;
    let mut header_variable = None;
    let mut header_value_table: Vec<(i64, BlockName)> = Vec::new();
    let loop_head = if headers.len() > 1 {
        if entries.is_empty() {
            return Err(Error::invariant(format!(
                "loop with headers {headers:?} is entered at the graph head and through an edge; \
                 such graphs cannot be unified"
            )));
        }
        headers_were_unified = true;
        let solo = scfg.new_block_name(kind::SYNTH_HEAD);
        let control = scfg.insert_block_and_control_blocks(
            solo.clone(),
            &entries_sorted,
            &headers_sorted,
            DispatchKind::Head,
        )?;
        let BlockKind::Branch(dispatch) = scfg[&solo].kind() else {
            unreachable!("insert_block_and_control_blocks produces a dispatcher");
        };
        header_value_table = dispatch.value_table.clone();
        header_variable = Some(control.variable);
        lp.insert(solo.clone());
        solo
    } else {
        headers_sorted[0].clone()
    };

    // Blocks latching back to a header from within the loop. The unified
    // head also targets the original headers, but those edges are the entry
    // dispatch, not latches.
    let backedge_blocks: Vec<BlockName> = lp
        .iter()
        .filter(|name| !(headers_were_unified && *name == &loop_head))
        .filter(|name| scfg[*name].jump_targets().iter().any(|t| headers.contains(t)))
        .cloned()
        .collect();

    // Already structured: one latch which is also the only exiting block.
    if !headers_were_unified
        && backedge_blocks.len() == 1
        && exiting_blocks.len() == 1
        && exit_blocks.len() <= 1
        && backedge_blocks[0] == *exiting_blocks.first().expect("one exiting block")
    {
        let latch = &backedge_blocks[0];
        log::trace!(target: "scfg::loops", "loop already structured; marking backedge {latch} -> {loop_head}");
        let block = scfg[latch].clone().replace_backedge(&loop_head)?;
        return scfg.replace_block(block);
    }

    let latch_name = scfg.new_block_name(kind::SYNTH_EXITING_LATCH);
    let needs_synth_exit = exit_blocks.len() > 1;
    let synth_exit_name = needs_synth_exit.then(|| scfg.new_block_name(kind::SYNTH_EXIT_BRANCH));

    let backedge_variable = scfg.new_var_name(kind::BACKEDGE_VAR);
    let exit_variable = needs_synth_exit.then(|| scfg.new_var_name(kind::EXIT_VAR));

    let exits_sorted: Vec<BlockName> = exit_blocks.iter().cloned().collect();
    let exit_value_table: Vec<(i64, BlockName)> = exits_sorted
        .iter()
        .enumerate()
        .map(|(value, name)| (value as i64, name.clone()))
        .collect();

    // Where the latch goes when the loop is left: the exit dispatcher when
    // several exits exist, the sole exit otherwise, nowhere for a loop that
    // never exits.
    let leave_target = synth_exit_name.clone().or_else(|| exits_sorted.first().cloned());

    // Reroute every latching and exiting edge through an assignment block
    // that records where control was headed, then fall into the latch.
    for name in lp.iter().cloned().collect::<Vec<_>>() {
        if headers_were_unified && name == loop_head {
            continue;
        }
        let block = scfg[&name].clone();
        if !block
            .jump_targets()
            .iter()
            .any(|t| headers.contains(t) || exit_blocks.contains(t))
        {
            continue;
        }
        let mut targets: Vec<BlockName> = block.jump_targets().to_vec();
        for target in targets.iter_mut() {
            let mut assignments = Vec::new();
            if exit_blocks.contains(target) {
                if let Some(exit_variable) = &exit_variable {
                    assignments.push((exit_variable.clone(), lookup(&exit_value_table, target)?));
                }
                assignments.push((backedge_variable.clone(), 0));
            } else if headers.contains(target) {
                assignments.push((backedge_variable.clone(), 1));
                if headers_were_unified {
                    let variable = header_variable.clone().expect("unified header variable");
                    assignments.push((variable, lookup(&header_value_table, target)?));
                }
            } else {
                continue;
            };
            let assign_name = scfg.new_block_name(kind::SYNTH_ASSIGN);
            log::trace!(
                target: "scfg::loops",
                "routing edge {name} -> {target} through {assign_name}"
            );
            let assign = Block::new(
                assign_name.clone(),
                BlockKind::Assignment(VariableAssignment::new(assignments)),
            )
            .with_jump_targets([latch_name.clone()]);
            scfg.add_block(assign)?;
            lp.insert(assign_name.clone());
            *target = assign_name;
        }
        scfg.replace_block(block.replace_jump_targets(targets))?;
    }

    // The latch: value 1 of the loop-continuation variable iterates, 0
    // leaves.
    let mut latch_targets = Vec::new();
    let mut backedge_value_table = Vec::new();
    if let Some(leave) = &leave_target {
        latch_targets.push(leave.clone());
        backedge_value_table.push((0, leave.clone()));
    }
    latch_targets.push(loop_head.clone());
    backedge_value_table.push((1, loop_head.clone()));
    let latch = Block::new(
        latch_name.clone(),
        BlockKind::Branch(BranchDispatch {
            kind: DispatchKind::ExitingLatch,
            variable: backedge_variable,
            value_table: backedge_value_table,
        }),
    )
    .with_jump_targets(latch_targets)
    .replace_backedge(&loop_head)?;
    scfg.add_block(latch)?;
    lp.insert(latch_name);

    // The exit dispatcher lives after the loop, outside the region; the
    // enclosing branch restructuring gives it a region of its own.
    if let (Some(exit_name), Some(exit_variable)) = (synth_exit_name, exit_variable) {
        let dispatcher = Block::new(
            exit_name,
            BlockKind::Branch(BranchDispatch {
                kind: DispatchKind::ExitBranch,
                variable: exit_variable,
                value_table: exit_value_table,
            }),
        )
        .with_jump_targets(exits_sorted);
        scfg.add_block(dispatcher)?;
    }

    Ok(())
}

fn lookup(table: &[(i64, BlockName)], target: &BlockName) -> Result<i64> {
    table
        .iter()
        .find(|(_, name)| name == target)
        .map(|(value, _)| *value)
        .ok_or_else(|| Error::invariant(format!("`{target}` has no dispatch value")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ir::RegionBlock;

    fn block(name: &str, targets: &[&str]) -> Block {
        Block::basic(name).with_jump_targets(targets.iter().copied())
    }

    fn single_region(scfg: &Scfg) -> (&Block, &RegionBlock) {
        let mut regions = scfg.blocks().filter(|b| b.is_region());
        let block = regions.next().expect("one region");
        assert!(regions.next().is_none(), "expected a single region");
        (block, block.as_region().expect("region"))
    }

    #[test]
    fn reducible_loop_is_wrapped_with_a_marked_backedge() {
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b"])).unwrap();
        scfg.add_block(block("b", &["c"])).unwrap();
        scfg.add_block(block("c", &["b", "d"])).unwrap();
        scfg.add_block(block("d", &[])).unwrap();
        restructure_loop(&mut scfg).unwrap();

        let (region_node, region) = single_region(&scfg);
        assert_eq!(region_node.name(), "loop_region_0");
        assert_eq!(region_node.jump_targets(), ["d"]);
        assert_eq!(region.kind, RegionKind::Loop);
        assert_eq!(region.header, "b");
        assert_eq!(region.exiting, "c");
        assert_eq!(scfg["a"].jump_targets(), ["loop_region_0"]);

        // The latch kept both targets, with the header edge marked as the
        // backedge; removing backedges leaves a DAG.
        let latch = &region.subregion["c"];
        assert_eq!(latch.jump_targets(), ["b", "d"]);
        assert_eq!(latch.backedges(), ["b"]);
        assert!(region.subregion.compute_scc().iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn self_loop_is_its_own_latch() {
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["b"])).unwrap();
        scfg.add_block(block("b", &["b", "c"])).unwrap();
        scfg.add_block(block("c", &[])).unwrap();
        restructure_loop(&mut scfg).unwrap();

        let (_, region) = single_region(&scfg);
        assert_eq!(region.header, "b");
        assert_eq!(region.exiting, "b");
        assert_eq!(region.subregion["b"].backedges(), ["b"]);
    }

    #[test]
    fn two_entry_loop_gains_a_dispatching_head() {
        // Bahmann fig. 3: the head branches into both members of the cycle.
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["p", "q"])).unwrap();
        scfg.add_block(block("p", &["q"])).unwrap();
        scfg.add_block(block("q", &["p", "x"])).unwrap();
        scfg.add_block(block("x", &[])).unwrap();
        restructure_loop(&mut scfg).unwrap();

        // The entry edges assign the header dispatch variable and converge
        // on the synthetic head inside the loop region.
        assert_eq!(
            scfg["a"].jump_targets(),
            ["synth_assign_0", "synth_assign_1"]
        );
        assert_eq!(scfg["synth_assign_0"].jump_targets(), ["loop_region_0"]);
        assert_eq!(scfg["synth_assign_1"].jump_targets(), ["loop_region_0"]);

        let (region_node, region) = single_region(&scfg);
        assert_eq!(region_node.jump_targets(), ["x"]);
        assert_eq!(region.header, "synth_head_0");
        assert_eq!(region.exiting, "synth_exiting_latch_0");

        let sub = &region.subregion;
        let BlockKind::Branch(head) = sub["synth_head_0"].kind() else {
            panic!("expected a dispatching head");
        };
        assert_eq!(head.kind, DispatchKind::Head);
        assert_eq!(head.variable, "control_var_0");
        assert_eq!(
            head.value_table,
            [(0, BlockName::from("p")), (1, BlockName::from("q"))]
        );

        // Both members latch through assignment blocks that set the
        // continuation variable and re-select their header.
        let latch = &sub["synth_exiting_latch_0"];
        assert_eq!(latch.jump_targets(), ["x", "synth_head_0"]);
        assert_eq!(latch.backedges(), ["synth_head_0"]);
        let BlockKind::Assignment(assign) = sub["synth_assign_2"].kind() else {
            panic!("expected an assignment");
        };
        assert_eq!(
            assign.assignments,
            [
                (BlockName::from("backedge_var_0"), 1),
                (BlockName::from("control_var_0"), 1),
            ]
        );
    }

    #[test]
    fn multi_exit_loop_leaves_through_an_exit_dispatcher() {
        // Bahmann fig. 4: two exiting blocks to two distinct continuations.
        let mut scfg = Scfg::new();
        scfg.add_block(block("a", &["l1"])).unwrap();
        scfg.add_block(block("l1", &["l2", "e1"])).unwrap();
        scfg.add_block(block("l2", &["l1", "e2"])).unwrap();
        scfg.add_block(block("e1", &["x"])).unwrap();
        scfg.add_block(block("e2", &["x"])).unwrap();
        scfg.add_block(block("x", &[])).unwrap();
        restructure_loop(&mut scfg).unwrap();

        let (region_node, region) = single_region(&scfg);
        assert_eq!(region_node.jump_targets(), ["synth_exit_branch_0"]);
        assert_eq!(region.header, "l1");
        assert_eq!(region.exiting, "synth_exiting_latch_0");

        let BlockKind::Branch(dispatch) = scfg["synth_exit_branch_0"].kind() else {
            panic!("expected the exit dispatcher");
        };
        assert_eq!(dispatch.kind, DispatchKind::ExitBranch);
        assert_eq!(dispatch.variable, "exit_var_0");
        assert_eq!(
            dispatch.value_table,
            [(0, BlockName::from("e1")), (1, BlockName::from("e2"))]
        );
        assert_eq!(scfg["synth_exit_branch_0"].jump_targets(), ["e1", "e2"]);

        // Exiting edges record which continuation they selected.
        let sub = &region.subregion;
        let BlockKind::Assignment(assign) = sub["synth_assign_0"].kind() else {
            panic!("expected an assignment");
        };
        assert_eq!(
            assign.assignments,
            [
                (BlockName::from("exit_var_0"), 0),
                (BlockName::from("backedge_var_0"), 0),
            ]
        );
    }

    #[test]
    fn nested_loops_are_restructured_inside_the_outer_region() {
        // while ... { while ... { } }
        let mut scfg = Scfg::new();
        scfg.add_block(block("entry", &["outer"])).unwrap();
        scfg.add_block(block("outer", &["inner", "done"])).unwrap();
        scfg.add_block(block("inner", &["inner_body"])).unwrap();
        scfg.add_block(block("inner_body", &["inner", "outer_latch"])).unwrap();
        scfg.add_block(block("outer_latch", &["outer", "done"])).unwrap();
        scfg.add_block(block("done", &[])).unwrap();
        restructure_loop(&mut scfg).unwrap();

        let (_, outer) = single_region(&scfg);
        assert_eq!(outer.header, "outer");
        let inner_node = outer
            .subregion
            .blocks()
            .find(|b| b.is_region())
            .expect("inner loop wrapped");
        let inner = inner_node.as_region().unwrap();
        assert_eq!(inner.kind, RegionKind::Loop);
        assert_eq!(inner.header, "inner");
        assert_eq!(inner.exiting, "inner_body");
        assert_eq!(inner.subregion["inner_body"].backedges(), ["inner"]);
    }

    #[test]
    fn infinite_loop_keeps_only_the_backedge() {
        let mut scfg = Scfg::new();
        scfg.add_block(block("entry", &["a"])).unwrap();
        scfg.add_block(block("a", &["b"])).unwrap();
        scfg.add_block(block("b", &["a"])).unwrap();
        restructure_loop(&mut scfg).unwrap();

        let (region_node, region) = single_region(&scfg);
        assert!(region_node.jump_targets().is_empty());
        assert_eq!(region.header, "a");
        // With no exit edge, the latch carries only the backedge.
        assert_eq!(region.exiting, "synth_exiting_latch_0");
        let latch = &region.subregion["synth_exiting_latch_0"];
        assert_eq!(latch.jump_targets(), ["a"]);
        assert_eq!(latch.backedges(), ["a"]);
        assert_eq!(region.subregion["b"].jump_targets(), ["synth_assign_0"]);
    }
}
