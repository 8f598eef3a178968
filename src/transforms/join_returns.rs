use crate::{
    Result,
    ir::{BlockName, Scfg, kind},
};

/// Closes the graph over a unique exit block.
///
/// A well-formed input has exactly one head; that is checked first and a
/// graph with several entry blocks is rejected rather than unified. On the
/// exit side, a [`SyntheticReturn`](crate::SyntheticKind::Return) block is
/// chained behind all exiting blocks unless the graph already has a unique
/// exit distinct from its head. A graph with no exiting block at all (every
/// path loops forever) is left alone; the loop pass gives such loops their
/// structure.
pub fn join_returns(scfg: &mut Scfg) -> Result<()> {
    let head = scfg.find_head()?;
    let mut exiting: Vec<BlockName> = scfg
        .blocks()
        .filter(|block| block.is_exiting())
        .map(|block| block.name().clone())
        .collect();
    exiting.sort();
    match exiting.as_slice() {
        [] => {
            log::debug!(target: "scfg::join-returns", "graph has no exiting block; leaving it open");
            Ok(())
        }
        // A unique exit needs no synthetic return, unless the exit is the
        // head itself: a closed graph enters and leaves at distinct blocks.
        [single] if *single != head => Ok(()),
        _ => {
            let name = scfg.new_block_name(kind::SYNTH_RETURN);
            log::debug!(
                target: "scfg::join-returns",
                "joining {} exiting block(s) into {name}",
                exiting.len(),
            );
            scfg.insert_synthetic_return(name, &exiting)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{Block, BlockKind, Error, SyntheticKind};

    #[test]
    fn single_block_graph_gains_a_return() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a")).unwrap();
        join_returns(&mut scfg).unwrap();
        assert_eq!(scfg["a"].jump_targets(), ["synth_return_0"]);
        assert!(scfg["synth_return_0"].is_exiting());
        assert_eq!(
            scfg["synth_return_0"].kind(),
            &BlockKind::Synthetic(SyntheticKind::Return)
        );
    }

    #[test]
    fn unique_exit_is_left_alone() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        scfg.add_block(Block::basic("b")).unwrap();
        join_returns(&mut scfg).unwrap();
        assert_eq!(scfg.len(), 2);
    }

    #[test]
    fn multiple_exits_are_joined() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["b", "c"])).unwrap();
        scfg.add_block(Block::basic("b")).unwrap();
        scfg.add_block(Block::basic("c")).unwrap();
        join_returns(&mut scfg).unwrap();
        assert_eq!(scfg["b"].jump_targets(), ["synth_return_0"]);
        assert_eq!(scfg["c"].jump_targets(), ["synth_return_0"]);
        let head = scfg.find_head().unwrap();
        assert_eq!(head, "a");
    }

    #[test]
    fn multiple_heads_are_rejected() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("a").with_jump_targets(["c"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["c"])).unwrap();
        scfg.add_block(Block::basic("c")).unwrap();
        let err = join_returns(&mut scfg).unwrap_err();
        assert!(matches!(err, Error::MultipleHeads(_)));
    }

    #[test]
    fn exitless_graph_is_left_open() {
        let mut scfg = Scfg::new();
        scfg.add_block(Block::basic("entry").with_jump_targets(["a"])).unwrap();
        scfg.add_block(Block::basic("a").with_jump_targets(["b"])).unwrap();
        scfg.add_block(Block::basic("b").with_jump_targets(["a"])).unwrap();
        join_returns(&mut scfg).unwrap();
        assert_eq!(scfg.len(), 3);
    }
}
