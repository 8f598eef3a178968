use std::{
    cell::RefCell,
    collections::{BTreeSet, VecDeque},
    rc::Rc,
};

use indexmap::IndexMap;

use super::{
    Block, BlockKind, BlockName, NameGenerator, RegionBlock, RegionKind,
    block::{BranchDispatch, DispatchKind, SyntheticKind, VariableAssignment},
    kind,
};
use crate::{Error, FxHashSet, Result};

/// A control flow graph: a mapping from unique block names to blocks, plus
/// the generator used to mint names for synthetic blocks.
///
/// The mapping owns its blocks; a [`RegionBlock`](super::RegionBlock) in turn
/// owns the graph of its interior, so a restructured graph forms a tree of
/// `Scfg` levels with no cross-level name collisions and no child-to-parent
/// references.
///
/// The name generator is shared (via [`Rc`]) between a graph and every
/// subregion split off from it, so synthetic names stay unique across the
/// whole region tree. Cloning a graph shares the generator as well: blocks
/// minted through either copy never collide.
#[derive(Debug, Clone)]
pub struct Scfg {
    blocks: IndexMap<BlockName, Block>,
    name_gen: Rc<RefCell<NameGenerator>>,
}

impl Default for Scfg {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Scfg {
    fn eq(&self, other: &Self) -> bool {
        // Name generator state is bookkeeping, not graph structure.
        self.blocks == other.blocks
    }
}

impl Eq for Scfg {}

impl Scfg {
    pub fn new() -> Self {
        Self {
            blocks: IndexMap::new(),
            name_gen: Rc::new(RefCell::new(NameGenerator::new())),
        }
    }

    /// Creates an empty graph sharing `name_gen`, used when splitting a
    /// subregion off an existing graph.
    pub fn with_name_generator(name_gen: Rc<RefCell<NameGenerator>>) -> Self {
        Self {
            blocks: IndexMap::new(),
            name_gen,
        }
    }

    /// A handle to the shared name generator.
    pub fn name_generator(&self) -> Rc<RefCell<NameGenerator>> {
        Rc::clone(&self.name_gen)
    }

    pub fn new_block_name(&self, kind: &str) -> BlockName {
        self.name_gen.borrow_mut().new_block_name(kind)
    }

    pub fn new_region_name(&self, kind: &str) -> BlockName {
        self.name_gen.borrow_mut().new_region_name(kind)
    }

    pub fn new_var_name(&self, kind: &str) -> BlockName {
        self.name_gen.borrow_mut().new_var_name(kind)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Block> {
        self.blocks.get_mut(name)
    }

    /// All blocks at this level, in insertion order. Does not descend into
    /// subregions; see [`iter`](Self::iter) for structured traversal.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// All block names at this level, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &BlockName> {
        self.blocks.keys()
    }

    /// Inserts a block. Fails if a block with the same name is already
    /// present.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        if self.contains(block.name().as_str()) {
            return Err(Error::DuplicateBlock(block.name().clone()));
        }
        self.blocks.insert(block.name().clone(), block);
        Ok(())
    }

    /// Replaces an existing block with a new record of the same name.
    pub fn replace_block(&mut self, block: Block) -> Result<()> {
        if !self.contains(block.name().as_str()) {
            return Err(Error::UnknownBlock(block.name().clone()));
        }
        self.blocks.insert(block.name().clone(), block);
        Ok(())
    }

    /// Removes the named blocks. Callers must have retargeted any incoming
    /// edges first; references to removed names are not rewritten.
    pub fn remove_blocks<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a BlockName>,
    {
        for name in names {
            self.blocks.shift_remove(name.as_str());
        }
    }

    /// Yields the names of this graph in breadth-first order from the head,
    /// descending into every region block (the region's own name first, then
    /// its interior, then the traversal resumes). Unreachable blocks are not
    /// yielded.
    pub fn iter(&self) -> impl Iterator<Item = &BlockName> {
        let mut order = Vec::with_capacity(self.len());
        self.visit_bfs(&mut order, true);
        order.into_iter()
    }

    /// Yields the names of this graph in breadth-first order from the head,
    /// treating every region block as a single node. This is the traversal
    /// renderers use to draw one node per region, descending on demand.
    pub fn concealed_region_view(&self) -> impl Iterator<Item = &BlockName> {
        let mut order = Vec::with_capacity(self.len());
        self.visit_bfs(&mut order, false);
        order.into_iter()
    }

    fn visit_bfs<'a>(&'a self, order: &mut Vec<&'a BlockName>, descend: bool) {
        let Some((head, _)) = self.blocks.iter().find(|(name, _)| !self.has_predecessor(name))
        else {
            return;
        };
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::new();
        queue.push_back(head);
        seen.insert(head);
        while let Some(name) = queue.pop_front() {
            order.push(name);
            let block = &self.blocks[name.as_str()];
            if descend {
                if let Some(region) = block.as_region() {
                    region.subregion.visit_bfs(order, descend);
                }
            }
            for target in block.effective_jump_targets() {
                if let Some((key, _)) = self.blocks.get_key_value(target.as_str()) {
                    if seen.insert(key) {
                        queue.push_back(key);
                    }
                }
            }
        }
    }

    fn has_predecessor(&self, name: &BlockName) -> bool {
        self.blocks
            .values()
            .any(|block| block.effective_jump_targets().any(|t| t == name))
    }
}

/// Structural insertion primitives.
impl Scfg {
    /// Inserts a new block of the given kind between `predecessors` and
    /// `successors`.
    ///
    /// The block's jump targets are `successors` in the given order. Every
    /// occurrence of a successor in a predecessor's jump targets is replaced
    /// by the new name, preserving position and non-matching entries; a
    /// backedge to a successor is redirected the same way. When `successors`
    /// is empty the new name is appended to each predecessor's targets
    /// instead, which is how a fresh exit is chained behind existing exiting
    /// blocks.
    pub fn insert_block(
        &mut self,
        new_name: BlockName,
        predecessors: &[BlockName],
        successors: &[BlockName],
        kind: BlockKind,
    ) -> Result<()> {
        let block = Block::new(new_name.clone(), kind).with_jump_targets(successors.iter().cloned());
        self.add_block(block)?;
        for pred in predecessors {
            let block = self
                .blocks
                .get(pred.as_str())
                .ok_or_else(|| Error::UnknownBlock(pred.clone()))?
                .clone();
            let mut targets: Vec<BlockName> = block.jump_targets().to_vec();
            if successors.is_empty() {
                targets.push(new_name.clone());
            } else {
                for target in targets.iter_mut() {
                    if successors.contains(target) {
                        *target = new_name.clone();
                    }
                }
            }
            let backedges: Vec<BlockName> = block
                .backedges()
                .iter()
                .map(|be| {
                    if successors.contains(be) {
                        new_name.clone()
                    } else {
                        be.clone()
                    }
                })
                .collect();
            let block = block.replace_jump_targets(targets).with_backedges(backedges);
            self.replace_block(block)?;
        }
        Ok(())
    }

    /// Inserts a dispatching block between `predecessors` and `successors`,
    /// routing every rewritten edge through a fresh
    /// [`Assignment`](BlockKind::Assignment) block.
    ///
    /// Each predecessor edge into the successor set is replaced by an edge to
    /// a synthetic assignment block that sets a fresh control variable to a
    /// value identifying the original target, and continues to `new_name`.
    /// The new block dispatches on that variable: its value table maps each
    /// assigned value back to the successor the rewritten edge used to take.
    ///
    /// Returns the control variable and the names of the assignment blocks
    /// created along the way; callers that wrap the rewritten fragment into a
    /// region need both.
    pub fn insert_block_and_control_blocks(
        &mut self,
        new_name: BlockName,
        predecessors: &[BlockName],
        successors: &[BlockName],
        dispatch: DispatchKind,
    ) -> Result<ControlBlocks> {
        let variable = self.new_var_name(kind::CONTROL_VAR);
        let mut assignment_blocks = Vec::new();
        let mut value_table = Vec::new();
        let mut next_value = 0i64;
        for pred in predecessors {
            let block = self
                .blocks
                .get(pred.as_str())
                .ok_or_else(|| Error::UnknownBlock(pred.clone()))?
                .clone();
            let mut targets: Vec<BlockName> = block.jump_targets().to_vec();
            for target in targets.iter_mut() {
                if !successors.contains(target) {
                    continue;
                }
                let assign_name = self.new_block_name(kind::SYNTH_ASSIGN);
                log::trace!(
                    target: "scfg::insert",
                    "routing edge {pred} -> {target} through {assign_name} ({variable} = {next_value})"
                );
                let assign = Block::new(
                    assign_name.clone(),
                    BlockKind::Assignment(VariableAssignment::new(vec![(
                        variable.clone(),
                        next_value,
                    )])),
                )
                .with_jump_targets([new_name.clone()]);
                self.add_block(assign)?;
                assignment_blocks.push(assign_name.clone());
                value_table.push((next_value, target.clone()));
                next_value += 1;
                *target = assign_name;
            }
            let backedges: Vec<BlockName> = block
                .backedges()
                .iter()
                .map(|be| {
                    if successors.contains(be) {
                        new_name.clone()
                    } else {
                        be.clone()
                    }
                })
                .collect();
            let block = block.replace_jump_targets(targets).with_backedges(backedges);
            self.replace_block(block)?;
        }
        let dispatcher = Block::new(
            new_name,
            BlockKind::Branch(BranchDispatch {
                kind: dispatch,
                variable: variable.clone(),
                value_table,
            }),
        )
        .with_jump_targets(successors.iter().cloned());
        self.add_block(dispatcher)?;
        Ok(ControlBlocks {
            variable,
            assignment_blocks,
        })
    }

    /// Inserts a [`SyntheticKind::Exit`] block merging `predecessors` in
    /// front of `successors`.
    pub fn insert_synthetic_exit(
        &mut self,
        new_name: BlockName,
        predecessors: &[BlockName],
        successors: &[BlockName],
    ) -> Result<()> {
        self.insert_block(
            new_name,
            predecessors,
            successors,
            BlockKind::Synthetic(SyntheticKind::Exit),
        )
    }

    /// Inserts a [`SyntheticKind::Tail`] block merging `predecessors` in
    /// front of `successors`.
    pub fn insert_synthetic_tail(
        &mut self,
        new_name: BlockName,
        predecessors: &[BlockName],
        successors: &[BlockName],
    ) -> Result<()> {
        self.insert_block(
            new_name,
            predecessors,
            successors,
            BlockKind::Synthetic(SyntheticKind::Tail),
        )
    }

    /// Inserts a [`SyntheticKind::Return`] block behind `predecessors`,
    /// becoming the unique exit of the graph.
    pub fn insert_synthetic_return(
        &mut self,
        new_name: BlockName,
        predecessors: &[BlockName],
    ) -> Result<()> {
        self.insert_block(
            new_name,
            predecessors,
            &[],
            BlockKind::Synthetic(SyntheticKind::Return),
        )
    }

    /// Inserts a [`SyntheticKind::Fill`] block as the body of an otherwise
    /// empty branch arm from `predecessor` to `successor`.
    ///
    /// Unlike [`insert_block`](Self::insert_block), only the given arm
    /// positions of the predecessor are rerouted, so a two-way branch whose
    /// other arm reaches `successor` indirectly keeps that arm intact.
    pub fn insert_synthetic_fill(
        &mut self,
        new_name: BlockName,
        predecessor: &BlockName,
        successor: &BlockName,
        arm_positions: &[usize],
    ) -> Result<()> {
        let fill = Block::new(new_name.clone(), BlockKind::Synthetic(SyntheticKind::Fill))
            .with_jump_targets([successor.clone()]);
        self.add_block(fill)?;
        let block = self
            .blocks
            .get(predecessor.as_str())
            .ok_or_else(|| Error::UnknownBlock(predecessor.clone()))?
            .clone();
        let mut targets: Vec<BlockName> = block.jump_targets().to_vec();
        for &position in arm_positions {
            let target = targets.get_mut(position).ok_or_else(|| {
                Error::invariant(format!(
                    "arm position {position} out of bounds for block `{predecessor}`"
                ))
            })?;
            if target != successor {
                return Err(Error::invariant(format!(
                    "arm {position} of block `{predecessor}` targets `{target}`, expected \
                     `{successor}`"
                )));
            }
            *target = new_name.clone();
        }
        self.replace_block(block.replace_jump_targets(targets))
    }
}

/// The artifacts of [`Scfg::insert_block_and_control_blocks`]: the fresh
/// control variable and the assignment blocks placed on the rewritten edges.
#[derive(Debug)]
pub struct ControlBlocks {
    pub variable: BlockName,
    pub assignment_blocks: Vec<BlockName>,
}

/// Region extraction.
impl Scfg {
    /// Moves `nodes` into a fresh subregion and replaces them in this graph
    /// with a single [`RegionBlock`] of the given kind.
    ///
    /// The node set must form a single-entry, single-exit fragment: exactly
    /// one member with a predecessor outside the set (the header) and exactly
    /// one member with a successor outside the set (the exiting block). The
    /// region block inherits the exiting block's external successors, and
    /// every remaining reference into the node set is rewritten to target the
    /// region block. Returns the region block's name.
    pub fn wrap_region(&mut self, nodes: &BTreeSet<BlockName>, kind: RegionKind) -> Result<BlockName> {
        let (headers, _) = self.find_headers_and_entries(nodes)?;
        let (mut exiting, _) = self.find_exiting_and_exits(nodes);
        if exiting.is_empty() {
            // A fragment with no external successors (an infinite loop, or a
            // fragment that swallowed the graph exit) leaves through its
            // final block instead.
            exiting = nodes
                .iter()
                .filter(|name| self.blocks[name.as_str()].is_exiting())
                .cloned()
                .collect();
        }
        let header = expect_single(&headers, || {
            format!("region {kind:?} must have exactly one header, found {headers:?}")
        })?;
        let exiting_block = expect_single(&exiting, || {
            format!("region {kind:?} must have exactly one exiting block, found {exiting:?}")
        })?;

        let region_name = self.new_region_name(kind.tag());
        log::debug!(
            target: "scfg::region",
            "wrapping {} block(s) into {region_name} (header {header}, exiting {exiting_block})",
            nodes.len(),
        );

        let external_successors: Vec<BlockName> = self.blocks[exiting_block.as_str()]
            .effective_jump_targets()
            .filter(|t| !nodes.contains(t.as_str()))
            .cloned()
            .collect();

        let mut subregion = Scfg::with_name_generator(self.name_generator());
        let interior: Vec<BlockName> = self
            .blocks
            .keys()
            .filter(|name| nodes.contains(name.as_str()))
            .cloned()
            .collect();
        for name in &interior {
            let block = self.blocks.shift_remove(name.as_str()).expect("interior block present");
            subregion.add_block(block)?;
        }

        let region = Block::new(
            region_name.clone(),
            BlockKind::Region(RegionBlock {
                kind,
                header: header.clone(),
                exiting: exiting_block.clone(),
                subregion,
            }),
        )
        .with_jump_targets(external_successors);
        self.add_block(region)?;

        // Any remaining edge into the extracted set now enters through the
        // region block.
        let referrers: Vec<BlockName> = self
            .blocks
            .iter()
            .filter(|(name, block)| {
                *name != &region_name
                    && block
                        .jump_targets()
                        .iter()
                        .any(|t| nodes.contains(t.as_str()))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in referrers {
            let block = self.blocks.get_mut(name.as_str()).expect("referrer present");
            for node in nodes {
                block.rename_target(node, &region_name);
            }
        }
        Ok(region_name)
    }
}

impl<'a> std::ops::Index<&'a str> for Scfg {
    type Output = Block;

    fn index(&self, name: &'a str) -> &Block {
        &self.blocks[name]
    }
}

impl<'a> std::ops::Index<&'a BlockName> for Scfg {
    type Output = Block;

    fn index(&self, name: &'a BlockName) -> &Block {
        &self.blocks[name.as_str()]
    }
}

fn expect_single<'a>(
    set: &'a BTreeSet<BlockName>,
    reason: impl FnOnce() -> String,
) -> Result<&'a BlockName> {
    let mut iter = set.iter();
    match (iter.next(), iter.next()) {
        (Some(single), None) => Ok(single),
        _ => Err(Error::invariant(reason())),
    }
}
