use smallvec::SmallVec;

use super::{BlockName, Scfg};
use crate::{Error, Result};

/// Ordered successor list of a block.
///
/// Two inline slots cover the overwhelmingly common cases (fallthrough and
/// two-way branch) without spilling to the heap.
pub type JumpTargets = SmallVec<[BlockName; 2]>;

/// A basic block: an opaque unit of control flow identified by a unique name,
/// with an ordered list of successors.
///
/// Blocks are values. Structural edits do not mutate a block in place; they
/// consume it and return a replacement record (see
/// [`replace_jump_targets`](Block::replace_jump_targets) and
/// [`replace_backedge`](Block::replace_backedge)), which the owning [`Scfg`]
/// swaps in wholesale. The order of `jump_targets` is semantic — for a
/// two-way block the first entry is the taken branch — and is preserved
/// through every transformation.
///
/// A subset of the successors may be marked as *backedges* of an enclosing
/// loop. The *effective* successors, traversed when computing forward
/// structure, are the jump targets minus the backedges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    name: BlockName,
    jump_targets: JumpTargets,
    backedges: JumpTargets,
    kind: BlockKind,
}

impl Block {
    pub fn new(name: impl Into<BlockName>, kind: BlockKind) -> Self {
        Self {
            name: name.into(),
            jump_targets: Default::default(),
            backedges: Default::default(),
            kind,
        }
    }

    /// Creates a payload block with no payload contents.
    pub fn basic(name: impl Into<BlockName>) -> Self {
        Self::new(name, BlockKind::Basic(Payload::Empty))
    }

    pub fn with_jump_targets<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<BlockName>,
    {
        self.jump_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_backedges<I>(mut self, backedges: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<BlockName>,
    {
        self.backedges = backedges.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn name(&self) -> &BlockName {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    /// The full, ordered successor list, backedges included.
    #[inline]
    pub fn jump_targets(&self) -> &[BlockName] {
        &self.jump_targets
    }

    /// The successors marked as backedges of an enclosing loop.
    #[inline]
    pub fn backedges(&self) -> &[BlockName] {
        &self.backedges
    }

    /// The successors traversed when computing forward structure: the jump
    /// targets that are not marked as backedges, in declared order.
    pub fn effective_jump_targets(&self) -> impl Iterator<Item = &BlockName> {
        self.jump_targets.iter().filter(|t| !self.backedges.contains(t))
    }

    pub fn is_backedge(&self, target: &BlockName) -> bool {
        self.backedges.contains(target)
    }

    /// A block is exiting when it has no effective successor.
    pub fn is_exiting(&self) -> bool {
        self.effective_jump_targets().next().is_none()
    }

    /// A block is a fallthrough when it has exactly one effective successor.
    pub fn is_fallthrough(&self) -> bool {
        self.effective_jump_targets().count() == 1
    }

    /// Returns a copy of this block with the given successor list.
    ///
    /// Backedges are carried over; a backedge whose target is dropped from the
    /// successor list is dropped with it. For a dispatching block whose new
    /// list replaces targets position by position, the value table follows
    /// the rewrite so dispatch values keep selecting the same arm.
    pub fn replace_jump_targets<I>(mut self, targets: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<BlockName>,
    {
        let new_targets: JumpTargets = targets.into_iter().map(Into::into).collect();
        if let BlockKind::Branch(dispatch) = &mut self.kind {
            if new_targets.len() == self.jump_targets.len() {
                for (old, new) in self.jump_targets.iter().zip(new_targets.iter()) {
                    if old == new {
                        continue;
                    }
                    for (_, target) in dispatch.value_table.iter_mut() {
                        if target == old {
                            *target = new.clone();
                        }
                    }
                }
            }
        }
        self.jump_targets = new_targets;
        self.backedges.retain(|be| self.jump_targets.contains(be));
        self
    }

    /// Returns a copy of this block with `target` marked as a backedge.
    ///
    /// `target` must already be one of the block's jump targets.
    pub fn replace_backedge(mut self, target: &BlockName) -> Result<Self> {
        if !self.jump_targets.contains(target) {
            return Err(Error::NotASuccessor {
                block: self.name,
                target: target.clone(),
            });
        }
        if !self.backedges.contains(target) {
            self.backedges.push(target.clone());
        }
        Ok(self)
    }

    #[inline]
    pub fn is_region(&self) -> bool {
        matches!(self.kind, BlockKind::Region(_))
    }

    pub fn as_region(&self) -> Option<&RegionBlock> {
        match &self.kind {
            BlockKind::Region(region) => Some(region),
            _ => None,
        }
    }

    pub fn as_region_mut(&mut self) -> Option<&mut RegionBlock> {
        match &mut self.kind {
            BlockKind::Region(region) => Some(region),
            _ => None,
        }
    }

    pub(crate) fn rename_target(&mut self, from: &BlockName, to: &BlockName) {
        for target in self.jump_targets.iter_mut() {
            if target == from {
                *target = to.clone();
            }
        }
        for target in self.backedges.iter_mut() {
            if target == from {
                *target = to.clone();
            }
        }
        if let BlockKind::Branch(dispatch) = &mut self.kind {
            for (_, target) in dispatch.value_table.iter_mut() {
                if target == from {
                    *target = to.clone();
                }
            }
        }
    }
}

/// The variants a block can take, discriminated by tag.
///
/// Common fields (name, jump targets, backedges) live on [`Block`]; the kind
/// carries only variant-specific payload. Downstream consumers dispatch on
/// the tag and must not rely on anything beyond it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// An ordinary block whose body is opaque to the engine.
    Basic(Payload),
    /// An engine-inserted block with no payload, distinguished by its
    /// structural role.
    Synthetic(SyntheticKind),
    /// An engine-inserted block carrying control variable assignments that
    /// take effect when control enters it.
    Assignment(VariableAssignment),
    /// An engine-inserted block that reads a control variable and selects one
    /// of its successors accordingly.
    Branch(BranchDispatch),
    /// A single node wrapping a restructured subgraph.
    Region(RegionBlock),
}

impl BlockKind {
    /// The serialized `type` tag of this variant.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Basic(_) => "basic",
            Self::Synthetic(SyntheticKind::Exit) => "synth_exit",
            Self::Synthetic(SyntheticKind::Return) => "synth_return",
            Self::Synthetic(SyntheticKind::Tail) => "synth_tail",
            Self::Synthetic(SyntheticKind::Fill) => "synth_fill",
            Self::Assignment(_) => "synth_assign",
            Self::Branch(dispatch) => match dispatch.kind {
                DispatchKind::Head => "synth_head",
                DispatchKind::ExitingLatch => "synth_exiting_latch",
                DispatchKind::ExitBranch => "synth_exit_branch",
            },
            Self::Region(region) => match region.kind {
                RegionKind::Loop => "loop_region",
                RegionKind::Branch => "branch_region",
                RegionKind::Meta => "meta_region",
            },
        }
    }
}

/// The opaque payload of a [`BlockKind::Basic`] block.
///
/// Payloads exist so front ends can attach their material to blocks and
/// recover it after restructuring; the engine never inspects the contents.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Payload {
    #[default]
    Empty,
    /// A half-open range `[begin, end)` of bytecode offsets.
    Bytecode { begin: u32, end: u32 },
    /// An ordered list of opaque statements.
    Statements(Vec<String>),
}

/// Structural roles of plain synthetic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKind {
    /// Merges several exits of a fragment in front of its continuation.
    Exit,
    /// The unique exit installed by `join_returns`.
    Return,
    /// Merges the exiting blocks of a branch construct's arms.
    Tail,
    /// The body of an otherwise empty branch arm.
    Fill,
}

/// Ordered control variable assignments executed on entry to a
/// [`BlockKind::Assignment`] block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VariableAssignment {
    pub assignments: Vec<(BlockName, i64)>,
}

impl VariableAssignment {
    pub fn new(assignments: Vec<(BlockName, i64)>) -> Self {
        Self { assignments }
    }
}

/// The dispatch table of a [`BlockKind::Branch`] block.
///
/// When control reaches the block, the value of `variable` is looked up in
/// `value_table` and control transfers to the associated successor. Every
/// successor named in the table also appears in the block's jump targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDispatch {
    pub kind: DispatchKind,
    pub variable: BlockName,
    pub value_table: Vec<(i64, BlockName)>,
}

/// The structural position of a dispatching block.
///
/// All three dispatch on a control variable, but downstream consumers key on
/// where the block sits, so the distinction is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// The unified header of a loop that originally had several entries.
    Head,
    /// The unique exiting latch of a loop: decides between iterating (the
    /// backedge to the header) and leaving.
    ExitingLatch,
    /// A pure exit dispatcher, selecting among several continuations.
    ExitBranch,
}

/// A block wrapping a restructured fragment.
///
/// The region owns its `subregion`; the interior names are not present in the
/// parent graph, and the parent refers to the fragment only through the
/// region block's own name. `header` names the unique interior entry block
/// and `exiting` the unique interior block from which control leaves; the
/// region's external successors (its own jump targets) are the external
/// successors of `exiting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionBlock {
    pub kind: RegionKind,
    pub header: BlockName,
    pub exiting: BlockName,
    pub subregion: Scfg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Loop,
    Branch,
    Meta,
}

impl RegionKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Loop => super::kind::LOOP,
            Self::Branch => super::kind::BRANCH,
            Self::Meta => super::kind::META,
        }
    }
}
