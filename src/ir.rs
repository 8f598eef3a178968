//! The graph data model: names, blocks, and the graph container.

mod block;
mod graph;
mod name;

pub use self::{
    block::{
        Block, BlockKind, BranchDispatch, DispatchKind, JumpTargets, Payload, RegionBlock,
        RegionKind, SyntheticKind, VariableAssignment,
    },
    graph::{ControlBlocks, Scfg},
    name::{BlockName, NameGenerator, kind},
};
