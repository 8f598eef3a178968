//! Restructuring of arbitrary control flow graphs into *structured* control
//! flow graphs, after the algorithm described in _Perfect Reconstructability
//! of Control Flow from Demand Dependence Graphs_, by Bahmann, Reismann,
//! Jahre, and Meyer. 2015. See <https://doi.org/10.1145/2693261>.
//!
//! A control flow graph is handed to the engine as an [`Scfg`]: a mapping from
//! unique block names to [`Block`]s, each carrying an ordered list of
//! successor names. The engine reshapes the graph so that every loop has a
//! single header and a single exiting latch, and every branch construct is a
//! single-entry, single-exit region, inserting synthetic blocks where the
//! input lacks the required structure. Irreducible control flow (loops with
//! multiple entries, branches with crossing arms) is handled by dispatching on
//! synthetic *control variables* assigned along the rerouted edges.
//!
//! The three passes, applied in order by [`Scfg::restructure`]:
//!
//! 1. [`join_returns`](transforms::join_returns) closes the graph over a
//!    unique exit block.
//! 2. [`restructure_loop`](transforms::restructure_loop) rewrites every
//!    strongly connected component into a loop region with a single header
//!    and a single exiting latch carrying the only backedge.
//! 3. [`restructure_branch`](transforms::restructure_branch) wraps every
//!    branching construct of the remaining acyclic skeleton into a
//!    single-entry, single-exit branch region.
//!
//! Blocks are opaque to the engine: it never inspects a block's payload, only
//! its name and successor edges. The engine is single-threaded, purely
//! computational, and deterministic — equal inputs restructure to equal
//! graphs, byte-identical under [`Scfg::to_yaml`].

pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type FxHashSet<K> = rustc_hash::FxHashSet<K>;

pub mod analysis;
mod errors;
pub mod ir;
mod serialize;
pub mod transforms;

pub use self::{
    errors::Error,
    ir::{
        Block, BlockKind, BlockName, BranchDispatch, DispatchKind, NameGenerator, Payload,
        RegionBlock, RegionKind, Scfg, SyntheticKind, VariableAssignment,
    },
    serialize::{BlockDict, GraphDict},
};

/// Convenience alias for results produced by this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
