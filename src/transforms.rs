//! The restructuring passes.
//!
//! [`join_returns`] closes the graph over a unique exit, [`restructure_loop`]
//! rewrites every strongly connected component into a single-header,
//! single-latch loop region, and [`restructure_branch`] wraps the remaining
//! acyclic branching constructs into single-entry, single-exit branch
//! regions. [`Scfg::restructure`] applies the three in order and verifies the
//! structural invariants of the result.

mod join_returns;
mod restructure_branch;
mod restructure_loop;

use std::collections::BTreeSet;

use crate::{
    Error, Result,
    ir::{BlockName, RegionBlock, Scfg},
};

pub use self::{
    join_returns::join_returns, restructure_branch::restructure_branch,
    restructure_loop::restructure_loop,
};

impl Scfg {
    /// Restructures the graph in place: closes it over a unique exit,
    /// restructures all loops, then all branch constructs, recursing into
    /// every region produced along the way.
    ///
    /// The result satisfies the structural invariants checked by
    /// [`verify`](Scfg::verify); a verification failure here indicates a bug
    /// in the engine and is surfaced rather than recovered from. Unreachable
    /// blocks are preserved as-is.
    pub fn restructure(&mut self) -> Result<()> {
        join_returns(self)?;
        restructure_loop(self)?;
        restructure_branch(self)?;
        self.verify()
    }
}

/// Runs `f` on the subregion of every region block at the top level of
/// `scfg`, refreshing the region's header/exiting names afterwards in case
/// `f` wrapped either of them into a nested region.
pub(crate) fn for_each_subregion<F>(scfg: &mut Scfg, mut f: F) -> Result<()>
where
    F: FnMut(&mut Scfg) -> Result<()>,
{
    let region_names: Vec<BlockName> = scfg
        .blocks()
        .filter(|block| block.is_region())
        .map(|block| block.name().clone())
        .collect();
    for name in region_names {
        let block = scfg.get_mut(name.as_str()).expect("region block present");
        let region = block.as_region_mut().expect("region block");
        f(&mut region.subregion)?;
        refresh_region_boundaries(region)?;
    }
    Ok(())
}

/// Recomputes a region's `header` and `exiting` from its subregion.
///
/// Wrapping a nested region inside the subregion may swallow the block the
/// parent recorded as header or exiting; after the rewrite, the entry block
/// of the subregion is the header and its unique exiting block (or, for a
/// subregion with no external successors, its unique final block) is the
/// exiting block.
fn refresh_region_boundaries(region: &mut RegionBlock) -> Result<()> {
    let sub = &region.subregion;
    region.header = sub.find_head()?;
    let level: BTreeSet<BlockName> = sub.names().cloned().collect();
    let (mut exiting, _) = sub.find_exiting_and_exits(&level);
    if exiting.is_empty() {
        exiting = sub
            .blocks()
            .filter(|b| b.is_exiting())
            .map(|b| b.name().clone())
            .collect();
    }
    if exiting.len() != 1 {
        return Err(Error::invariant(format!(
            "region with header `{}` must have exactly one exiting block, found {exiting:?}",
            region.header
        )));
    }
    region.exiting = exiting.pop_first().expect("one exiting block");
    Ok(())
}
