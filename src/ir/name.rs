use core::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

use crate::FxHashMap;

/// Name kind tags used for the blocks, regions, and variables this crate
/// synthesizes. Front ends are free to use their own tags (e.g.
/// `python_bytecode`) for the payload blocks they create.
pub mod kind {
    pub const SYNTH_ASSIGN: &str = "synth_assign";
    pub const SYNTH_EXIT: &str = "synth_exit";
    pub const SYNTH_EXIT_BRANCH: &str = "synth_exit_branch";
    pub const SYNTH_EXITING_LATCH: &str = "synth_exiting_latch";
    pub const SYNTH_FILL: &str = "synth_fill";
    pub const SYNTH_HEAD: &str = "synth_head";
    pub const SYNTH_RETURN: &str = "synth_return";
    pub const SYNTH_TAIL: &str = "synth_tail";

    pub const LOOP: &str = "loop";
    pub const BRANCH: &str = "branch";
    pub const META: &str = "meta";

    pub const BACKEDGE_VAR: &str = "backedge";
    pub const CONTROL_VAR: &str = "control";
    pub const EXIT_VAR: &str = "exit";
}

/// A process-unique name identifying a block, region, or control variable.
///
/// Names are opaque identifiers; the engine orders and compares them but never
/// interprets their contents. Synthetic names produced by a [`NameGenerator`]
/// have the form `"<kind>_<n>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockName(String);

impl BlockName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for BlockName {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BlockName {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for BlockName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for BlockName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BlockName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Generator for unique, kind-stamped names.
///
/// Holds one monotonically increasing counter per kind tag. Counters start at
/// zero and advance in the order names are requested, which makes every
/// transformation reproducible: equal inputs yield equal synthetic names.
#[derive(Debug, Default, Clone)]
pub struct NameGenerator {
    counters: FxHashMap<String, usize>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `"<kind>_<n>"` for the next free `n` of this kind.
    pub fn new_block_name(&mut self, kind: &str) -> BlockName {
        BlockName(format!("{kind}_{}", self.next_index(kind)))
    }

    /// Returns `"<kind>_region_<n>"` for the next free `n` of this kind.
    pub fn new_region_name(&mut self, kind: &str) -> BlockName {
        BlockName(format!("{kind}_region_{}", self.next_index(kind)))
    }

    /// Returns `"<kind>_var_<n>"` for the next free `n` of this kind.
    pub fn new_var_name(&mut self, kind: &str) -> BlockName {
        BlockName(format!("{kind}_var_{}", self.next_index(kind)))
    }

    fn next_index(&mut self, kind: &str) -> usize {
        let counter = self.counters.entry(kind.to_string()).or_insert(0);
        let index = *counter;
        *counter += 1;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_kind_stamped_and_monotonic() {
        let mut names = NameGenerator::new();
        assert_eq!(names.new_block_name(kind::SYNTH_HEAD), "synth_head_0");
        assert_eq!(names.new_block_name(kind::SYNTH_HEAD), "synth_head_1");
        assert_eq!(names.new_block_name(kind::SYNTH_ASSIGN), "synth_assign_0");
        assert_eq!(names.new_block_name(kind::SYNTH_HEAD), "synth_head_2");
    }

    #[test]
    fn region_and_var_names_share_the_kind_counter() {
        let mut names = NameGenerator::new();
        assert_eq!(names.new_region_name(kind::LOOP), "loop_region_0");
        assert_eq!(names.new_region_name(kind::LOOP), "loop_region_1");
        assert_eq!(names.new_var_name(kind::BACKEDGE_VAR), "backedge_var_0");
        assert_eq!(names.new_var_name(kind::CONTROL_VAR), "control_var_0");
    }

    #[test]
    fn names_order_lexicographically() {
        let a = BlockName::from("a");
        let b = BlockName::from("b");
        assert!(a < b);
        assert_eq!(a.as_str(), "a");
    }
}
