use crate::ir::BlockName;

/// Errors surfaced by graph construction, analysis, and restructuring.
///
/// The variants fall into three categories:
///
/// * Malformed input — the graph handed to the engine is not well-formed
///   ([`DuplicateBlock`](Error::DuplicateBlock),
///   [`UnknownBlock`](Error::UnknownBlock),
///   [`UndefinedTarget`](Error::UndefinedTarget), [`NoHead`](Error::NoHead),
///   [`MultipleHeads`](Error::MultipleHeads),
///   [`NotASuccessor`](Error::NotASuccessor),
///   [`MalformedBlock`](Error::MalformedBlock), [`Yaml`](Error::Yaml)).
/// * Invariant violations — a transformation produced a graph that breaks the
///   single-entry/single-exit discipline; this indicates a bug in the engine
///   or a graph mutated behind its back
///   ([`InvariantViolation`](Error::InvariantViolation)).
/// * Unreachable blocks — dead blocks are preserved by transformations but
///   flagged by the reachability analysis
///   ([`UnreachableBlock`](Error::UnreachableBlock)).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A block with this name is already present in the graph.
    #[error("duplicate block name `{0}`")]
    DuplicateBlock(BlockName),
    /// The named block is not present in the graph.
    #[error("unknown block name `{0}`")]
    UnknownBlock(BlockName),
    /// A block references a successor that is not defined anywhere visible.
    #[error("block `{from}` references undefined block `{target}`")]
    UndefinedTarget { from: BlockName, target: BlockName },
    /// No block without predecessors exists.
    #[error("expected exactly one head block, found none")]
    NoHead,
    /// More than one block without predecessors exists.
    #[error("expected exactly one head block, found {}", DisplayNames(.0))]
    MultipleHeads(Vec<BlockName>),
    /// A backedge was declared on a name that is not a successor of the block.
    #[error("`{target}` is not a successor of block `{block}`")]
    NotASuccessor { block: BlockName, target: BlockName },
    /// A structural invariant did not hold after a transformation step.
    #[error("structural invariant violated: {0}")]
    InvariantViolation(String),
    /// The named block is not reachable from the graph head.
    #[error("block `{0}` is unreachable from the head")]
    UnreachableBlock(BlockName),
    /// A serialized block could not be interpreted.
    #[error("malformed block `{name}`: {reason}")]
    MalformedBlock { name: String, reason: String },
    /// The YAML text could not be parsed at all.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation(reason.into())
    }
}

struct DisplayNames<'a>(&'a [BlockName]);

impl core::fmt::Display for DisplayNames<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("[")?;
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "`{name}`")?;
        }
        f.write_str("]")
    }
}
