//! The textual external interface: a line-oriented YAML form and its
//! in-memory dict equivalent.
//!
//! A graph serializes to a mapping from block name to block dict, sorted by
//! name. Each block dict carries the variant tag under `type`, the ordered
//! successor list under `jt`, the backedge subset under `be` (omitted when
//! empty), and the variant payload under dedicated keys (`begin`/`end`,
//! `stmts`, `asgn`, `var`/`table`, `header`/`exiting`/`sub`). Serialization
//! is deterministic, so equal graphs render byte-identical text, and every
//! well-formed graph round-trips: `from_yaml(to_yaml(g)) == g`.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    Error, FxHashSet, Result,
    ir::{
        Block, BlockKind, BlockName, BranchDispatch, DispatchKind, Payload, RegionBlock,
        RegionKind, Scfg, SyntheticKind, VariableAssignment,
    },
};

/// The in-memory serialized form of a graph: block dicts keyed and sorted by
/// block name.
pub type GraphDict = BTreeMap<String, BlockDict>;

/// The serialized form of a single block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDict {
    /// Variant tag: `basic`, `synth_return`, `synth_exiting_latch`,
    /// `loop_region`, ...
    #[serde(rename = "type")]
    pub ty: String,
    /// Ordered successor names, backedges included.
    pub jt: Vec<String>,
    /// The subset of `jt` marked as backedges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub be: Vec<String>,
    /// Bytecode payload range `[begin, end)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
    /// Statement payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stmts: Option<Vec<String>>,
    /// Control variable assignments of a `synth_assign` block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asgn: Option<IndexMap<String, i64>>,
    /// Control variable read by a dispatching block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    /// Value table of a dispatching block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<IndexMap<i64, String>>,
    /// Header of a region block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Exiting block of a region block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exiting: Option<String>,
    /// Subregion of a region block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<GraphDict>,
}

impl Scfg {
    /// Parses the YAML form produced by [`to_yaml`](Self::to_yaml).
    pub fn from_yaml(text: &str) -> Result<Self> {
        let dict: GraphDict = serde_yaml::from_str(text)?;
        Self::from_dict(&dict)
    }

    /// Renders the graph as YAML, sorted by block name.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_dict())?)
    }

    /// Builds a graph from its dict form, validating closure: every
    /// referenced name must resolve within its own level or an enclosing one,
    /// and backedges must be a subset of the jump targets.
    pub fn from_dict(dict: &GraphDict) -> Result<Self> {
        let scfg = Scfg::new();
        from_dict_level(dict, scfg, &FxHashSet::default())
    }

    /// The in-memory equivalent of [`to_yaml`](Self::to_yaml).
    pub fn to_dict(&self) -> GraphDict {
        self.blocks()
            .map(|block| (block.name().to_string(), block_to_dict(block)))
            .collect()
    }
}

fn from_dict_level<'a>(
    dict: &'a GraphDict,
    mut scfg: Scfg,
    ambient: &FxHashSet<&'a str>,
) -> Result<Scfg> {
    let mut visible: FxHashSet<&str> = ambient.clone();
    visible.extend(dict.keys().map(String::as_str));
    for (name, block_dict) in dict {
        for target in block_dict.jt.iter().chain(&block_dict.be) {
            if !visible.contains(target.as_str()) {
                return Err(Error::UndefinedTarget {
                    from: BlockName::from(name.as_str()),
                    target: BlockName::from(target.as_str()),
                });
            }
        }
        for backedge in &block_dict.be {
            if !block_dict.jt.contains(backedge) {
                return Err(Error::MalformedBlock {
                    name: name.clone(),
                    reason: format!("backedge `{backedge}` is not a jump target"),
                });
            }
        }
        let kind = kind_from_dict(name, block_dict, &scfg, &visible)?;
        let block = Block::new(name.as_str(), kind)
            .with_jump_targets(block_dict.jt.iter().map(String::as_str))
            .with_backedges(block_dict.be.iter().map(String::as_str));
        scfg.add_block(block)?;
    }
    Ok(scfg)
}

fn kind_from_dict<'a>(
    name: &str,
    dict: &'a BlockDict,
    scfg: &Scfg,
    visible: &FxHashSet<&'a str>,
) -> Result<BlockKind> {
    let malformed = |reason: &str| Error::MalformedBlock {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let kind = match dict.ty.as_str() {
        "basic" => BlockKind::Basic(match (dict.begin, dict.end, &dict.stmts) {
            (Some(begin), Some(end), None) => Payload::Bytecode { begin, end },
            (None, None, Some(stmts)) => Payload::Statements(stmts.clone()),
            (None, None, None) => Payload::Empty,
            _ => return Err(malformed("inconsistent payload keys")),
        }),
        "synth_exit" => BlockKind::Synthetic(SyntheticKind::Exit),
        "synth_return" => BlockKind::Synthetic(SyntheticKind::Return),
        "synth_tail" => BlockKind::Synthetic(SyntheticKind::Tail),
        "synth_fill" => BlockKind::Synthetic(SyntheticKind::Fill),
        "synth_assign" => {
            let asgn = dict.asgn.as_ref().ok_or_else(|| malformed("missing `asgn`"))?;
            BlockKind::Assignment(VariableAssignment::new(
                asgn.iter()
                    .map(|(variable, value)| (BlockName::from(variable.as_str()), *value))
                    .collect(),
            ))
        }
        tag @ ("synth_head" | "synth_exiting_latch" | "synth_exit_branch") => {
            let variable = dict.var.as_ref().ok_or_else(|| malformed("missing `var`"))?;
            let table = dict.table.as_ref().ok_or_else(|| malformed("missing `table`"))?;
            BlockKind::Branch(BranchDispatch {
                kind: match tag {
                    "synth_head" => DispatchKind::Head,
                    "synth_exiting_latch" => DispatchKind::ExitingLatch,
                    _ => DispatchKind::ExitBranch,
                },
                variable: BlockName::from(variable.as_str()),
                value_table: table
                    .iter()
                    .map(|(value, target)| (*value, BlockName::from(target.as_str())))
                    .collect(),
            })
        }
        tag @ ("loop_region" | "branch_region" | "meta_region") => {
            let header = dict.header.as_ref().ok_or_else(|| malformed("missing `header`"))?;
            let exiting = dict.exiting.as_ref().ok_or_else(|| malformed("missing `exiting`"))?;
            let sub = dict.sub.as_ref().ok_or_else(|| malformed("missing `sub`"))?;
            if !sub.contains_key(header) {
                return Err(malformed("header is not part of the subregion"));
            }
            if !sub.contains_key(exiting) {
                return Err(malformed("exiting block is not part of the subregion"));
            }
            let subregion = from_dict_level(
                sub,
                Scfg::with_name_generator(scfg.name_generator()),
                visible,
            )?;
            BlockKind::Region(RegionBlock {
                kind: match tag {
                    "loop_region" => RegionKind::Loop,
                    "branch_region" => RegionKind::Branch,
                    _ => RegionKind::Meta,
                },
                header: BlockName::from(header.as_str()),
                exiting: BlockName::from(exiting.as_str()),
                subregion,
            })
        }
        other => return Err(malformed(&format!("unknown block type `{other}`"))),
    };
    Ok(kind)
}

fn block_to_dict(block: &Block) -> BlockDict {
    let mut dict = BlockDict {
        ty: block.kind().type_tag().to_string(),
        jt: block.jump_targets().iter().map(BlockName::to_string).collect(),
        be: block.backedges().iter().map(BlockName::to_string).collect(),
        ..Default::default()
    };
    match block.kind() {
        BlockKind::Basic(Payload::Empty) | BlockKind::Synthetic(_) => {}
        BlockKind::Basic(Payload::Bytecode { begin, end }) => {
            dict.begin = Some(*begin);
            dict.end = Some(*end);
        }
        BlockKind::Basic(Payload::Statements(stmts)) => {
            dict.stmts = Some(stmts.clone());
        }
        BlockKind::Assignment(assignment) => {
            dict.asgn = Some(
                assignment
                    .assignments
                    .iter()
                    .map(|(variable, value)| (variable.to_string(), *value))
                    .collect(),
            );
        }
        BlockKind::Branch(dispatch) => {
            dict.var = Some(dispatch.variable.to_string());
            dict.table = Some(
                dispatch
                    .value_table
                    .iter()
                    .map(|(value, target)| (*value, target.to_string()))
                    .collect(),
            );
        }
        BlockKind::Region(region) => {
            dict.header = Some(region.header.to_string());
            dict.exiting = Some(region.exiting.to_string());
            dict.sub = Some(region.subregion.to_dict());
        }
    }
    dict
}
