//! Deterministic replay of a trace into the schedule it describes.
//!
//! Replay interprets each instruction against the values produced by the
//! instructions before it, substituting bound decisions for sampled ones.
//! It is also the structural legality check used before a trace is scored:
//! a split whose factors do not multiply to the loop extent, an annotation on
//! a non-integer value, or a tiling sampled for the wrong loop all fail here.

use crate::error::TraceError;
use crate::factor::checked_product;
use crate::instruction::{AttrValue, Decision, Input, Instruction, InstructionKind};
use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value produced by an instruction during replay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Block { name: String },
    Loop { name: String, extent: i64 },
    Int(i64),
}

/// One resolved scheduling step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub kind: InstructionKind,
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<Value>,
}

/// The fully resolved schedule a trace reproduces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub steps: Vec<Step>,
}

impl Schedule {
    /// Integer values annotated under `key`, in step order.
    pub fn annotations(&self, key: &str) -> Vec<i64> {
        self.steps
            .iter()
            .filter(|step| step.kind == InstructionKind::Annotate)
            .filter(|step| matches!(step.attrs.get("key"), Some(AttrValue::Str(k)) if k == key))
            .filter_map(|step| match step.args.get(1) {
                Some(Value::Int(v)) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Extents of the loops produced by every split, in step order.
    pub fn split_factors(&self) -> Vec<Vec<i64>> {
        self.steps
            .iter()
            .filter(|step| step.kind == InstructionKind::Split)
            .map(|step| {
                step.results
                    .iter()
                    .filter_map(|v| match v {
                        Value::Loop { extent, .. } => Some(*extent),
                        _ => None,
                    })
                    .collect()
            })
            .collect()
    }

    /// Sampled compute locations, in step order.
    pub fn compute_locations(&self) -> Vec<i64> {
        self.steps
            .iter()
            .filter(|step| step.kind == InstructionKind::ComputeAt)
            .filter_map(|step| match step.args.get(2) {
                Some(Value::Int(v)) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

/// Replay `trace` with its bound decisions.
pub fn replay(trace: &Trace) -> Result<Schedule, TraceError> {
    let mut env: Vec<Vec<Value>> = Vec::with_capacity(trace.len());
    let mut steps = Vec::with_capacity(trace.len());

    for (index, inst) in trace.instructions().iter().enumerate() {
        let args = inst
            .inputs()
            .iter()
            .map(|input| resolve(&env, index, inst, input))
            .collect::<Result<Vec<_>, _>>()?;
        let results = apply(index, inst, &args)?;
        env.push(results.clone());
        steps.push(Step {
            kind: inst.kind(),
            args,
            attrs: inst.attrs().clone(),
            results,
        });
    }

    Ok(Schedule { steps })
}

fn resolve(
    env: &[Vec<Value>],
    index: usize,
    inst: &Instruction,
    input: &Input,
) -> Result<Value, TraceError> {
    match input {
        Input::Int(v) => Ok(Value::Int(*v)),
        Input::Output(r) => env
            .get(r.inst)
            .and_then(|outs| outs.get(r.index))
            .cloned()
            .ok_or(TraceError::DanglingInput {
                inst: index,
                kind: inst.kind(),
                input_inst: r.inst,
                input_index: r.index,
            }),
    }
}

fn apply(index: usize, inst: &Instruction, args: &[Value]) -> Result<Vec<Value>, TraceError> {
    let kind = inst.kind();
    let ill = |detail: String| TraceError::IllTyped {
        inst: index,
        kind,
        detail,
    };
    let loop_at = |i: usize| match args.get(i) {
        Some(Value::Loop { name, extent }) => Ok((name.as_str(), *extent)),
        other => Err(ill(format!("argument {i} must be a loop, got {other:?}"))),
    };
    let block_at = |i: usize| match args.get(i) {
        Some(Value::Block { name }) => Ok(name.as_str()),
        other => Err(ill(format!("argument {i} must be a block, got {other:?}"))),
    };
    let int_at = |i: usize| match args.get(i) {
        Some(Value::Int(v)) => Ok(*v),
        other => Err(ill(format!("argument {i} must be an integer, got {other:?}"))),
    };
    let decision = || {
        inst.decision().ok_or(TraceError::MissingDecision {
            inst: index,
            kind,
        })
    };

    match kind {
        InstructionKind::GetBlock => {
            let name = inst.attr_str("name").ok_or(TraceError::MissingAttr {
                inst: index,
                kind,
                attr: "name",
            })?;
            Ok(vec![Value::Block {
                name: name.to_string(),
            }])
        }
        InstructionKind::GetLoops => {
            let block = block_at(0)?;
            let extents = inst.attr_ints("extents").ok_or(TraceError::MissingAttr {
                inst: index,
                kind,
                attr: "extents",
            })?;
            Ok(extents
                .iter()
                .enumerate()
                .map(|(i, extent)| Value::Loop {
                    name: format!("{block}.l{i}"),
                    extent: *extent,
                })
                .collect())
        }
        InstructionKind::SamplePerfectTile => {
            let (_, extent) = loop_at(0)?;
            let tile = match decision()? {
                Decision::Tile(t) => t,
                Decision::Value(_) => return Err(ill("expected a tile decision".into())),
            };
            match checked_product(tile) {
                Some(product) if product == extent => {}
                Some(product) => {
                    return Err(ill(format!(
                        "tile {tile:?} covers {product}, loop extent is {extent}"
                    )))
                }
                None => return Err(ill(format!("tile {tile:?} overflows its product"))),
            }
            Ok(tile.iter().copied().map(Value::Int).collect())
        }
        InstructionKind::SampleCategorical => match decision()? {
            Decision::Value(v) => Ok(vec![Value::Int(*v)]),
            Decision::Tile(_) => Err(ill("expected a categorical decision".into())),
        },
        InstructionKind::SampleComputeLocation => {
            block_at(0)?;
            match decision()? {
                Decision::Value(v) => Ok(vec![Value::Int(*v)]),
                Decision::Tile(_) => Err(ill("expected a location decision".into())),
            }
        }
        InstructionKind::Split => {
            let (name, extent) = loop_at(0)?;
            let factors = (1..args.len()).map(int_at).collect::<Result<Vec<_>, _>>()?;
            if factors.iter().any(|f| *f < 1) {
                return Err(ill(format!("non-positive split factor in {factors:?}")));
            }
            match checked_product(&factors) {
                Some(product) if product == extent => {}
                Some(product) => {
                    return Err(ill(format!(
                        "factors {factors:?} cover {product}, loop `{name}` has extent {extent}"
                    )))
                }
                None => return Err(ill(format!("factors {factors:?} overflow their product"))),
            }
            Ok(factors
                .iter()
                .enumerate()
                .map(|(i, f)| Value::Loop {
                    name: format!("{name}.{i}"),
                    extent: *f,
                })
                .collect())
        }
        InstructionKind::Fuse => {
            let loops = (0..args.len()).map(loop_at).collect::<Result<Vec<_>, _>>()?;
            if loops.is_empty() {
                return Err(ill("fuse needs at least one loop".into()));
            }
            let name = loops.iter().map(|(n, _)| *n).collect::<Vec<_>>().join("+");
            let extents: Vec<i64> = loops.iter().map(|(_, e)| *e).collect();
            let extent = checked_product(&extents)
                .ok_or_else(|| ill(format!("fused extent of {extents:?} overflows")))?;
            Ok(vec![Value::Loop { name, extent }])
        }
        InstructionKind::Reorder => {
            let loops = (0..args.len()).map(loop_at).collect::<Result<Vec<_>, _>>()?;
            for (i, (name, _)) in loops.iter().enumerate() {
                if loops[..i].iter().any(|(other, _)| other == name) {
                    return Err(ill(format!("loop `{name}` appears twice")));
                }
            }
            Ok(Vec::new())
        }
        InstructionKind::Parallel | InstructionKind::Vectorize | InstructionKind::Unroll => {
            loop_at(0)?;
            Ok(Vec::new())
        }
        InstructionKind::ComputeAt => {
            block_at(0)?;
            block_at(1)?;
            let location = int_at(2)?;
            if location < -2 {
                return Err(ill(format!("invalid compute location {location}")));
            }
            Ok(Vec::new())
        }
        InstructionKind::Annotate => {
            match args.first() {
                Some(Value::Block { .. } | Value::Loop { .. }) => {}
                other => return Err(ill(format!("cannot annotate {other:?}"))),
            }
            int_at(1)?;
            Ok(Vec::new())
        }
    }
}
