//! Decision store: enumerate the sampled decisions of one kind in a trace.

use crate::instruction::{ann, Decision, Input, Instruction, InstructionKind};
use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which family of sampled decisions a mutator targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    /// `SampleCategorical` feeding an explicit or implicit unroll annotation.
    AutoUnroll,
    /// `SampleCategorical` feeding a parallel-extent annotation.
    Parallel,
    /// Every `SamplePerfectTile`.
    TileSize,
    /// Every `SampleComputeLocation`.
    ComputeLocation,
}

/// A sampled instruction together with its bound decision.
#[derive(Debug, Clone)]
pub struct DecisionSite<'a> {
    /// Position of the instruction in the trace.
    pub index: usize,
    pub instruction: &'a Arc<Instruction>,
    pub decision: &'a Decision,
}

/// All sites of `kind` in `trace`, in instruction order.
///
/// An empty result means no mutation of this kind applies; it is not an
/// error.
pub fn find_decision_sites(trace: &Trace, kind: SiteKind) -> Vec<DecisionSite<'_>> {
    let insts = trace.instructions();
    let annotated = match kind {
        SiteKind::AutoUnroll => {
            annotated_samples(trace, &[ann::UNROLL_EXPLICIT, ann::UNROLL_IMPLICIT])
        }
        SiteKind::Parallel => annotated_samples(trace, &[ann::PARALLEL]),
        SiteKind::TileSize | SiteKind::ComputeLocation => Vec::new(),
    };

    insts
        .iter()
        .enumerate()
        .filter(|(index, inst)| match kind {
            SiteKind::AutoUnroll | SiteKind::Parallel => {
                inst.kind() == InstructionKind::SampleCategorical && annotated[*index]
            }
            SiteKind::TileSize => inst.kind() == InstructionKind::SamplePerfectTile,
            SiteKind::ComputeLocation => inst.kind() == InstructionKind::SampleComputeLocation,
        })
        .filter_map(|(index, instruction)| {
            instruction.decision().map(|decision| DecisionSite {
                index,
                instruction,
                decision,
            })
        })
        .collect()
}

/// Marks instructions whose first output is the value of an annotation with
/// one of `keys`.
fn annotated_samples(trace: &Trace, keys: &[&str]) -> Vec<bool> {
    let mut marked = vec![false; trace.len()];
    for inst in trace.instructions() {
        if inst.kind() != InstructionKind::Annotate {
            continue;
        }
        let Some(key) = inst.attr_str("key") else {
            continue;
        };
        if !keys.contains(&key) {
            continue;
        }
        if let Some(Input::Output(value)) = inst.inputs().get(1) {
            if value.index == 0 {
                if let Some(slot) = marked.get_mut(value.inst) {
                    *slot = true;
                }
            }
        }
    }
    marked
}
