//! Copy-on-write schedule traces.

use crate::distribution::CandidateDistribution;
use crate::error::TraceError;
use crate::instruction::{
    AttrValue, Decision, Input, Instruction, InstructionKind, OutputRef, Support, TileSpace,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ordered, immutable record of scheduling instructions and their decisions.
///
/// Cloning a trace is a reference-count bump. Every sampled instruction has
/// exactly one bound decision inside its support; [`TraceBuilder`] and
/// [`Trace::with_decision`] are the only ways to produce a trace and both
/// enforce that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "Vec<Instruction>", try_from = "Vec<Instruction>")]
pub struct Trace {
    insts: Arc<[Arc<Instruction>]>,
}

impl Trace {
    pub fn empty() -> Self {
        Self {
            insts: Arc::from(Vec::new()),
        }
    }

    /// Validate and assemble a trace from a plain instruction list.
    pub fn from_instructions(insts: Vec<Instruction>) -> Result<Self, TraceError> {
        let mut builder = TraceBuilder::new();
        for inst in insts {
            builder.push(inst)?;
        }
        Ok(builder.build())
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn instructions(&self) -> &[Arc<Instruction>] {
        &self.insts
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Instruction>> {
        self.insts.get(index)
    }

    pub fn decision(&self, index: usize) -> Option<&Decision> {
        self.insts.get(index).and_then(|inst| inst.decision())
    }

    /// Bound decisions in instruction order.
    pub fn decisions(&self) -> impl Iterator<Item = (usize, &Decision)> + '_ {
        self.insts
            .iter()
            .enumerate()
            .filter_map(|(i, inst)| inst.decision().map(|d| (i, d)))
    }

    /// New trace with the decision at `index` replaced.
    ///
    /// Every other instruction is shared with `self`; `self` is untouched.
    pub fn with_decision(&self, index: usize, decision: Decision) -> Result<Self, TraceError> {
        let inst = self.insts.get(index).ok_or(TraceError::IndexOutOfRange {
            index,
            len: self.insts.len(),
        })?;
        if !inst.is_sampled() {
            return Err(TraceError::UnexpectedDecision {
                inst: index,
                kind: inst.kind(),
            });
        }
        let rebound = inst.rebind(decision);
        rebound.check_decision(index)?;

        let mut insts: Vec<Arc<Instruction>> = self.insts.iter().map(Arc::clone).collect();
        insts[index] = Arc::new(rebound);
        Ok(Self {
            insts: insts.into(),
        })
    }

    /// Whether both handles point at the same trace allocation.
    pub fn ptr_eq(&self, other: &Trace) -> bool {
        Arc::ptr_eq(&self.insts, &other.insts)
    }

    /// Whether instruction `index` is the same allocation in both traces.
    pub fn shares_instruction(&self, other: &Trace, index: usize) -> bool {
        match (self.insts.get(index), other.insts.get(index)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural hash over kinds, inputs, attributes and decisions.
    ///
    /// BLAKE3 over a fixed byte encoding, truncated to 64 bits, so the value
    /// is the same across processes and builds. Supports are fixed at
    /// instruction creation and are not hashed.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.insts.len() as u64).to_le_bytes());
        for inst in self.insts.iter() {
            hash_str(&mut hasher, inst.kind().name());
            hasher.update(&(inst.inputs().len() as u64).to_le_bytes());
            for input in inst.inputs() {
                match input {
                    Input::Output(r) => {
                        hasher.update(&[0]);
                        hasher.update(&(r.inst as u64).to_le_bytes());
                        hasher.update(&(r.index as u64).to_le_bytes());
                    }
                    Input::Int(v) => {
                        hasher.update(&[1]);
                        hasher.update(&v.to_le_bytes());
                    }
                }
            }
            hasher.update(&(inst.attrs().len() as u64).to_le_bytes());
            for (key, value) in inst.attrs() {
                hash_str(&mut hasher, key);
                match value {
                    AttrValue::Int(v) => {
                        hasher.update(&[0]);
                        hasher.update(&v.to_le_bytes());
                    }
                    AttrValue::Ints(vs) => {
                        hasher.update(&[1]);
                        hash_ints(&mut hasher, vs);
                    }
                    AttrValue::Str(v) => {
                        hasher.update(&[2]);
                        hash_str(&mut hasher, v);
                    }
                }
            }
            hasher.update(&(inst.num_outputs() as u64).to_le_bytes());
            match inst.decision() {
                None => {
                    hasher.update(&[0]);
                }
                Some(Decision::Value(v)) => {
                    hasher.update(&[1]);
                    hasher.update(&v.to_le_bytes());
                }
                Some(Decision::Tile(t)) => {
                    hasher.update(&[2]);
                    hash_ints(&mut hasher, t);
                }
            }
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.insts.len() == other.insts.len()
                && self
                    .insts
                    .iter()
                    .zip(other.insts.iter())
                    .all(|(a, b)| a == b))
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Trace> for Vec<Instruction> {
    fn from(trace: Trace) -> Self {
        trace.insts.iter().map(|inst| (**inst).clone()).collect()
    }
}

impl TryFrom<Vec<Instruction>> for Trace {
    type Error = TraceError;

    fn try_from(insts: Vec<Instruction>) -> Result<Self, Self::Error> {
        Self::from_instructions(insts)
    }
}

/// Appends validated instructions and freezes them into a [`Trace`].
#[derive(Debug, Default)]
pub struct TraceBuilder {
    insts: Vec<Arc<Instruction>>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self { insts: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Append an instruction, returning its position.
    pub fn push(&mut self, inst: Instruction) -> Result<usize, TraceError> {
        let index = self.insts.len();
        self.check_inputs(index, &inst)?;
        check_shape(index, &inst)?;
        inst.check_decision(index)?;
        self.insts.push(Arc::new(inst));
        Ok(index)
    }

    pub fn build(self) -> Trace {
        Trace {
            insts: self.insts.into(),
        }
    }

    pub fn get_block(&mut self, name: &str) -> Result<OutputRef, TraceError> {
        let inst =
            Instruction::new(InstructionKind::GetBlock, vec![], 1).with_attr("name", name);
        let index = self.push(inst)?;
        Ok(OutputRef { inst: index, index: 0 })
    }

    pub fn get_loops(
        &mut self,
        block: OutputRef,
        extents: &[i64],
    ) -> Result<Vec<OutputRef>, TraceError> {
        let inst = Instruction::new(
            InstructionKind::GetLoops,
            vec![Input::Output(block)],
            extents.len(),
        )
        .with_attr("extents", extents.to_vec());
        let index = self.push(inst)?;
        Ok(outputs(index, extents.len()))
    }

    pub fn sample_perfect_tile(
        &mut self,
        loop_ref: OutputRef,
        space: TileSpace,
        decision: Vec<i64>,
    ) -> Result<Vec<OutputRef>, TraceError> {
        let n = space.n;
        let inst = Instruction::new(
            InstructionKind::SamplePerfectTile,
            vec![Input::Output(loop_ref)],
            n,
        )
        .sampled(Support::PerfectTile(space), Decision::Tile(decision));
        let index = self.push(inst)?;
        Ok(outputs(index, n))
    }

    pub fn split(
        &mut self,
        loop_ref: OutputRef,
        factors: &[OutputRef],
    ) -> Result<Vec<OutputRef>, TraceError> {
        let mut inputs = vec![Input::Output(loop_ref)];
        inputs.extend(factors.iter().copied().map(Input::Output));
        let inst = Instruction::new(InstructionKind::Split, inputs, factors.len());
        let index = self.push(inst)?;
        Ok(outputs(index, factors.len()))
    }

    pub fn fuse(&mut self, loops: &[OutputRef]) -> Result<OutputRef, TraceError> {
        let inputs = loops.iter().copied().map(Input::Output).collect();
        let index = self.push(Instruction::new(InstructionKind::Fuse, inputs, 1))?;
        Ok(OutputRef { inst: index, index: 0 })
    }

    pub fn reorder(&mut self, loops: &[OutputRef]) -> Result<(), TraceError> {
        let inputs = loops.iter().copied().map(Input::Output).collect();
        self.push(Instruction::new(InstructionKind::Reorder, inputs, 0))?;
        Ok(())
    }

    pub fn parallel(&mut self, loop_ref: OutputRef) -> Result<(), TraceError> {
        self.loop_primitive(InstructionKind::Parallel, loop_ref)
    }

    pub fn vectorize(&mut self, loop_ref: OutputRef) -> Result<(), TraceError> {
        self.loop_primitive(InstructionKind::Vectorize, loop_ref)
    }

    pub fn unroll(&mut self, loop_ref: OutputRef) -> Result<(), TraceError> {
        self.loop_primitive(InstructionKind::Unroll, loop_ref)
    }

    pub fn sample_categorical(
        &mut self,
        candidates: CandidateDistribution,
        decision: i64,
    ) -> Result<OutputRef, TraceError> {
        let inst = Instruction::new(InstructionKind::SampleCategorical, vec![], 1)
            .sampled(Support::Categorical(candidates), Decision::Value(decision));
        let index = self.push(inst)?;
        Ok(OutputRef { inst: index, index: 0 })
    }

    /// Sample where `block` is computed; candidate values are loop positions
    /// of the consumer, with `-1` for root and `-2` for inline.
    pub fn sample_compute_location(
        &mut self,
        block: OutputRef,
        candidates: CandidateDistribution,
        decision: i64,
    ) -> Result<OutputRef, TraceError> {
        let inst = Instruction::new(
            InstructionKind::SampleComputeLocation,
            vec![Input::Output(block)],
            1,
        )
        .sampled(Support::Categorical(candidates), Decision::Value(decision));
        let index = self.push(inst)?;
        Ok(OutputRef { inst: index, index: 0 })
    }

    pub fn compute_at(
        &mut self,
        block: OutputRef,
        consumer: OutputRef,
        location: OutputRef,
    ) -> Result<(), TraceError> {
        let inst = Instruction::new(
            InstructionKind::ComputeAt,
            vec![
                Input::Output(block),
                Input::Output(consumer),
                Input::Output(location),
            ],
            0,
        );
        self.push(inst)?;
        Ok(())
    }

    pub fn annotate(
        &mut self,
        target: OutputRef,
        key: &str,
        value: Input,
    ) -> Result<(), TraceError> {
        let inst = Instruction::new(
            InstructionKind::Annotate,
            vec![Input::Output(target), value],
            0,
        )
        .with_attr("key", key);
        self.push(inst)?;
        Ok(())
    }

    fn loop_primitive(
        &mut self,
        kind: InstructionKind,
        loop_ref: OutputRef,
    ) -> Result<(), TraceError> {
        self.push(Instruction::new(kind, vec![Input::Output(loop_ref)], 0))?;
        Ok(())
    }

    fn check_inputs(&self, index: usize, inst: &Instruction) -> Result<(), TraceError> {
        for input in inst.inputs() {
            if let Input::Output(r) = input {
                let defined = self
                    .insts
                    .get(r.inst)
                    .is_some_and(|producer| r.index < producer.num_outputs());
                if r.inst >= index || !defined {
                    return Err(TraceError::DanglingInput {
                        inst: index,
                        kind: inst.kind(),
                        input_inst: r.inst,
                        input_index: r.index,
                    });
                }
            }
        }
        Ok(())
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_ints(hasher: &mut blake3::Hasher, values: &[i64]) {
    hasher.update(&(values.len() as u64).to_le_bytes());
    for v in values {
        hasher.update(&v.to_le_bytes());
    }
}

fn outputs(inst: usize, n: usize) -> Vec<OutputRef> {
    (0..n).map(|index| OutputRef { inst, index }).collect()
}

/// Kind-specific shape rules: output counts, required attributes, and the
/// pairing between sampling kinds and supports.
fn check_shape(index: usize, inst: &Instruction) -> Result<(), TraceError> {
    let kind = inst.kind();
    let missing = |attr: &'static str| TraceError::MissingAttr {
        inst: index,
        kind,
        attr,
    };

    match (kind.is_sampling(), inst.support()) {
        (true, None) => return Err(TraceError::MissingDecision { inst: index, kind }),
        (false, Some(_)) => {
            return Err(TraceError::IllTyped {
                inst: index,
                kind,
                detail: "only sampling instructions may carry a support".into(),
            })
        }
        _ => {}
    }

    let expected = match kind {
        InstructionKind::GetBlock => {
            inst.attr_str("name").ok_or_else(|| missing("name"))?;
            1
        }
        InstructionKind::GetLoops => {
            let extents = inst.attr_ints("extents").ok_or_else(|| missing("extents"))?;
            if let Some(bad) = extents.iter().find(|e| **e < 1) {
                return Err(TraceError::IllTyped {
                    inst: index,
                    kind,
                    detail: format!("loop extent {bad} must be >= 1"),
                });
            }
            extents.len()
        }
        InstructionKind::Split => inst.inputs().len().saturating_sub(1),
        InstructionKind::Fuse => 1,
        InstructionKind::Annotate => {
            inst.attr_str("key").ok_or_else(|| missing("key"))?;
            0
        }
        InstructionKind::Reorder
        | InstructionKind::Parallel
        | InstructionKind::Vectorize
        | InstructionKind::Unroll
        | InstructionKind::ComputeAt => 0,
        InstructionKind::SampleCategorical | InstructionKind::SampleComputeLocation => {
            if !matches!(inst.support(), Some(Support::Categorical(_))) {
                return Err(TraceError::IllTyped {
                    inst: index,
                    kind,
                    detail: "expected a categorical support".into(),
                });
            }
            1
        }
        InstructionKind::SamplePerfectTile => match inst.support() {
            Some(Support::PerfectTile(space)) => space.n,
            _ => {
                return Err(TraceError::IllTyped {
                    inst: index,
                    kind,
                    detail: "expected a perfect-tile support".into(),
                })
            }
        },
    };

    if inst.num_outputs() != expected {
        return Err(TraceError::OutputCount {
            inst: index,
            kind,
            declared: inst.num_outputs(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::ann;

    fn unroll_trace(current: i64) -> Trace {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        let loops = b.get_loops(block, &[128, 128]).unwrap();
        let dist = CandidateDistribution::uniform(vec![0, 16, 64, 512]).unwrap();
        let step = b.sample_categorical(dist, current).unwrap();
        b.annotate(loops[0], ann::UNROLL_EXPLICIT, Input::Output(step))
            .unwrap();
        b.build()
    }

    #[test]
    fn test_with_decision_is_copy_on_write() {
        let parent = unroll_trace(64);
        let child = parent.with_decision(2, Decision::Value(16)).unwrap();

        assert_eq!(parent.decision(2), Some(&Decision::Value(64)));
        assert_eq!(child.decision(2), Some(&Decision::Value(16)));
        assert!(!parent.ptr_eq(&child));
        for i in [0, 1, 3] {
            assert!(parent.shares_instruction(&child, i));
        }
        assert!(!parent.shares_instruction(&child, 2));
    }

    #[test]
    fn test_with_decision_rejects_out_of_support() {
        let trace = unroll_trace(64);
        assert!(matches!(
            trace.with_decision(2, Decision::Value(7)),
            Err(TraceError::DecisionOutOfSupport { .. })
        ));
        assert!(matches!(
            trace.with_decision(1, Decision::Value(16)),
            Err(TraceError::UnexpectedDecision { .. })
        ));
        assert!(matches!(
            trace.with_decision(99, Decision::Value(16)),
            Err(TraceError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_dangling_input() {
        let mut b = TraceBuilder::new();
        let err = b
            .annotate(OutputRef { inst: 4, index: 0 }, ann::PARALLEL, Input::Int(4))
            .unwrap_err();
        assert!(matches!(err, TraceError::DanglingInput { .. }));
    }

    #[test]
    fn test_builder_rejects_overflowing_tile() {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        let loops = b.get_loops(block, &[64]).unwrap();
        for tile in [vec![1 << 32, 1 << 32], vec![0x3333_3333_3333_3340, 5]] {
            let err = b
                .sample_perfect_tile(loops[0], TileSpace::new(64, 2, 64).unwrap(), tile)
                .unwrap_err();
            assert!(matches!(err, TraceError::DecisionOutOfSupport { inst: 2, .. }));
        }
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_builder_rejects_non_positive_extent() {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        assert!(matches!(
            b.get_loops(block, &[64, 0]),
            Err(TraceError::IllTyped { inst: 1, .. })
        ));
        assert!(b.get_loops(block, &[-8]).is_err());
    }

    #[test]
    fn test_from_json_rejects_overflowing_tile() {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        let loops = b.get_loops(block, &[64]).unwrap();
        b.sample_perfect_tile(loops[0], TileSpace::new(64, 2, 64).unwrap(), vec![8, 8])
            .unwrap();
        let mut value = serde_json::to_value(b.build()).unwrap();
        value[2]["decision"] = serde_json::json!([4294967296i64, 4294967296i64]);
        assert!(Trace::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn test_json_round_trip_revalidates() {
        let trace = unroll_trace(512);
        let json = trace.to_json().unwrap();
        let parsed = Trace::from_json(&json).unwrap();
        assert_eq!(parsed, trace);
        assert_eq!(parsed.fingerprint(), trace.fingerprint());

        let tampered = json.replace("\"decision\": 512", "\"decision\": 3");
        assert!(Trace::from_json(&tampered).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_decisions() {
        let a = unroll_trace(64);
        let b = unroll_trace(64);
        let c = unroll_trace(16);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_survives_reload() {
        let trace = unroll_trace(64);
        let reloaded = Trace::from_json(&trace.to_json().unwrap()).unwrap();
        assert_eq!(reloaded.fingerprint(), trace.fingerprint());
        assert_ne!(Trace::empty().fingerprint(), trace.fingerprint());
        assert_eq!(Trace::empty().fingerprint(), Trace::default().fingerprint());
    }
}
