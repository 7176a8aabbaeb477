//! Legality checks run on every proposed trace before scoring.

use metaforge_trace::{ann, replay, AttrValue, InstructionKind, Schedule, Trace, TraceError, Value};

pub trait Validator: Send + Sync {
    /// Replay `trace` into its schedule, or explain why it is illegal.
    fn validate(&self, trace: &Trace) -> Result<Schedule, TraceError>;
}

/// Accepts every trace that replays cleanly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayValidator;

impl Validator for ReplayValidator {
    fn validate(&self, trace: &Trace) -> Result<Schedule, TraceError> {
        replay(trace)
    }
}

/// Replay legality plus a cap on the annotated parallel extent.
#[derive(Debug, Clone, Copy)]
pub struct MaxParallelValidator {
    pub max_jobs: i64,
}

impl Validator for MaxParallelValidator {
    fn validate(&self, trace: &Trace) -> Result<Schedule, TraceError> {
        let schedule = replay(trace)?;
        for (index, step) in schedule.steps.iter().enumerate() {
            if step.kind != InstructionKind::Annotate {
                continue;
            }
            let is_parallel =
                matches!(step.attrs.get("key"), Some(AttrValue::Str(k)) if k == ann::PARALLEL);
            if !is_parallel {
                continue;
            }
            if let Some(Value::Int(jobs)) = step.args.get(1) {
                if *jobs > self.max_jobs {
                    return Err(TraceError::IllTyped {
                        inst: index,
                        kind: step.kind,
                        detail: format!("parallel extent {jobs} exceeds {}", self.max_jobs),
                    });
                }
            }
        }
        Ok(schedule)
    }
}
