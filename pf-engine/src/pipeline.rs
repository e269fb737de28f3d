use std::fmt::{Debug, Formatter};

use itertools::Itertools;

use pf_core::error::{ConfigError, ExecutionError, PfResult};

use crate::arg::Arg;
use crate::engine::Engine;
use crate::memory::Memory;
use crate::primitive::{Primitive, PrimitiveDesc};
use crate::reconcile::{reconcile_input, reconcile_output, ScheduledReorder};
use crate::stream::Stream;
use crate::util::debug_vec_multiline;

/// An ordered list of stages on one engine, with the reorders that connect them to user buffers.
///
/// Typical use: create the stage descriptors with placeholder layouts, call [Pipeline::input] and
/// [Pipeline::output] to connect user buffers, [Pipeline::scratch] for buffers between stages, then
/// [Pipeline::stage] for every stage in execution order.
pub struct Pipeline<'e> {
    engine: &'e Engine,
    steps: Vec<Step>,
    pending_outputs: Vec<ScheduledReorder>,

    reorder_count: usize,
    intermediate_count: usize,
}

enum Step {
    Stage { primitive: Primitive, args: Vec<(Arg, Memory)> },
    Reorder(ScheduledReorder),
}

impl<'e> Pipeline<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Pipeline {
            engine,
            steps: vec![],
            pending_outputs: vec![],
            reorder_count: 0,
            intermediate_count: 0,
        }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// The buffer `stage` should read `arg` from. If `buffer` has a different layout, a reorder into a new
    /// intermediate buffer is scheduled now, so it runs before any stage added later.
    pub fn input(&mut self, stage: &PrimitiveDesc, arg: Arg, buffer: &Memory) -> PfResult<Memory> {
        self.check_engine(stage)?;
        let reconciled = reconcile_input(stage, arg, buffer)?;

        if let Some(reorder) = reconciled.reorder {
            self.reorder_count += 1;
            self.intermediate_count += 1;
            self.steps.push(Step::Reorder(reorder));
        }
        Ok(reconciled.memory)
    }

    /// The buffer `stage` should write `arg` into. If `buffer` has a different layout, a reorder from a new
    /// intermediate buffer is scheduled right after the stage that writes it.
    pub fn output(&mut self, stage: &PrimitiveDesc, arg: Arg, buffer: &Memory) -> PfResult<Memory> {
        self.check_engine(stage)?;
        let reconciled = reconcile_output(stage, arg, buffer)?;

        if let Some(reorder) = reconciled.reorder {
            self.reorder_count += 1;
            self.intermediate_count += 1;
            self.pending_outputs.push(reorder);
        }
        Ok(reconciled.memory)
    }

    /// Allocate a new buffer in the layout `stage` picked for `arg`.
    pub fn scratch(&mut self, stage: &PrimitiveDesc, arg: Arg) -> PfResult<Memory> {
        self.check_engine(stage)?;
        let desc = stage.query_md(arg).ok_or_else(|| {
            ConfigError::UnknownArgument(format!("{} is not an argument of {}", arg, stage.name()))
        })?;

        let memory = Memory::new(desc.clone(), self.engine)?;
        self.intermediate_count += 1;
        Ok(memory)
    }

    /// Validate `args` against `stage` and append it.
    pub fn stage(&mut self, stage: &PrimitiveDesc, args: &[(Arg, &Memory)]) -> PfResult<()> {
        let primitive = Primitive::new(stage);
        primitive.validate(self.engine, args)?;

        let args = args.iter().map(|&(arg, memory)| (arg, memory.clone())).collect_vec();

        // output reorders reading from a buffer this stage writes run right after it
        let (ready, pending) = std::mem::take(&mut self.pending_outputs)
            .into_iter()
            .partition::<Vec<_>, _>(|reorder| args.iter().any(|(_, memory)| memory.same_buffer(&reorder.from)));
        self.pending_outputs = pending;

        self.steps.push(Step::Stage { primitive, args });
        self.steps.extend(ready.into_iter().map(Step::Reorder));
        Ok(())
    }

    /// Submit every step to `stream` and wait for completion.
    ///
    /// Fails without submitting anything if an output reorder was scheduled but the stage writing its
    /// intermediate was never added.
    pub fn execute(&self, stream: &Stream) -> PfResult<()> {
        if !self.pending_outputs.is_empty() {
            return Err(ExecutionError::PendingOutputs(self.pending_outputs.len()).into());
        }
        if stream.engine() != self.engine {
            return Err(ExecutionError::EngineMismatch(format!(
                "pipeline on {} submitted to stream on {}",
                self.engine,
                stream.engine()
            ))
            .into());
        }

        for step in &self.steps {
            match step {
                Step::Stage { primitive, args } => {
                    let args = args.iter().map(|(arg, memory)| (*arg, memory)).collect_vec();
                    primitive.execute(stream, &args)?;
                }
                Step::Reorder(reorder) => {
                    let args = [(Arg::From, &reorder.from), (Arg::To, &reorder.to)];
                    reorder.primitive.execute(stream, &args)?;
                }
            }
        }

        stream.wait()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn reorder_count(&self) -> usize {
        self.reorder_count
    }

    pub fn intermediate_count(&self) -> usize {
        self.intermediate_count
    }

    fn check_engine(&self, stage: &PrimitiveDesc) -> PfResult<()> {
        if stage.engine() != self.engine {
            return Err(ExecutionError::EngineMismatch(format!(
                "{} was created on {} but added to a pipeline on {}",
                stage.name(),
                stage.engine(),
                self.engine
            ))
            .into());
        }
        Ok(())
    }
}

impl Debug for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Stage { primitive, args } => {
                let args = args
                    .iter()
                    .map(|(arg, memory)| format!("{}: {}", arg, memory.desc()))
                    .join(", ");
                write!(f, "{}({})", primitive.desc().name(), args)
            }
            Step::Reorder(reorder) => write!(f, "reorder({} -> {})", reorder.from.desc(), reorder.to.desc()),
        }
    }
}

impl Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("engine", self.engine)
            .field("steps", &debug_vec_multiline("    ", &self.steps))
            .field("pending_outputs", &self.pending_outputs.len())
            .field("reorder_count", &self.reorder_count)
            .field("intermediate_count", &self.intermediate_count)
            .finish()
    }
}
