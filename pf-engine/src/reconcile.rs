//! Decide whether a buffer can be handed to a stage as-is, and insert a single reorder when it cannot.

use tracing::debug;

use pf_core::desc::MemoryDesc;
use pf_core::error::{ConfigError, Error, ExecutionError, PfResult};

use crate::arg::Arg;
use crate::attr::PrimitiveAttr;
use crate::engine::Engine;
use crate::memory::Memory;
use crate::primitive::reorder::ReorderDesc;
use crate::primitive::{Primitive, PrimitiveDesc};

/// The buffer a stage should use for one argument, plus the conversion that connects it to the user buffer.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Either the original buffer, or a freshly allocated intermediate in the stage layout.
    pub memory: Memory,
    pub reorder: Option<ScheduledReorder>,
}

/// A reorder primitive together with the buffers it connects.
#[derive(Debug, Clone)]
pub struct ScheduledReorder {
    pub primitive: Primitive,
    pub from: Memory,
    pub to: Memory,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Direction {
    Input,
    Output,
}

/// Whether a buffer described by `current` has to be converted before it can be used as `required`.
///
/// Both descriptors must be resolved, and they must agree in shape and type. A runtime dimension in
/// `required` binds to the matching dimension of `current` before the layouts are compared.
pub fn reorder_needed(current: &MemoryDesc, required: &MemoryDesc) -> PfResult<bool> {
    match required.check_buffer("reconciled buffer", current) {
        Ok(_) => Ok(false),
        Err(Error::LayoutMismatch(_)) => Ok(true),
        Err(e) => Err(e),
    }
}

/// Prepare `buffer` to be read by `stage` as `arg`.
pub fn reconcile_input(stage: &PrimitiveDesc, arg: Arg, buffer: &Memory) -> PfResult<Reconciled> {
    reconcile(stage, arg, buffer, Direction::Input)
}

/// Prepare a buffer for `stage` to write `arg` into, which is later copied back into `buffer`.
pub fn reconcile_output(stage: &PrimitiveDesc, arg: Arg, buffer: &Memory) -> PfResult<Reconciled> {
    reconcile(stage, arg, buffer, Direction::Output)
}

fn reconcile(stage: &PrimitiveDesc, arg: Arg, buffer: &Memory, direction: Direction) -> PfResult<Reconciled> {
    let required = stage.query_md(arg).ok_or_else(|| {
        ConfigError::UnknownArgument(format!("{} is not an argument of {}", arg, stage.name()))
    })?;

    let engine = stage.engine();
    if buffer.engine() != engine {
        return Err(ExecutionError::EngineMismatch(format!(
            "{} of {} lives on engine {} instead of {}",
            arg,
            stage.name(),
            buffer.engine(),
            engine
        ))
        .into());
    }

    let mismatch = match required.check_buffer(&arg.to_string(), buffer.desc()) {
        Ok(_) => {
            return Ok(Reconciled {
                memory: buffer.clone(),
                reorder: None,
            })
        }
        Err(Error::LayoutMismatch(e)) => e,
        Err(e) => return Err(e),
    };

    // the expected descriptor has the runtime size bound, so the intermediate can be allocated
    let intermediate = Memory::new(mismatch.expected.clone(), engine)?;
    let (from, to) = match direction {
        Direction::Input => (buffer.clone(), intermediate.clone()),
        Direction::Output => (intermediate.clone(), buffer.clone()),
    };

    let primitive = create_reorder(engine, &from, &to)?;
    debug!(
        "{} {}: inserted reorder {} -> {}",
        stage.name(),
        arg,
        from.desc(),
        to.desc()
    );

    Ok(Reconciled {
        memory: intermediate,
        reorder: Some(ScheduledReorder { primitive, from, to }),
    })
}

fn create_reorder(engine: &Engine, from: &Memory, to: &Memory) -> PfResult<Primitive> {
    match ReorderDesc::new(engine, from.desc(), to.desc(), &PrimitiveAttr::new()) {
        Ok(desc) => Ok(Primitive::new(&desc)),
        Err(e) => Err(ExecutionError::ConversionFailed(Box::new(e)).into()),
    }
}
