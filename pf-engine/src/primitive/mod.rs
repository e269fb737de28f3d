use std::ops::ControlFlow;
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array, ArrayD, Dimension};
use internal_iterator::InternalIterator;
use itertools::Itertools;
use tracing::debug;

use pf_core::desc::{Layout, MemoryDesc};
use pf_core::dtype::DType;
use pf_core::error::{ConfigError, Error, ExecutionError, PfResult};
use pf_core::layout::FormatTag;

use crate::arg::{collect_args, Arg};
use crate::engine::Engine;
use crate::memory::Memory;
use crate::operand::Operand;
use crate::primitive::conv::ConvDesc;
use crate::primitive::eltwise::EltwiseDesc;
use crate::primitive::matmul::MatMulDesc;
use crate::primitive::pooling::PoolingDesc;
use crate::primitive::reorder::ReorderDesc;
use crate::stream::Stream;

pub mod conv;
pub mod eltwise;
pub mod matmul;
pub mod pooling;
pub mod reorder;

/// A pipeline stage: the operation, its parameters and the resolved descriptors of all of its operands.
///
/// Constructed through the `new` functions of the individual descriptor types, which pick concrete
/// layouts for any placeholder operands.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PrimitiveDesc {
    Eltwise(EltwiseDesc),
    Conv(ConvDesc),
    Pooling(PoolingDesc),
    MatMul(MatMulDesc),
    Reorder(ReorderDesc),
}

#[derive(Debug)]
pub struct DescOperands<'a>(&'a PrimitiveDesc);

/// A compiled stage, ready to be executed any number of times.
///
/// Clones share the same descriptor.
#[derive(Debug, Clone)]
pub struct Primitive {
    desc: Arc<PrimitiveDesc>,
}

/// Arguments that passed validation, together with the size the runtime dimension was bound to.
#[derive(Debug, Clone)]
pub(crate) struct BoundArgs {
    memories: IndexMap<Arg, Memory>,
    runtime_size: Option<usize>,
}

impl PrimitiveDesc {
    pub fn engine(&self) -> &Engine {
        match self {
            PrimitiveDesc::Eltwise(desc) => &desc.engine,
            PrimitiveDesc::Conv(desc) => &desc.engine,
            PrimitiveDesc::Pooling(desc) => &desc.engine,
            PrimitiveDesc::MatMul(desc) => &desc.engine,
            PrimitiveDesc::Reorder(desc) => &desc.engine,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveDesc::Eltwise(_) => "eltwise",
            PrimitiveDesc::Conv(_) => "convolution",
            PrimitiveDesc::Pooling(_) => "pooling",
            PrimitiveDesc::MatMul(_) => "matmul",
            PrimitiveDesc::Reorder(_) => "reorder",
        }
    }

    pub fn operands(&self) -> DescOperands {
        DescOperands(self)
    }

    fn for_each_operand<'a, R>(
        &'a self,
        mut f: impl FnMut(Operand<&'a MemoryDesc>) -> ControlFlow<R>,
    ) -> ControlFlow<R> {
        match self {
            PrimitiveDesc::Eltwise(EltwiseDesc {
                engine: _,
                op: _,
                src,
                dst,
            }) => {
                f(Operand::new_in(Arg::Src, src))?;
                f(Operand::new_out(Arg::Dst, dst))?;
            }
            PrimitiveDesc::Conv(ConvDesc {
                engine: _,
                alg: _,
                params: _,
                attr: _,
                src,
                weights,
                bias,
                dst,
            }) => {
                f(Operand::new_in(Arg::Src, src))?;
                f(Operand::new_in(Arg::Weights, weights))?;
                if let Some(bias) = bias {
                    f(Operand::new_in(Arg::Bias, bias))?;
                }
                f(Operand::new_out(Arg::Dst, dst))?;
            }
            PrimitiveDesc::Pooling(PoolingDesc {
                engine: _,
                alg: _,
                params: _,
                src,
                dst,
            }) => {
                f(Operand::new_in(Arg::Src, src))?;
                f(Operand::new_out(Arg::Dst, dst))?;
            }
            PrimitiveDesc::MatMul(MatMulDesc {
                engine: _,
                attr: _,
                src,
                weights,
                bias,
                dst,
                attr_args,
            }) => {
                f(Operand::new_in(Arg::Src, src))?;
                f(Operand::new_in(Arg::Weights, weights))?;
                if let Some(bias) = bias {
                    f(Operand::new_in(Arg::Bias, bias))?;
                }
                f(Operand::new_out(Arg::Dst, dst))?;
                for (arg, desc) in attr_args {
                    f(Operand::new_attr(*arg, desc))?;
                }
            }
            PrimitiveDesc::Reorder(ReorderDesc {
                engine: _,
                scale: _,
                from,
                to,
            }) => {
                f(Operand::new_in(Arg::From, from))?;
                f(Operand::new_out(Arg::To, to))?;
            }
        }

        ControlFlow::Continue(())
    }

    /// The resolved descriptor this stage requires for `arg`, if it takes that argument.
    pub fn query_md(&self, arg: Arg) -> Option<&MemoryDesc> {
        let result = self.for_each_operand(|op| {
            if op.arg == arg {
                ControlFlow::Break(op.value)
            } else {
                ControlFlow::Continue(())
            }
        });

        match result {
            ControlFlow::Break(desc) => Some(desc),
            ControlFlow::Continue(()) => None,
        }
    }

    /// Resolve a placeholder `desc` for `arg` to the layout this stage picked.
    ///
    /// Concrete descriptors are returned unchanged, so resolving twice gives the same result.
    pub fn resolve(&self, arg: Arg, desc: &MemoryDesc) -> PfResult<MemoryDesc> {
        let required = self.query_md(arg).ok_or_else(|| {
            ConfigError::UnknownArgument(format!("{} is not an argument of {}", arg, self.name()))
        })?;
        require_same_logical(&arg.to_string(), required, desc)?;

        match desc.layout() {
            Layout::Any => {
                debug!("{} resolved {} placeholder to {}", self.name(), arg, required);
                Ok(required.clone())
            }
            Layout::Concrete(_) => Ok(desc.clone()),
        }
    }

    /// A short description of the problem size, used in the verbose log.
    pub fn problem(&self) -> String {
        match self {
            PrimitiveDesc::Eltwise(desc) => desc.problem(),
            PrimitiveDesc::Conv(desc) => desc.problem(),
            PrimitiveDesc::Pooling(desc) => desc.problem(),
            PrimitiveDesc::MatMul(desc) => desc.problem(),
            PrimitiveDesc::Reorder(desc) => desc.problem(),
        }
    }

    pub(crate) fn run(&self, args: &BoundArgs) -> PfResult<()> {
        match self {
            PrimitiveDesc::Eltwise(desc) => desc.run(args),
            PrimitiveDesc::Conv(desc) => desc.run(args),
            PrimitiveDesc::Pooling(desc) => desc.run(args),
            PrimitiveDesc::MatMul(desc) => desc.run(args),
            PrimitiveDesc::Reorder(desc) => desc.run(args),
        }
    }
}

impl<'a> InternalIterator for DescOperands<'a> {
    type Item = Operand<&'a MemoryDesc>;

    fn try_for_each<R, F>(self, f: F) -> ControlFlow<R>
    where
        F: FnMut(Self::Item) -> ControlFlow<R>,
    {
        self.0.for_each_operand(f)
    }
}

impl Primitive {
    pub fn new(desc: &PrimitiveDesc) -> Primitive {
        Primitive {
            desc: Arc::new(desc.clone()),
        }
    }

    pub fn desc(&self) -> &PrimitiveDesc {
        &self.desc
    }

    /// Check `args` against this primitive without submitting anything.
    pub fn validate(&self, engine: &Engine, args: &[(Arg, &Memory)]) -> PfResult<()> {
        self.bind(engine, args).map(|_| ())
    }

    /// Validate `args` and enqueue an execution on `stream`. The work runs on [Stream::wait].
    pub fn execute(&self, stream: &Stream, args: &[(Arg, &Memory)]) -> PfResult<()> {
        let bound = self.bind(stream.engine(), args)?;
        stream.submit(self.clone(), bound)
    }

    pub(crate) fn bind(&self, engine: &Engine, args: &[(Arg, &Memory)]) -> PfResult<BoundArgs> {
        let name = self.desc.name();
        let args = collect_args(args)?;
        let operands: Vec<Operand<&MemoryDesc>> = self.desc.operands().collect();

        for &arg in args.keys() {
            if !operands.iter().any(|op| op.arg == arg) {
                return Err(ExecutionError::UnexpectedArgument(format!("{} does not take {}", name, arg)).into());
            }
        }
        for op in &operands {
            if !args.contains_key(&op.arg) {
                return Err(ExecutionError::MissingArgument(format!("{} requires {}", name, op.arg)).into());
            }
        }

        if self.desc.engine() != engine {
            return Err(ExecutionError::EngineMismatch(format!(
                "{} was created on engine {} but submitted to {}",
                name,
                self.desc.engine(),
                engine
            ))
            .into());
        }
        for (arg, memory) in &args {
            if memory.engine() != engine {
                return Err(ExecutionError::EngineMismatch(format!(
                    "{} of {} lives on engine {} instead of {}",
                    arg,
                    name,
                    memory.engine(),
                    engine
                ))
                .into());
            }
        }

        // shape and type problems are reported before any layout problem
        let mut runtime_size: Option<usize> = None;
        let mut layout_mismatch = None;
        for op in &operands {
            let memory = args[&op.arg];
            match op.value.check_buffer(&op.arg.to_string(), memory.desc()) {
                Ok(None) => {}
                Ok(Some(size)) => match runtime_size {
                    None => runtime_size = Some(size),
                    Some(prev) if prev == size => {}
                    Some(prev) => {
                        return Err(ConfigError::RuntimeDimMismatch {
                            what: op.arg.to_string(),
                            expected: prev,
                            actual: size,
                        }
                        .into())
                    }
                },
                Err(Error::LayoutMismatch(e)) => {
                    layout_mismatch.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = layout_mismatch {
            return Err(e.into());
        }

        let memories = args.into_iter().map(|(arg, memory)| (arg, memory.clone())).collect();
        Ok(BoundArgs { memories, runtime_size })
    }
}

impl BoundArgs {
    pub fn get(&self, arg: Arg) -> PfResult<&Memory> {
        self.memories
            .get(&arg)
            .ok_or_else(|| ExecutionError::MissingArgument(arg.to_string()).into())
    }

    pub fn get_opt(&self, arg: Arg) -> Option<&Memory> {
        self.memories.get(&arg)
    }

    pub fn runtime_size(&self) -> Option<usize> {
        self.runtime_size
    }

    /// The bound buffers as they show up in the verbose log.
    pub fn describe(&self) -> String {
        self.memories
            .iter()
            .map(|(arg, memory)| format!("{}_{}", arg, memory.desc()))
            .join(" ")
    }
}

pub(crate) fn require_same_logical(what: &str, expected: &MemoryDesc, actual: &MemoryDesc) -> Result<(), ConfigError> {
    if expected.dtype() != actual.dtype() {
        return Err(ConfigError::DTypeMismatch {
            what: what.to_owned(),
            expected: expected.dtype(),
            actual: actual.dtype(),
        });
    }
    if expected.shape() != actual.shape() {
        return Err(ConfigError::ShapeMismatch {
            what: what.to_owned(),
            expected: expected.shape().clone(),
            actual: actual.shape().clone(),
        });
    }
    Ok(())
}

pub(crate) fn require_rank(what: &str, desc: &MemoryDesc, ranks: &[usize]) -> Result<(), ConfigError> {
    if !ranks.contains(&desc.rank()) {
        return Err(ConfigError::RankMismatch {
            what: what.to_owned(),
            expected: ranks[0],
            actual: desc.rank(),
        });
    }
    Ok(())
}

pub(crate) fn require_fixed(what: &str, desc: &MemoryDesc) -> Result<Vec<usize>, ConfigError> {
    desc.shape()
        .as_fixed()
        .map(|shape| shape.dims)
        .ok_or_else(|| ConfigError::RuntimeDimNotAllowed {
            what: what.to_owned(),
            shape: desc.shape().clone(),
        })
}

pub(crate) fn require_dtype(what: &str, desc: &MemoryDesc, allowed: &[DType]) -> Result<(), ConfigError> {
    if !allowed.contains(&desc.dtype()) {
        return Err(ConfigError::UnsupportedDType {
            what: what.to_owned(),
            dtype: desc.dtype(),
        });
    }
    Ok(())
}

/// Keep a concrete descriptor, or resolve a placeholder to `tag`.
pub(crate) fn resolve_or(
    primitive: &str,
    what: &str,
    desc: &MemoryDesc,
    tag: &FormatTag,
) -> Result<MemoryDesc, ConfigError> {
    match desc.layout() {
        Layout::Concrete(_) => Ok(desc.clone()),
        Layout::Any => {
            let resolved = desc.resolve(tag)?;
            debug!("{} resolved {} placeholder to {}", primitive, what, resolved);
            Ok(resolved)
        }
    }
}

/// Keep a concrete descriptor, or resolve a placeholder to the layout of `like`.
///
/// With equal shapes the strides of `like` are copied as they are, otherwise only its layout format is.
pub(crate) fn resolve_like(
    primitive: &str,
    what: &str,
    desc: &MemoryDesc,
    like: &MemoryDesc,
) -> Result<MemoryDesc, ConfigError> {
    match desc.layout() {
        Layout::Concrete(_) => Ok(desc.clone()),
        Layout::Any => {
            let blocking = like.require_blocking(what)?;
            let resolved = if desc.shape() == like.shape() {
                desc.resolve_with(blocking.clone())?
            } else {
                desc.resolve(&blocking.to_tag())?
            };
            debug!("{} resolved {} placeholder to {}", primitive, what, resolved);
            Ok(resolved)
        }
    }
}

/// The output size of a sliding window, `None` if the dilated kernel does not fit the padded input.
///
/// A dilation of zero means a dense kernel.
pub(crate) fn window_out_size(
    input: usize,
    kernel: usize,
    stride: usize,
    pad_l: usize,
    pad_r: usize,
    dilation: usize,
) -> Option<usize> {
    if kernel == 0 || stride == 0 {
        return None;
    }
    let padded = input + pad_l + pad_r;
    let effective = (kernel - 1) * (dilation + 1) + 1;
    padded.checked_sub(effective).map(|x| x / stride + 1)
}

/// The input position a window element maps to, `None` if it falls in the padding.
pub(crate) fn window_input_pos(
    out: usize,
    k: usize,
    stride: usize,
    dilation: usize,
    pad_l: usize,
    input: usize,
) -> Option<usize> {
    let pos = (out * stride + k * (dilation + 1)).checked_sub(pad_l)?;
    (pos < input).then_some(pos)
}

/// Reinterpret a logical tensor with a statically known rank.
pub(crate) fn fix_rank<D: Dimension>(array: ArrayD<f32>) -> PfResult<Array<f32, D>> {
    array
        .into_dimensionality::<D>()
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()).into())
}
