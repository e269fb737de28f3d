#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]
#![allow(clippy::new_ret_no_self)]

//! A CPU primitive engine that reconciles memory formats between pipeline stages.
//!
//! Stages are described by a [PrimitiveDesc](primitive::PrimitiveDesc), which resolves placeholder
//! layouts to the layouts the stage prefers. User buffers are connected to stages through the
//! [reconcile] module, or more conveniently through a [Pipeline](pipeline::Pipeline), which inserts
//! exactly one reorder wherever the layouts differ.
//!
//! # Quick demo
//!
//! ```
//! # use pf_core::desc::MemoryDesc;
//! # use pf_core::dtype::DType;
//! # use pf_core::shape;
//! # use pf_engine::arg::Arg;
//! # use pf_engine::attr::EltwiseOp;
//! # use pf_engine::engine::{Engine, EngineKind};
//! # use pf_engine::memory::Memory;
//! # use pf_engine::pipeline::Pipeline;
//! # use pf_engine::primitive::eltwise::EltwiseDesc;
//! # use pf_engine::stream::Stream;
//! # fn main() -> Result<(), pf_core::error::Error> {
//! let engine = Engine::new(EngineKind::Cpu, 0)?;
//! let stream = Stream::new(&engine);
//!
//! // the user buffer is channels-last, the stage wants a plain layout
//! let user_desc = MemoryDesc::with_tag(shape![1, 3, 2, 2], DType::F32, "nhwc")?;
//! let stage_desc = MemoryDesc::with_tag(shape![1, 3, 2, 2], DType::F32, "nchw")?;
//! let relu = EltwiseDesc::new(&engine, EltwiseOp::relu(0.0), &stage_desc, &stage_desc)?;
//!
//! let user = Memory::from_slice(user_desc, &engine, &[-1.0f32; 12])?;
//! let mut pipeline = Pipeline::new(&engine);
//! let src = pipeline.input(&relu, Arg::Src, &user)?;
//! let dst = pipeline.output(&relu, Arg::Dst, &user)?;
//! pipeline.stage(&relu, &[(Arg::Src, &src), (Arg::Dst, &dst)])?;
//! pipeline.execute(&stream)?;
//!
//! assert_eq!(pipeline.reorder_count(), 2);
//! assert_eq!(user.read_to_vec::<f32>()?, vec![0.0; 12]);
//! # Ok(())
//! # }
//! ```

/// Argument names and the argument map.
pub mod arg;
/// Output scales, zero points and post-ops.
pub mod attr;
/// Engine selection.
pub mod engine;
/// Buffers on an engine.
pub mod memory;
/// Operand iteration for primitive descriptors.
pub mod operand;
/// Stage descriptors and compiled primitives.
pub mod primitive;
/// Layout reconciliation between user buffers and stages.
pub mod reconcile;
/// A list of stages with automatically inserted reorders.
pub mod pipeline;
/// Execution queues.
pub mod stream;
/// Testing and debugging infrastructure.
pub mod tester;
/// Miscellaneous utilities.
pub mod util;
