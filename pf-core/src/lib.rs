#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! Tensor descriptors and layouts shared by the primitive engine.
//!
//! The core type of this crate is [MemoryDesc](desc::MemoryDesc): a logical shape, an element type and
//! a physical layout. The layout is either concrete or the placeholder [Layout::Any](desc::Layout::Any),
//! which a primitive resolves once to the layout it prefers.
//!
//! ```
//! # use pf_core::desc::MemoryDesc;
//! # use pf_core::dtype::DType;
//! # use pf_core::shape;
//! # fn main() -> Result<(), pf_core::error::Error> {
//! // channels-last, declared once by tag and once by explicit strides
//! let (n, c, h, w) = (1, 3, 13, 13);
//! let tagged = MemoryDesc::with_tag(shape![n, c, h, w], DType::F32, "nhwc")?;
//! let strided = MemoryDesc::with_strides(shape![n, c, h, w], DType::F32, &[h * w * c, 1, w * c, c])?;
//! assert_eq!(tagged, strided);
//! # Ok(())
//! # }
//! ```

/// The [DType](dtype::DType) enum and element conversions.
pub mod dtype;
/// The [Shape](shape::Shape) type, including the runtime dimension marker.
pub mod shape;
/// Format tags and resolved strided layouts.
pub mod layout;
/// The [MemoryDesc](desc::MemoryDesc) type.
pub mod desc;
/// The error taxonomy.
pub mod error;
