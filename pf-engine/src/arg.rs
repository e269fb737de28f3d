use std::fmt::{Display, Formatter};

use indexmap::IndexMap;

use pf_core::error::ExecutionError;

use crate::memory::Memory;

/// The argument a zero point applies to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum QuantTarget {
    Src,
    Weights,
    Dst,
}

/// Names the role of a buffer passed to a primitive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Arg {
    Src,
    Weights,
    Bias,
    Dst,
    /// Reorder source.
    From,
    /// Reorder destination.
    To,
    /// Runtime output scale values.
    AttrOutputScales,
    /// Runtime zero point value for the given argument.
    AttrZeroPoints(QuantTarget),
}

/// Arguments in the order the caller passed them.
pub type ArgMap<'m> = IndexMap<Arg, &'m Memory>;

/// Collect execution arguments, rejecting duplicates.
pub fn collect_args<'m>(args: &[(Arg, &'m Memory)]) -> Result<ArgMap<'m>, ExecutionError> {
    let mut map = IndexMap::with_capacity(args.len());
    for &(arg, memory) in args {
        if map.insert(arg, memory).is_some() {
            return Err(ExecutionError::DuplicateArgument(arg.to_string()));
        }
    }
    Ok(map)
}

impl Display for QuantTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QuantTarget::Src => write!(f, "src"),
            QuantTarget::Weights => write!(f, "wei"),
            QuantTarget::Dst => write!(f, "dst"),
        }
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Src => write!(f, "src"),
            Arg::Weights => write!(f, "wei"),
            Arg::Bias => write!(f, "bia"),
            Arg::Dst => write!(f, "dst"),
            Arg::From => write!(f, "from"),
            Arg::To => write!(f, "to"),
            Arg::AttrOutputScales => write!(f, "attr_oscale"),
            Arg::AttrZeroPoints(target) => write!(f, "attr_zp_{}", target),
        }
    }
}
