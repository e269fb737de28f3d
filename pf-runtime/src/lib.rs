#![warn(missing_debug_implementations)]

//! Small end-to-end programs built on `pf-engine`, each checking its output against a host reference.
//!
//! * [get_started](tutorials::get_started): engine and stream creation, descriptors from tags and strides,
//!   a single relu.
//! * [format_propagation](tutorials::format_propagation): a convolution and a pooling stage with placeholder
//!   layouts, connected to plain user buffers through automatically inserted reorders.
//! * [int8_matmul](tutorials::int8_matmul): a quantized matmul compiled once with a runtime row count and
//!   runtime scales and zero points, executed for several row counts.
//!
//! The `pf-tutorial` binary runs them from the command line.

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

use pf_core::error::Error;

pub mod tutorials;

pub type TutorialResult<T> = Result<T, TutorialError>;

#[derive(Debug, Clone, PartialEq)]
pub enum TutorialError {
    /// The engine rejected the computation.
    Pf(Error),
    /// Two descriptors that should describe the same layout differ.
    DescriptorMismatch(String),
    /// The engine output does not match the host reference.
    Accuracy {
        index: Vec<usize>,
        expected: f32,
        actual: f32,
    },
}

impl From<Error> for TutorialError {
    fn from(e: Error) -> Self {
        TutorialError::Pf(e)
    }
}

impl From<pf_core::error::ConfigError> for TutorialError {
    fn from(e: pf_core::error::ConfigError) -> Self {
        TutorialError::Pf(e.into())
    }
}

impl Display for TutorialError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TutorialError::Pf(e) => write!(f, "{}", e),
            TutorialError::DescriptorMismatch(what) => write!(f, "descriptor initialization mismatch: {}", what),
            TutorialError::Accuracy {
                index,
                expected,
                actual,
            } => write!(
                f,
                "accuracy check failed at index {:?}: expected {} but got {}",
                index, expected, actual
            ),
        }
    }
}

impl StdError for TutorialError {}
