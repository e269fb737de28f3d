use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

use crate::desc::MemoryDesc;
use crate::dtype::DType;
use crate::shape::Shape;

pub type PfResult<T> = Result<T, Error>;

/// Any failure of the primitive engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Fatal, the computation as described can never run.
    Config(ConfigError),
    /// Recoverable by inserting a reorder between producer and consumer.
    LayoutMismatch(LayoutMismatch),
    /// Fatal, reported while submitting or running work.
    Execution(ExecutionError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidFormatTag(String),
    RankMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    MultipleRuntimeDims(Shape),
    RuntimeDimNotAllowed {
        what: String,
        shape: Shape,
    },
    RuntimeDimMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },
    BlockedRuntimeDim(Shape),

    UnresolvedLayout(String),
    AlreadyResolved(MemoryDesc),

    ShapeMismatch {
        what: String,
        expected: Shape,
        actual: Shape,
    },
    DTypeMismatch {
        what: String,
        expected: DType,
        actual: DType,
    },
    UnsupportedDType {
        what: String,
        dtype: DType,
    },

    InvalidParameter(String),
    InvalidAttribute(String),
    UnknownArgument(String),

    EngineUnavailable(String),
}

/// The layout a buffer has differs from the layout a stage requires, shape and type are compatible.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutMismatch {
    pub what: String,
    pub expected: MemoryDesc,
    pub actual: MemoryDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    MissingArgument(String),
    UnexpectedArgument(String),
    DuplicateArgument(String),
    EngineMismatch(String),
    ConversionFailed(Box<Error>),
    PendingOutputs(usize),
    Poisoned(String),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<LayoutMismatch> for Error {
    fn from(e: LayoutMismatch) -> Self {
        Error::LayoutMismatch(e)
    }
}

impl From<ExecutionError> for Error {
    fn from(e: ExecutionError) -> Self {
        Error::Execution(e)
    }
}

impl Error {
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn as_config(&self) -> Option<&ConfigError> {
        match self {
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "configuration error: {}", e),
            Error::LayoutMismatch(e) => write!(f, "layout mismatch: {}", e),
            Error::Execution(e) => write!(f, "execution error: {}", e),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for LayoutMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} expected {} but got {}", self.what, self.expected, self.actual)
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl StdError for Error {}

impl StdError for ConfigError {}

impl StdError for LayoutMismatch {}

impl StdError for ExecutionError {}
