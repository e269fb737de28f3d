use std::fmt::{Display, Formatter};

use itertools::zip_eq;

use crate::dtype::DType;
use crate::error::{ConfigError, Error, LayoutMismatch};
use crate::layout::{Blocking, FormatTag};
use crate::shape::Shape;

/// How a caller declares the layout of a new descriptor.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum LayoutSpec {
    /// A named canonical layout.
    Tag(FormatTag),
    /// An explicit stride per dimension, in elements.
    Strides(Vec<usize>),
    /// Let the stage consuming or producing the tensor pick the layout.
    Any,
}

/// The layout state of a descriptor.
///
/// `Any` can only transition to `Concrete` through [MemoryDesc::resolve], and only once.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Layout {
    Concrete(Blocking),
    Any,
}

/// Metadata describing a tensor: logical shape, element type and physical layout.
///
/// Equality is structural: two descriptors are equal iff their shape, dtype and resolved layout match,
/// a descriptor with an [Layout::Any] layout is never equal to a concrete one.
/// Tags and explicit strides that describe the same physical layout compare equal.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct MemoryDesc {
    shape: Shape,
    dtype: DType,
    layout: Layout,
}

impl MemoryDesc {
    pub fn new(shape: Shape, dtype: DType, spec: LayoutSpec) -> Result<MemoryDesc, ConfigError> {
        if shape.runtime_axes().len() > 1 {
            return Err(ConfigError::MultipleRuntimeDims(shape));
        }

        let layout = match spec {
            LayoutSpec::Tag(tag) => Layout::Concrete(Blocking::from_tag(&tag, &shape)?),
            LayoutSpec::Strides(strides) => Layout::Concrete(Blocking::from_strides(&strides, &shape)?),
            LayoutSpec::Any => Layout::Any,
        };

        Ok(MemoryDesc { shape, dtype, layout })
    }

    pub fn with_tag(shape: Shape, dtype: DType, tag: &str) -> Result<MemoryDesc, ConfigError> {
        MemoryDesc::new(shape, dtype, LayoutSpec::Tag(tag.parse()?))
    }

    pub fn with_strides(shape: Shape, dtype: DType, strides: &[usize]) -> Result<MemoryDesc, ConfigError> {
        MemoryDesc::new(shape, dtype, LayoutSpec::Strides(strides.to_vec()))
    }

    pub fn any(shape: Shape, dtype: DType) -> Result<MemoryDesc, ConfigError> {
        MemoryDesc::new(shape, dtype, LayoutSpec::Any)
    }

    /// A row-major descriptor.
    pub fn plain(shape: Shape, dtype: DType) -> Result<MemoryDesc, ConfigError> {
        let tag = FormatTag::plain(shape.rank());
        MemoryDesc::new(shape, dtype, LayoutSpec::Tag(tag))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.layout, Layout::Concrete(_))
    }

    pub fn blocking(&self) -> Option<&Blocking> {
        match &self.layout {
            Layout::Concrete(blocking) => Some(blocking),
            Layout::Any => None,
        }
    }

    /// The blocking of a resolved descriptor, or [ConfigError::UnresolvedLayout] mentioning `what`.
    pub fn require_blocking(&self, what: &str) -> Result<&Blocking, ConfigError> {
        self.blocking()
            .ok_or_else(|| ConfigError::UnresolvedLayout(what.to_owned()))
    }

    pub fn runtime_axis(&self) -> Option<usize> {
        self.shape.runtime_axes().first().copied()
    }

    /// Whether both descriptors describe the same logical tensor, ignoring layout.
    pub fn same_logical(&self, other: &MemoryDesc) -> bool {
        self.shape == other.shape && self.dtype == other.dtype
    }

    /// Resolve a placeholder layout to the given tag. Resolving an already concrete descriptor is an error.
    pub fn resolve(&self, tag: &FormatTag) -> Result<MemoryDesc, ConfigError> {
        let blocking = Blocking::from_tag(tag, &self.shape)?;
        self.resolve_with(blocking)
    }

    /// Resolve a placeholder layout to an existing blocking, typically the one of another operand.
    pub fn resolve_with(&self, blocking: Blocking) -> Result<MemoryDesc, ConfigError> {
        match self.layout {
            Layout::Concrete(_) => Err(ConfigError::AlreadyResolved(self.clone())),
            Layout::Any => {
                if blocking.rank() != self.rank() {
                    return Err(ConfigError::RankMismatch {
                        what: "resolved layout".to_owned(),
                        expected: self.rank(),
                        actual: blocking.rank(),
                    });
                }
                Ok(MemoryDesc {
                    shape: self.shape.clone(),
                    dtype: self.dtype,
                    layout: Layout::Concrete(blocking),
                })
            }
        }
    }

    /// Substitute the runtime size, the result has a fixed shape and fixed strides.
    pub fn bind(&self, runtime_size: usize) -> MemoryDesc {
        let layout = match &self.layout {
            Layout::Concrete(blocking) => Layout::Concrete(blocking.bind(runtime_size)),
            Layout::Any => Layout::Any,
        };
        MemoryDesc {
            shape: self.shape.bind(runtime_size),
            dtype: self.dtype,
            layout,
        }
    }

    /// The number of elements a buffer for this descriptor holds, including padding.
    pub fn span(&self) -> Result<usize, ConfigError> {
        let blocking = self.require_blocking("buffer descriptor")?;
        let dims = self.shape.as_fixed().ok_or_else(|| ConfigError::RuntimeDimNotAllowed {
            what: "buffer descriptor".to_owned(),
            shape: self.shape.clone(),
        })?;
        Ok(blocking.span(&dims.dims, 0))
    }

    pub fn size_bytes(&self) -> Result<usize, ConfigError> {
        Ok(self.span()? * self.dtype.size().bytes())
    }

    /// Check that a buffer described by `actual` can be used where `self` is required.
    ///
    /// A runtime dimension in `self` binds to the matching dimension of `actual`, the bound size is returned.
    /// Shape and dtype mismatches are [ConfigError]s, a layout-only difference is a [LayoutMismatch].
    pub fn check_buffer(&self, what: &str, actual: &MemoryDesc) -> Result<Option<usize>, Error> {
        let expected_blocking = self.require_blocking(what)?;
        let actual_blocking = actual.require_blocking(what)?;

        if self.dtype != actual.dtype {
            return Err(ConfigError::DTypeMismatch {
                what: what.to_owned(),
                expected: self.dtype,
                actual: actual.dtype,
            }
            .into());
        }

        let shape_mismatch = || ConfigError::ShapeMismatch {
            what: what.to_owned(),
            expected: self.shape.clone(),
            actual: actual.shape.clone(),
        };

        if self.rank() != actual.rank() {
            return Err(shape_mismatch().into());
        }

        let runtime_size = if actual.shape.is_fixed() {
            let mut runtime_size = None;
            for (&e, &a) in zip_eq(&self.shape.dims, &actual.shape.dims) {
                let a = a.unwrap_fixed("Fixed shape dimension");
                match e.try_unwrap_fixed() {
                    Some(e) if e == a => {}
                    Some(_) => return Err(shape_mismatch().into()),
                    None => runtime_size = Some(a),
                }
            }
            runtime_size
        } else {
            if self.shape != actual.shape {
                return Err(shape_mismatch().into());
            }
            None
        };

        let expected_bound = match runtime_size {
            Some(r) => expected_blocking.bind(r),
            None => expected_blocking.clone(),
        };

        if &expected_bound != actual_blocking {
            let expected = match runtime_size {
                Some(r) => self.bind(r),
                None => self.clone(),
            };
            return Err(LayoutMismatch {
                what: what.to_owned(),
                expected,
                actual: actual.clone(),
            }
            .into());
        }

        Ok(runtime_size)
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::Concrete(blocking) => write!(f, "{}", blocking),
            Layout::Any => write!(f, "any"),
        }
    }
}

impl Display for MemoryDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{} {}", self.dtype, self.layout, self.shape)
    }
}
