use std::fmt::{Debug, Display, Formatter};

use itertools::Itertools;

#[macro_export]
macro_rules! shape {
    [$($(*)? $value:expr),* $(,)?] => {
        $crate::shape::Shape::new(vec![$($crate::shape::Size::from($value)),*])
    };
}

/// A logical tensor shape, where each dimension is either fixed or the runtime marker.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Shape {
    pub dims: Vec<Size>,
}

/// A monomial `fixed_factor * R^runtime_exp`, where `R` is the size only known at execution time.
///
/// Dimensions only ever use exponent 0 or 1, higher exponents can show up in strides.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Size {
    runtime_exp: u32,
    fixed_factor: usize,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ConcreteShape {
    pub dims: Vec<usize>,
}

impl Shape {
    pub const SCALAR: Shape = Shape { dims: vec![] };

    pub fn new(dims: Vec<Size>) -> Shape {
        Shape { dims }
    }

    pub fn fixed(dims: &[usize]) -> Shape {
        let dims = dims.iter().map(|&d| Size::fixed(d)).collect_vec();
        Shape { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn assert_has_axis(&self, axis: usize) {
        assert!(axis < self.rank(), "Axis {} out of bounds for {:?}", axis, self);
    }

    /// The axes that hold the runtime marker.
    pub fn runtime_axes(&self) -> Vec<usize> {
        (0..self.rank()).filter(|&i| !self.dims[i].is_fixed()).collect_vec()
    }

    pub fn is_fixed(&self) -> bool {
        self.dims.iter().all(|d| d.is_fixed())
    }

    pub fn as_fixed(&self) -> Option<ConcreteShape> {
        self.dims
            .iter()
            .map(|d| d.try_unwrap_fixed())
            .collect::<Option<Vec<_>>>()
            .map(ConcreteShape::new)
    }

    pub fn eval(&self, runtime_size: usize) -> ConcreteShape {
        let dims = self.dims.iter().map(|d| d.eval(runtime_size)).collect_vec();
        ConcreteShape { dims }
    }

    /// Replace the runtime marker with `runtime_size`, keeping fixed dimensions as they are.
    pub fn bind(&self, runtime_size: usize) -> Shape {
        Shape::new(self.dims.iter().map(|d| Size::fixed(d.eval(runtime_size))).collect())
    }

    pub fn size(&self) -> Size {
        self.dims.iter().copied().product()
    }
}

impl From<usize> for Size {
    fn from(fixed_factor: usize) -> Self {
        Size::fixed(fixed_factor)
    }
}

impl Size {
    pub const ZERO: Size = Size::new(0, 0);
    pub const ONE: Size = Size::new(0, 1);
    pub const RUNTIME: Size = Size::new(1, 1);

    pub const fn new(runtime_exp: u32, fixed_factor: usize) -> Size {
        if fixed_factor == 0 {
            Size {
                runtime_exp: 0,
                fixed_factor: 0,
            }
        } else {
            Size {
                runtime_exp,
                fixed_factor,
            }
        }
    }

    pub const fn fixed(size: usize) -> Size {
        Size {
            runtime_exp: 0,
            fixed_factor: size,
        }
    }

    pub const fn is_fixed(&self) -> bool {
        self.runtime_exp == 0
    }

    pub fn runtime_exp(self) -> u32 {
        self.runtime_exp
    }

    pub fn fixed_factor(self) -> usize {
        self.fixed_factor
    }

    pub fn eval(self, runtime_size: usize) -> usize {
        runtime_size.pow(self.runtime_exp) * self.fixed_factor
    }

    pub fn try_unwrap_fixed(self) -> Option<usize> {
        if self.runtime_exp == 0 {
            Some(self.fixed_factor)
        } else {
            None
        }
    }

    #[track_caller]
    pub fn unwrap_fixed(self, what: &str) -> usize {
        assert_eq!(0, self.runtime_exp, "{} must be fixed, but got size {:?}", what, self);
        self.fixed_factor
    }
}

impl ConcreteShape {
    pub fn new(dims: Vec<usize>) -> Self {
        ConcreteShape { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

impl std::ops::Mul for Size {
    type Output = Size;

    fn mul(self, rhs: Self) -> Self::Output {
        Size::new(self.runtime_exp + rhs.runtime_exp, self.fixed_factor * rhs.fixed_factor)
    }
}

impl std::iter::Product for Size {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Size::fixed(1), |a, s| a * s)
    }
}

impl std::ops::Index<usize> for Shape {
    type Output = Size;

    fn index(&self, axis: usize) -> &Self::Output {
        self.assert_has_axis(axis);
        &self.dims[axis]
    }
}

impl Debug for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape{}", self)
    }
}

impl Debug for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Size({})", self)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fmt_shape_impl(f, &self.dims)
    }
}

impl Display for Size {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.fixed_factor, self.runtime_exp) {
            (a, 0) => write!(f, "{}", a),
            (1, 1) => write!(f, "?"),
            (a, 1) => write!(f, "{}?", a),
            (1, b) => write!(f, "?^{}", b),
            (a, b) => write!(f, "{}?^{}", a, b),
        }
    }
}

impl Display for ConcreteShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fmt_shape_impl(f, &self.dims)
    }
}

fn fmt_shape_impl(f: &mut Formatter, dims: &[impl Display]) -> Result<(), std::fmt::Error> {
    write!(f, "(")?;
    for i in 0..dims.len() {
        if i != 0 {
            write!(f, " x ")?;
        }

        write!(f, "{}", dims[i])?;
    }
    write!(f, ")")?;
    Ok(())
}
