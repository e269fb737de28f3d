use std::fmt::{Display, Formatter};

use bytemuck::Pod;
use num_traits::{Bounded, NumCast, Zero};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DType {
    F32,
    I(DSize),
    U(DSize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DSize {
    S8,
    S32,
}

impl DType {
    pub const S8: DType = DType::I(DSize::S8);
    pub const S32: DType = DType::I(DSize::S32);
    pub const U8: DType = DType::U(DSize::S8);
    pub const U32: DType = DType::U(DSize::S32);

    pub fn size(self) -> DSize {
        match self {
            DType::F32 => DSize::S32,
            DType::I(size) => size,
            DType::U(size) => size,
        }
    }

    pub fn is_signed(self) -> bool {
        match self {
            DType::F32 => true,
            DType::I(_) => true,
            DType::U(_) => false,
        }
    }

    pub fn is_float(self) -> bool {
        match self {
            DType::F32 => true,
            DType::I(_) => false,
            DType::U(_) => false,
        }
    }

    pub fn is_int(self) -> bool {
        !self.is_float()
    }

    /// The short name used in descriptors and logs, eg. `f32` or `u8`.
    pub fn short_name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I(DSize::S8) => "s8",
            DType::I(DSize::S32) => "s32",
            DType::U(DSize::S8) => "u8",
            DType::U(DSize::S32) => "u32",
        }
    }

    /// Decode a single little-endian element as `f32`.
    ///
    /// 32-bit integers above `2^24` lose precision, use [DType::read_i64] when exactness matters.
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        match self {
            DType::F32 => f32::from_le_bytes(element(bytes)),
            _ => self.read_i64(bytes) as f32,
        }
    }

    /// Decode a single little-endian element as an integer, floats are truncated towards zero.
    pub fn read_i64(self, bytes: &[u8]) -> i64 {
        match self {
            DType::F32 => f32::from_le_bytes(element(bytes)) as i64,
            DType::I(DSize::S8) => i8::from_le_bytes(element(bytes)) as i64,
            DType::I(DSize::S32) => i32::from_le_bytes(element(bytes)) as i64,
            DType::U(DSize::S8) => u8::from_le_bytes(element(bytes)) as i64,
            DType::U(DSize::S32) => u32::from_le_bytes(element(bytes)) as i64,
        }
    }

    /// Decode a single little-endian element as `f64`, exact for every element type.
    pub fn read_f64(self, bytes: &[u8]) -> f64 {
        match self {
            DType::F32 => f32::from_le_bytes(element(bytes)) as f64,
            _ => self.read_i64(bytes) as f64,
        }
    }

    /// Encode `value` into a single element, rounding to nearest-even and saturating for integer types.
    pub fn write_f32(self, value: f32, bytes: &mut [u8]) {
        self.write_f64(value as f64, bytes)
    }

    /// Like [DType::write_f32], but rounding happens only once, so integers up to `2^53` are kept exactly.
    pub fn write_f64(self, value: f64, bytes: &mut [u8]) {
        match self {
            DType::F32 => bytes.copy_from_slice(&(value as f32).to_le_bytes()),
            DType::I(DSize::S8) => bytes.copy_from_slice(&saturate_f64::<i8>(value).to_le_bytes()),
            DType::I(DSize::S32) => bytes.copy_from_slice(&saturate_f64::<i32>(value).to_le_bytes()),
            DType::U(DSize::S8) => bytes.copy_from_slice(&saturate_f64::<u8>(value).to_le_bytes()),
            DType::U(DSize::S32) => bytes.copy_from_slice(&saturate_f64::<u32>(value).to_le_bytes()),
        }
    }
}

impl DSize {
    pub fn bytes(self) -> usize {
        match self {
            DSize::S8 => 1,
            DSize::S32 => 4,
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

fn element<const N: usize>(bytes: &[u8]) -> [u8; N] {
    assert_eq!(bytes.len(), N, "Expected element of {} bytes, got {}", N, bytes.len());
    let mut result = [0; N];
    result.copy_from_slice(bytes);
    result
}

/// Round to nearest-even and clamp into the range of `T`. NaN maps to zero.
pub fn saturate<T: Bounded + NumCast + Zero>(value: f32) -> T {
    saturate_f64(value as f64)
}

/// [saturate] for `f64` values.
pub fn saturate_f64<T: Bounded + NumCast + Zero>(value: f64) -> T {
    if value.is_nan() {
        return T::zero();
    }

    let rounded = value.round_ties_even();
    let min = <f64 as NumCast>::from(T::min_value()).unwrap_or(f64::NEG_INFINITY);
    let max = <f64 as NumCast>::from(T::max_value()).unwrap_or(f64::INFINITY);

    if rounded <= min {
        T::min_value()
    } else if rounded >= max {
        T::max_value()
    } else {
        T::from(rounded).unwrap_or_else(T::zero)
    }
}

/// Host element types that can be copied in and out of buffers without conversion.
pub trait IntoDType: Pod {
    const DTYPE: DType;
}

macro_rules! impl_into_dtype {
    ($ty:ty, $dtype:expr) => {
        impl IntoDType for $ty {
            const DTYPE: DType = $dtype;
        }
    };
}

impl_into_dtype!(f32, DType::F32);
impl_into_dtype!(i8, DType::I(DSize::S8));
impl_into_dtype!(i32, DType::I(DSize::S32));
impl_into_dtype!(u8, DType::U(DSize::S8));
impl_into_dtype!(u32, DType::U(DSize::S32));
