use std::fmt::{Display, Formatter};
use std::str::FromStr;

use itertools::{zip_eq, Itertools};

use crate::error::ConfigError;
use crate::shape::{Shape, Size};

const AXIS_LETTERS: &[u8] = b"abcdefghijkl";

/// A named canonical layout.
///
/// Written as axis letters from outermost to innermost, eg. `abcd` for row-major and `acdb` for
/// channels-last. A single axis can be split into an inner block by writing it in uppercase and
/// appending the block size and the lowercase letter, eg. `aBcd8b` or `Acdb8a`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FormatTag {
    order: Vec<usize>,
    block: Option<InnerBlock>,
}

/// The innermost `size` elements along `axis` are stored contiguously.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct InnerBlock {
    pub axis: usize,
    pub size: usize,
}

/// A resolved physical layout: one stride per dimension, counted in elements, and an optional inner block.
///
/// Strides are [Size]s so a layout over a shape with a runtime dimension is still exact.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Blocking {
    strides: Vec<Size>,
    block: Option<InnerBlock>,
}

fn alias(name: &str) -> Option<&'static str> {
    let result = match name {
        "x" => "a",
        "nc" => "ab",
        "cn" => "ba",
        "ncw" => "abc",
        "nwc" => "acb",
        "nchw" | "oihw" => "abcd",
        "nhwc" | "ohwi" => "acdb",
        "chwn" => "bcda",
        "hwio" => "cdba",
        "iohw" => "bacd",
        "nChw8c" => "aBcd8b",
        "nChw16c" => "aBcd16b",
        _ => return None,
    };
    Some(result)
}

impl FormatTag {
    /// The row-major layout of the given rank.
    pub fn plain(rank: usize) -> FormatTag {
        FormatTag {
            order: (0..rank).collect(),
            block: None,
        }
    }

    /// Build a tag from an explicit axis order.
    pub fn from_order(order: Vec<usize>, block: Option<InnerBlock>) -> Result<FormatTag, ConfigError> {
        let rank = order.len();
        let is_permutation = order.iter().all_unique() && order.iter().all(|&a| a < rank);
        let block_valid = block.map_or(true, |b| b.axis < rank && b.size > 0);

        if !is_permutation || !block_valid {
            return Err(ConfigError::InvalidFormatTag(format!(
                "order {:?} block {:?}",
                order, block
            )));
        }

        Ok(FormatTag { order, block })
    }

    pub fn rank(&self) -> usize {
        self.order.len()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn block(&self) -> Option<InnerBlock> {
        self.block
    }
}

impl FromStr for FormatTag {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidFormatTag(s.to_owned());
        let canonical = alias(s).unwrap_or(s);

        let split = canonical.find(|c: char| c.is_ascii_digit()).unwrap_or(canonical.len());
        let (head, tail) = canonical.split_at(split);

        let mut order = vec![];
        let mut blocked_axis = None;
        for c in head.chars() {
            let lower = c.to_ascii_lowercase();
            let axis = AXIS_LETTERS.iter().position(|&l| l as char == lower).ok_or_else(invalid)?;
            if c.is_ascii_uppercase() {
                if blocked_axis.is_some() {
                    return Err(invalid());
                }
                blocked_axis = Some(axis);
            }
            order.push(axis);
        }

        let block = match blocked_axis {
            None if tail.is_empty() => None,
            None => return Err(invalid()),
            Some(axis) => {
                let letter = AXIS_LETTERS[axis] as char;
                let digits = tail.strip_suffix(letter).ok_or_else(invalid)?;
                let size = digits.parse::<usize>().map_err(|_| invalid())?;
                Some(InnerBlock { axis, size })
            }
        };

        FormatTag::from_order(order, block).map_err(|_| invalid())
    }
}

impl Display for FormatTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for &axis in &self.order {
            let letter = AXIS_LETTERS[axis] as char;
            if self.block.map_or(false, |b| b.axis == axis) {
                write!(f, "{}", letter.to_ascii_uppercase())?;
            } else {
                write!(f, "{}", letter)?;
            }
        }
        if let Some(block) = self.block {
            write!(f, "{}{}", block.size, AXIS_LETTERS[block.axis] as char)?;
        }
        Ok(())
    }
}

impl Blocking {
    pub fn from_tag(tag: &FormatTag, shape: &Shape) -> Result<Blocking, ConfigError> {
        if tag.rank() != shape.rank() {
            return Err(ConfigError::RankMismatch {
                what: format!("format tag {}", tag),
                expected: shape.rank(),
                actual: tag.rank(),
            });
        }

        if let Some(block) = tag.block {
            if !shape[block.axis].is_fixed() {
                return Err(ConfigError::BlockedRuntimeDim(shape.clone()));
            }
        }

        let mut strides = vec![Size::ZERO; shape.rank()];
        let mut curr = Size::fixed(tag.block.map_or(1, |b| b.size));
        for &axis in tag.order.iter().rev() {
            strides[axis] = curr;
            curr = curr * outer_size(shape[axis], axis, tag.block);
        }

        Ok(Blocking {
            strides,
            block: tag.block,
        })
    }

    pub fn from_strides(strides: &[usize], shape: &Shape) -> Result<Blocking, ConfigError> {
        if strides.len() != shape.rank() {
            return Err(ConfigError::RankMismatch {
                what: "strides".to_owned(),
                expected: shape.rank(),
                actual: strides.len(),
            });
        }

        Ok(Blocking {
            strides: strides.iter().map(|&s| Size::fixed(s)).collect(),
            block: None,
        })
    }

    pub fn strides(&self) -> &[Size] {
        &self.strides
    }

    pub fn block(&self) -> Option<InnerBlock> {
        self.block
    }

    pub fn rank(&self) -> usize {
        self.strides.len()
    }

    /// The same layout with the runtime size substituted, all strides become fixed.
    pub fn bind(&self, runtime_size: usize) -> Blocking {
        Blocking {
            strides: self.strides.iter().map(|s| Size::fixed(s.eval(runtime_size))).collect(),
            block: self.block,
        }
    }

    pub fn eval_strides(&self, runtime_size: usize) -> Vec<usize> {
        self.strides.iter().map(|s| s.eval(runtime_size)).collect()
    }

    /// The number of blocks along each axis, equal to the dims except for the blocked axis.
    pub fn outer_dims(&self, dims: &[usize]) -> Vec<usize> {
        dims.iter()
            .enumerate()
            .map(|(axis, &d)| match self.block {
                Some(b) if b.axis == axis => (d + b.size - 1) / b.size,
                _ => d,
            })
            .collect()
    }

    /// The element offset of the logical `index`, given strides evaluated with [Blocking::eval_strides].
    pub fn offset(&self, strides: &[usize], index: &[usize]) -> usize {
        let mut offset = 0;
        for (axis, (&s, &i)) in zip_eq(strides, index).enumerate() {
            offset += match self.block {
                Some(b) if b.axis == axis => s * (i / b.size) + i % b.size,
                _ => s * i,
            };
        }
        offset
    }

    /// The number of elements a buffer with this layout and the given dims spans, including block padding.
    pub fn span(&self, dims: &[usize], runtime_size: usize) -> usize {
        let outer = self.outer_dims(dims);
        if outer.iter().any(|&d| d == 0) {
            return 0;
        }

        let strides = self.eval_strides(runtime_size);
        let last = zip_eq(&outer, &strides).map(|(&d, &s)| (d - 1) * s).sum::<usize>();
        let block_extra = self.block.map_or(0, |b| b.size - 1);
        last + block_extra + 1
    }

    /// The tag with the same axis order and inner block, axes ordered from the largest to the smallest stride.
    pub fn to_tag(&self) -> FormatTag {
        let order = (0..self.rank())
            .sorted_by_key(|&axis| {
                let s = self.strides[axis];
                std::cmp::Reverse((s.runtime_exp(), s.fixed_factor()))
            })
            .collect_vec();

        FormatTag {
            order,
            block: self.block,
        }
    }

    /// Describe this layout as axis letters, eg. `acdb` or `aBcd8b`.
    pub fn describe(&self) -> String {
        self.to_tag().to_string()
    }
}

impl Display for Blocking {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "blocked:{}", self.describe())
    }
}

fn outer_size(size: Size, axis: usize, block: Option<InnerBlock>) -> Size {
    match block {
        Some(b) if b.axis == axis => {
            let fixed = size.unwrap_fixed("Blocked axis");
            Size::fixed((fixed + b.size - 1) / b.size)
        }
        _ => size,
    }
}
