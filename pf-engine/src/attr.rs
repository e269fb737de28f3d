use decorum::Total;
use itertools::Itertools;
use num_traits::Float;

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::ConfigError;
use pf_core::shape;
use pf_core::shape::Shape;

use crate::arg::{Arg, QuantTarget};

/// Attribute values, either known when the stage is constructed or supplied with every execution.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AttrValues<T> {
    Fixed(Vec<T>),
    Runtime,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct OutputScales {
    /// Bit `i` set means there is a separate scale for each index along destination axis `i`.
    pub mask: u32,
    pub values: AttrValues<Total<f32>>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ZeroPoints {
    /// Only a single common zero point is supported, so this is always zero.
    pub mask: u32,
    pub values: AttrValues<i32>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EltwiseAlg {
    /// `x` if positive, `alpha * x` otherwise.
    Relu,
    /// `alpha * x + beta`
    Linear,
    /// Clamp into `[alpha, beta]`.
    Clip,
    Abs,
    Square,
    Tanh,
    Logistic,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EltwiseOp {
    pub alg: EltwiseAlg,
    pub alpha: Total<f32>,
    pub beta: Total<f32>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PostOp {
    Eltwise(EltwiseOp),
}

/// Extra behaviour attached to a primitive: output scaling, zero points and post-ops.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct PrimitiveAttr {
    output_scales: Option<OutputScales>,
    zero_points: Vec<(QuantTarget, ZeroPoints)>,
    post_ops: Vec<PostOp>,
}

/// Which attribute features a primitive accepts.
#[derive(Debug, Copy, Clone)]
pub(crate) struct AttrSupport {
    pub output_scales: bool,
    pub runtime_scales: bool,
    pub zero_points: bool,
    pub post_ops: bool,
}

impl<T> AttrValues<T> {
    pub fn map<K>(self, f: impl FnMut(T) -> K) -> AttrValues<K> {
        match self {
            AttrValues::Fixed(values) => AttrValues::Fixed(values.into_iter().map(f).collect()),
            AttrValues::Runtime => AttrValues::Runtime,
        }
    }

    pub fn is_runtime(&self) -> bool {
        matches!(self, AttrValues::Runtime)
    }
}

impl EltwiseOp {
    pub fn new(alg: EltwiseAlg, alpha: f32, beta: f32) -> EltwiseOp {
        EltwiseOp {
            alg,
            alpha: Total::from(alpha),
            beta: Total::from(beta),
        }
    }

    pub fn relu(negative_slope: f32) -> EltwiseOp {
        EltwiseOp::new(EltwiseAlg::Relu, negative_slope, 0.0)
    }

    /// Apply the operation in the precision of `x`.
    pub fn apply<F: Float>(&self, x: F) -> F {
        let alpha = F::from(self.alpha.into_inner()).unwrap_or_else(F::nan);
        let beta = F::from(self.beta.into_inner()).unwrap_or_else(F::nan);

        match self.alg {
            EltwiseAlg::Relu => {
                if x > F::zero() {
                    x
                } else {
                    alpha * x
                }
            }
            EltwiseAlg::Linear => alpha * x + beta,
            EltwiseAlg::Clip => {
                if x < alpha {
                    alpha
                } else if x > beta {
                    beta
                } else {
                    x
                }
            }
            EltwiseAlg::Abs => x.abs(),
            EltwiseAlg::Square => x * x,
            EltwiseAlg::Tanh => x.tanh(),
            EltwiseAlg::Logistic => F::one() / (F::one() + (-x).exp()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let (alpha, beta) = (self.alpha.into_inner(), self.beta.into_inner());
        if self.alg == EltwiseAlg::Clip && (alpha.is_nan() || beta.is_nan() || alpha > beta) {
            return Err(ConfigError::InvalidParameter(format!(
                "clip bounds [{}, {}] are empty",
                alpha, beta
            )));
        }
        Ok(())
    }
}

impl PrimitiveAttr {
    pub fn new() -> PrimitiveAttr {
        PrimitiveAttr::default()
    }

    /// Set the output scales, replacing any earlier ones.
    pub fn set_output_scales(&mut self, mask: u32, values: AttrValues<f32>) {
        self.output_scales = Some(OutputScales {
            mask,
            values: values.map(Total::from),
        });
    }

    /// Set the zero point of `target`, replacing any earlier one.
    pub fn set_zero_points(&mut self, target: QuantTarget, mask: u32, values: AttrValues<i32>) {
        self.zero_points.retain(|&(t, _)| t != target);
        self.zero_points.push((target, ZeroPoints { mask, values }));
        self.zero_points.sort_by_key(|&(t, _)| t);
    }

    pub fn append_post_op(&mut self, op: PostOp) {
        self.post_ops.push(op);
    }

    pub fn append_eltwise(&mut self, op: EltwiseOp) {
        self.append_post_op(PostOp::Eltwise(op));
    }

    pub fn output_scales(&self) -> Option<&OutputScales> {
        self.output_scales.as_ref()
    }

    pub fn zero_points(&self, target: QuantTarget) -> Option<&ZeroPoints> {
        self.zero_points.iter().find(|&&(t, _)| t == target).map(|(_, z)| z)
    }

    pub fn post_ops(&self) -> &[PostOp] {
        &self.post_ops
    }

    pub fn is_empty(&self) -> bool {
        self.output_scales.is_none() && self.zero_points.is_empty() && self.post_ops.is_empty()
    }

    pub fn apply_post_ops<F: Float>(&self, x: F) -> F {
        self.post_ops.iter().fold(x, |x, op| match op {
            PostOp::Eltwise(op) => op.apply(x),
        })
    }

    /// Check these attributes against what a primitive supports and the shape of its destination.
    pub(crate) fn validate(&self, primitive: &str, support: AttrSupport, dst: &Shape) -> Result<(), ConfigError> {
        let unsupported = |what: &str| {
            ConfigError::InvalidAttribute(format!("{} does not support {}", primitive, what))
        };

        if let Some(scales) = &self.output_scales {
            if !support.output_scales {
                return Err(unsupported("output scales"));
            }
            if scales.values.is_runtime() && !support.runtime_scales {
                return Err(unsupported("runtime output scales"));
            }
            let count = scale_count(scales.mask, dst)?;
            if let AttrValues::Fixed(values) = &scales.values {
                if values.len() != count {
                    return Err(ConfigError::InvalidAttribute(format!(
                        "output scales with mask {:#b} need {} values for dst {}, got {}",
                        scales.mask,
                        count,
                        dst,
                        values.len()
                    )));
                }
            }
        }

        for (target, zp) in &self.zero_points {
            if !support.zero_points {
                return Err(unsupported("zero points"));
            }
            if zp.mask != 0 {
                return Err(ConfigError::InvalidAttribute(format!(
                    "zero points for {} only support mask 0, got {:#b}",
                    target, zp.mask
                )));
            }
            if let AttrValues::Fixed(values) = &zp.values {
                if values.len() != 1 {
                    return Err(ConfigError::InvalidAttribute(format!(
                        "zero points for {} need exactly 1 value, got {}",
                        target,
                        values.len()
                    )));
                }
            }
        }

        if !self.post_ops.is_empty() && !support.post_ops {
            return Err(unsupported("post-ops"));
        }
        for op in &self.post_ops {
            match op {
                PostOp::Eltwise(op) => op.validate()?,
            }
        }

        Ok(())
    }

    /// The descriptors of the buffers that carry runtime attribute values.
    pub(crate) fn runtime_args(&self, dst: &Shape) -> Result<Vec<(Arg, MemoryDesc)>, ConfigError> {
        let mut result = vec![];

        if let Some(scales) = &self.output_scales {
            if scales.values.is_runtime() {
                let count = scale_count(scales.mask, dst)?;
                let desc = MemoryDesc::plain(shape![count], DType::F32)?;
                result.push((Arg::AttrOutputScales, desc));
            }
        }

        for &(target, ref zp) in &self.zero_points {
            if zp.values.is_runtime() {
                let desc = MemoryDesc::plain(shape![1], DType::S32)?;
                result.push((Arg::AttrZeroPoints(target), desc));
            }
        }

        Ok(result)
    }
}

/// The number of scale values a mask selects over `dst`. Masked axes must be fixed.
pub(crate) fn scale_count(mask: u32, dst: &Shape) -> Result<usize, ConfigError> {
    if dst.rank() < 32 && mask >> dst.rank() != 0 {
        return Err(ConfigError::InvalidAttribute(format!(
            "scale mask {:#b} selects axes outside of dst {}",
            mask, dst
        )));
    }

    masked_axes(mask, dst.rank())
        .map(|axis| {
            dst[axis].try_unwrap_fixed().ok_or_else(|| {
                ConfigError::InvalidAttribute(format!(
                    "scale mask {:#b} selects runtime axis {} of dst {}",
                    mask, axis, dst
                ))
            })
        })
        .fold_ok(1, |acc, d| acc * d)
}

/// The index into the scale values for the destination element at `index`.
pub(crate) fn scale_index(mask: u32, dims: &[usize], index: &[usize]) -> usize {
    masked_axes(mask, dims.len()).fold(0, |acc, axis| acc * dims[axis] + index[axis])
}

fn masked_axes(mask: u32, rank: usize) -> impl Iterator<Item = usize> {
    (0..rank).filter(move |&axis| axis < 32 && mask & (1 << axis) != 0)
}
