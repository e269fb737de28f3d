use ndarray::{Array3, ArrayD, IxDyn};

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::{ConfigError, PfResult};
use pf_core::layout::FormatTag;
use pf_core::shape::Shape;

use crate::arg::{Arg, QuantTarget};
use crate::attr::{scale_index, AttrSupport, AttrValues, PrimitiveAttr};
use crate::engine::Engine;
use crate::primitive::{require_dtype, require_fixed, require_rank, resolve_or, BoundArgs, PrimitiveDesc};

const SUPPORT: AttrSupport = AttrSupport {
    output_scales: true,
    runtime_scales: true,
    zero_points: true,
    post_ops: true,
};

/// A (batched) matrix multiplication `dst[.., M, N] = src[.., M, K] x weights[.., K, N] + bias`.
///
/// The `M` axis of the source and destination may be [Size::RUNTIME](pf_core::shape::Size::RUNTIME),
/// so a single primitive serves invocations with different row counts.
/// For integer sources the result is computed as
/// `((src - zp_src) x (weights - zp_wei)) * scale + bias`, followed by post-ops and `+ zp_dst`,
/// then rounded and saturated to the destination type.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MatMulDesc {
    pub(crate) engine: Engine,
    pub(crate) attr: PrimitiveAttr,
    pub(crate) src: MemoryDesc,
    pub(crate) weights: MemoryDesc,
    pub(crate) bias: Option<MemoryDesc>,
    pub(crate) dst: MemoryDesc,
    pub(crate) attr_args: Vec<(Arg, MemoryDesc)>,
}

impl MatMulDesc {
    pub fn new(
        engine: &Engine,
        src: &MemoryDesc,
        weights: &MemoryDesc,
        bias: Option<&MemoryDesc>,
        dst: &MemoryDesc,
        attr: &PrimitiveAttr,
    ) -> PfResult<PrimitiveDesc> {
        require_rank("matmul src", src, &[2, 3])?;
        let rank = src.rank();
        require_rank("matmul weights", weights, &[rank])?;
        require_rank("matmul dst", dst, &[rank])?;
        let m_axis = rank - 2;

        check_runtime_dims("src", src, Some(m_axis))?;
        check_runtime_dims("weights", weights, None)?;
        check_runtime_dims("dst", dst, Some(m_axis))?;

        let (s, w, d) = (src.shape(), weights.shape(), dst.shape());
        let shape_mismatch = |what: &str, expected: &Shape, actual: &Shape| ConfigError::ShapeMismatch {
            what: format!("matmul {}", what),
            expected: expected.clone(),
            actual: actual.clone(),
        };
        if s[rank - 1] != w[rank - 2] || (rank == 3 && s[0] != w[0]) {
            return Err(shape_mismatch("weights", s, w).into());
        }
        let mut expected_dst = s.clone();
        expected_dst.dims[rank - 1] = w[rank - 1];
        if d != &expected_dst {
            return Err(shape_mismatch("dst", &expected_dst, d).into());
        }

        match (src.dtype(), weights.dtype()) {
            (DType::F32, DType::F32) => require_dtype("matmul dst", dst, &[DType::F32])?,
            (DType::U8 | DType::S8, DType::S8) => {
                require_dtype("matmul dst", dst, &[DType::F32, DType::S32, DType::S8, DType::U8])?
            }
            (DType::F32 | DType::U8 | DType::S8, _) => {
                return Err(ConfigError::UnsupportedDType {
                    what: format!("matmul weights for {} src", src.dtype()),
                    dtype: weights.dtype(),
                }
                .into())
            }
            (other, _) => {
                return Err(ConfigError::UnsupportedDType {
                    what: "matmul src".to_owned(),
                    dtype: other,
                }
                .into())
            }
        }

        let bias = match bias {
            None => None,
            Some(bias) => {
                require_rank("matmul bias", bias, &[rank])?;
                require_dtype("matmul bias", bias, &[DType::F32])?;
                let bias_dims = require_fixed("matmul bias", bias)?;
                for (axis, &b) in bias_dims.iter().enumerate() {
                    if b != 1 && Some(b) != d[axis].try_unwrap_fixed() {
                        return Err(shape_mismatch("bias", d, bias.shape()).into());
                    }
                }
                Some(resolve_or("matmul", "bias", bias, &FormatTag::plain(rank))?)
            }
        };

        attr.validate("matmul", SUPPORT, d)?;
        if src.dtype().is_float() && [QuantTarget::Src, QuantTarget::Weights, QuantTarget::Dst]
            .iter()
            .any(|&t| attr.zero_points(t).is_some())
        {
            return Err(ConfigError::InvalidAttribute("zero points require integer matmul sources".to_owned()).into());
        }
        let attr_args = attr.runtime_args(d)?;

        let plain = FormatTag::plain(rank);
        let transposed: FormatTag = if rank == 2 { "ba".parse()? } else { "acb".parse()? };

        Ok(PrimitiveDesc::MatMul(MatMulDesc {
            engine: engine.clone(),
            attr: attr.clone(),
            src: resolve_or("matmul", "src", src, &plain)?,
            weights: resolve_or("matmul", "weights", weights, &transposed)?,
            bias,
            dst: resolve_or("matmul", "dst", dst, &plain)?,
            attr_args,
        }))
    }

    pub fn attr(&self) -> &PrimitiveAttr {
        &self.attr
    }

    pub(crate) fn problem(&self) -> String {
        format!("{}:{}:{}", self.src.shape(), self.weights.shape(), self.dst.shape())
    }

    pub(crate) fn run(&self, args: &BoundArgs) -> PfResult<()> {
        let src = args.get(Arg::Src)?.to_ndarray_f64()?;
        let weights = args.get(Arg::Weights)?.to_ndarray_f64()?;
        let bias = match args.get_opt(Arg::Bias) {
            Some(bias) => Some(as_batched(bias.to_ndarray_f64()?)?),
            None => None,
        };
        let dst = args.get(Arg::Dst)?;
        let dst_dims = require_fixed("matmul dst", dst.desc())?;

        let zp_src = self.zero_point(args, QuantTarget::Src)? as f64;
        let zp_wei = self.zero_point(args, QuantTarget::Weights)? as f64;
        let zp_dst = self.zero_point(args, QuantTarget::Dst)? as f64;
        let scales = self.scales(args)?;

        let src = as_batched(src)?;
        let weights = as_batched(weights)?;
        let (batch, m, k) = src.dim();
        let n = weights.dim().2;
        let rank = dst_dims.len();

        let output = Array3::from_shape_fn((batch, m, n), |(b, i, j)| {
            let mut acc = 0.0;
            for kk in 0..k {
                acc += (src[(b, i, kk)] - zp_src) * (weights[(b, kk, j)] - zp_wei);
            }

            let mut y = acc;
            if let Some((mask, values)) = &scales {
                let index = [b, i, j];
                y *= values[scale_index(*mask, &dst_dims, &index[3 - rank..])] as f64;
            }
            if let Some(bias) = &bias {
                let (bb, bi, bj) = bias.dim();
                y += bias[(b.min(bb - 1), i.min(bi - 1), j.min(bj - 1))];
            }
            self.attr.apply_post_ops(y) + zp_dst
        });

        let output = output
            .into_shape(IxDyn(&dst_dims))
            .map_err(|e| ConfigError::InvalidParameter(e.to_string()))?;
        dst.write_ndarray_f64(&output)
    }

    fn zero_point(&self, args: &BoundArgs, target: QuantTarget) -> PfResult<i32> {
        match self.attr.zero_points(target) {
            None => Ok(0),
            Some(zp) => match &zp.values {
                AttrValues::Fixed(values) => Ok(values[0]),
                AttrValues::Runtime => {
                    let values = args.get(Arg::AttrZeroPoints(target))?.read_to_vec::<i32>()?;
                    Ok(values[0])
                }
            },
        }
    }

    fn scales(&self, args: &BoundArgs) -> PfResult<Option<(u32, Vec<f32>)>> {
        let scales = match self.attr.output_scales() {
            None => return Ok(None),
            Some(scales) => scales,
        };

        let values = match &scales.values {
            AttrValues::Fixed(values) => values.iter().map(|v| v.into_inner()).collect(),
            AttrValues::Runtime => args.get(Arg::AttrOutputScales)?.read_to_vec::<f32>()?,
        };
        Ok(Some((scales.mask, values)))
    }
}

fn check_runtime_dims(what: &str, desc: &MemoryDesc, allowed_axis: Option<usize>) -> Result<(), ConfigError> {
    let axes = desc.shape().runtime_axes();
    if axes.iter().any(|&axis| Some(axis) != allowed_axis) {
        return Err(ConfigError::RuntimeDimNotAllowed {
            what: format!("matmul {} outside of the M axis", what),
            shape: desc.shape().clone(),
        });
    }
    if !axes.is_empty() && !desc.is_resolved() {
        return Err(ConfigError::RuntimeDimNotAllowed {
            what: format!("matmul {} with placeholder layout", what),
            shape: desc.shape().clone(),
        });
    }
    Ok(())
}

/// View a rank 2 or 3 tensor as `[batch, rows, cols]`.
fn as_batched(array: ArrayD<f64>) -> PfResult<Array3<f64>> {
    let shape = match *array.shape() {
        [rows, cols] => (1, rows, cols),
        [batch, rows, cols] => (batch, rows, cols),
        ref other => {
            return Err(ConfigError::InvalidParameter(format!("expected a matrix, got shape {:?}", other)).into())
        }
    };
    array
        .into_shape(shape)
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()).into())
}
