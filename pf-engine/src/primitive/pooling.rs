use ndarray::{Array4, Ix4};

use pf_core::desc::MemoryDesc;
use pf_core::error::{ConfigError, PfResult};
use pf_core::layout::FormatTag;

use crate::arg::Arg;
use crate::engine::Engine;
use crate::primitive::{
    fix_rank, require_fixed, require_rank, resolve_like, resolve_or, window_input_pos, window_out_size, BoundArgs,
    PrimitiveDesc,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PoolingAlg {
    Max,
    /// Average where padded positions count as zeros.
    AvgIncludePadding,
    /// Average over the positions inside the source only.
    AvgExcludePadding,
}

/// Spatial parameters, indexed `[height, width]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PoolingParams {
    pub kernel: [usize; 2],
    pub strides: [usize; 2],
    pub padding_l: [usize; 2],
    pub padding_r: [usize; 2],
    pub dilation: [usize; 2],
}

/// A 2D forward pooling over NCHW logical tensors. The destination has the source element type.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PoolingDesc {
    pub(crate) engine: Engine,
    pub(crate) alg: PoolingAlg,
    pub(crate) params: PoolingParams,
    pub(crate) src: MemoryDesc,
    pub(crate) dst: MemoryDesc,
}

impl PoolingParams {
    /// Unit stride and "same" padding for an odd kernel.
    pub fn same(kernel: [usize; 2]) -> PoolingParams {
        let padding = [kernel[0] / 2, kernel[1] / 2];
        PoolingParams {
            kernel,
            strides: [1, 1],
            padding_l: padding,
            padding_r: padding,
            dilation: [0, 0],
        }
    }
}

impl PoolingDesc {
    pub fn new(
        engine: &Engine,
        alg: PoolingAlg,
        src: &MemoryDesc,
        dst: &MemoryDesc,
        params: PoolingParams,
    ) -> PfResult<PrimitiveDesc> {
        require_rank("pooling src", src, &[4])?;
        require_rank("pooling dst", dst, &[4])?;
        let src_dims = require_fixed("pooling src", src)?;
        let dst_dims = require_fixed("pooling dst", dst)?;

        if src.dtype() != dst.dtype() {
            return Err(ConfigError::DTypeMismatch {
                what: "pooling dst".to_owned(),
                expected: src.dtype(),
                actual: dst.dtype(),
            }
            .into());
        }
        if src_dims[..2] != dst_dims[..2] {
            return Err(ConfigError::ShapeMismatch {
                what: "pooling dst batch or channels".to_owned(),
                expected: src.shape().clone(),
                actual: dst.shape().clone(),
            }
            .into());
        }

        for i in 0..2 {
            let out = window_out_size(
                src_dims[2 + i],
                params.kernel[i],
                params.strides[i],
                params.padding_l[i],
                params.padding_r[i],
                params.dilation[i],
            );
            if out != Some(dst_dims[2 + i]) {
                return Err(ConfigError::InvalidParameter(format!(
                    "pooling {:?} maps src {} to {:?}, but dst is {}",
                    params,
                    src.shape(),
                    out,
                    dst.shape()
                ))
                .into());
            }
        }

        let src = resolve_or("pooling", "src", src, &"acdb".parse::<FormatTag>()?)?;
        let dst = resolve_like("pooling", "dst", dst, &src)?;

        Ok(PrimitiveDesc::Pooling(PoolingDesc {
            engine: engine.clone(),
            alg,
            params,
            src,
            dst,
        }))
    }

    pub fn alg(&self) -> PoolingAlg {
        self.alg
    }

    pub(crate) fn problem(&self) -> String {
        let (src, dst, p) = (self.src.shape(), self.dst.shape(), &self.params);
        format!(
            "alg:{:?} mb{}ic{}_ih{}oh{}kh{}sh{}dh{}ph{}_iw{}ow{}kw{}sw{}dw{}pw{}",
            self.alg,
            src[0],
            src[1],
            src[2],
            dst[2],
            p.kernel[0],
            p.strides[0],
            p.dilation[0],
            p.padding_l[0],
            src[3],
            dst[3],
            p.kernel[1],
            p.strides[1],
            p.dilation[1],
            p.padding_l[1],
        )
    }

    pub(crate) fn run(&self, args: &BoundArgs) -> PfResult<()> {
        let src = fix_rank::<Ix4>(args.get(Arg::Src)?.to_ndarray()?)?;
        let dst = args.get(Arg::Dst)?;

        let (_, _, ih, iw) = src.dim();
        let dst_dims = require_fixed("pooling dst", dst.desc())?;
        let p = self.params;
        let kernel_size = (p.kernel[0] * p.kernel[1]) as f32;

        let shape = (dst_dims[0], dst_dims[1], dst_dims[2], dst_dims[3]);
        let output = Array4::from_shape_fn(shape, |(b, c, y, x)| {
            let mut max = f32::NEG_INFINITY;
            let mut sum = 0.0;
            let mut count = 0;

            for ky in 0..p.kernel[0] {
                let Some(sy) = window_input_pos(y, ky, p.strides[0], p.dilation[0], p.padding_l[0], ih) else {
                    continue;
                };
                for kx in 0..p.kernel[1] {
                    let Some(sx) = window_input_pos(x, kx, p.strides[1], p.dilation[1], p.padding_l[1], iw) else {
                        continue;
                    };
                    let v = src[(b, c, sy, sx)];
                    max = f32::max(max, v);
                    sum += v;
                    count += 1;
                }
            }

            match self.alg {
                _ if count == 0 => 0.0,
                PoolingAlg::Max => max,
                PoolingAlg::AvgIncludePadding => sum / kernel_size,
                PoolingAlg::AvgExcludePadding => sum / count as f32,
            }
        });

        dst.write_ndarray(&output.into_dyn())
    }
}
