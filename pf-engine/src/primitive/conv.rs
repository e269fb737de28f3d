use ndarray::{Array4, Ix1, Ix4};

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::{ConfigError, PfResult};
use pf_core::layout::FormatTag;

use crate::arg::Arg;
use crate::attr::{scale_index, AttrSupport, AttrValues, PrimitiveAttr};
use crate::engine::Engine;
use crate::primitive::{
    fix_rank, require_dtype, require_fixed, require_rank, resolve_or, window_input_pos, window_out_size, BoundArgs,
    PrimitiveDesc,
};

const SUPPORT: AttrSupport = AttrSupport {
    output_scales: true,
    runtime_scales: false,
    zero_points: false,
    post_ops: true,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ConvAlgorithm {
    Direct,
    /// Let the engine pick, currently always [ConvAlgorithm::Direct].
    Auto,
}

/// Spatial parameters, indexed `[height, width]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConvParams {
    pub strides: [usize; 2],
    pub padding_l: [usize; 2],
    pub padding_r: [usize; 2],
    /// Extra gap between kernel elements, zero for a dense kernel.
    pub dilation: [usize; 2],
}

/// A 2D forward convolution over NCHW logical tensors with OIHW weights.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConvDesc {
    pub(crate) engine: Engine,
    pub(crate) alg: ConvAlgorithm,
    pub(crate) params: ConvParams,
    pub(crate) attr: PrimitiveAttr,
    pub(crate) src: MemoryDesc,
    pub(crate) weights: MemoryDesc,
    pub(crate) bias: Option<MemoryDesc>,
    pub(crate) dst: MemoryDesc,
}

impl ConvParams {
    /// Unit stride, dense kernel, the same padding on both sides.
    pub fn padded(padding: [usize; 2]) -> ConvParams {
        ConvParams {
            strides: [1, 1],
            padding_l: padding,
            padding_r: padding,
            dilation: [0, 0],
        }
    }
}

impl Default for ConvParams {
    fn default() -> Self {
        ConvParams::padded([0, 0])
    }
}

impl ConvDesc {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: &Engine,
        alg: ConvAlgorithm,
        src: &MemoryDesc,
        weights: &MemoryDesc,
        bias: Option<&MemoryDesc>,
        dst: &MemoryDesc,
        params: ConvParams,
        attr: &PrimitiveAttr,
    ) -> PfResult<PrimitiveDesc> {
        let alg = match alg {
            ConvAlgorithm::Direct | ConvAlgorithm::Auto => ConvAlgorithm::Direct,
        };

        require_rank("convolution src", src, &[4])?;
        require_rank("convolution weights", weights, &[4])?;
        require_rank("convolution dst", dst, &[4])?;
        let src_dims = require_fixed("convolution src", src)?;
        let weight_dims = require_fixed("convolution weights", weights)?;
        let dst_dims = require_fixed("convolution dst", dst)?;

        require_dtype("convolution src", src, &[DType::F32])?;
        require_dtype("convolution weights", weights, &[DType::F32])?;
        require_dtype("convolution dst", dst, &[DType::F32])?;

        let (n, ic) = (src_dims[0], src_dims[1]);
        let (oc, kernel) = (weight_dims[0], [weight_dims[2], weight_dims[3]]);
        if weight_dims[1] != ic {
            return Err(ConfigError::ShapeMismatch {
                what: "convolution weight input channels".to_owned(),
                expected: src.shape().clone(),
                actual: weights.shape().clone(),
            }
            .into());
        }
        if dst_dims[0] != n || dst_dims[1] != oc {
            return Err(ConfigError::ShapeMismatch {
                what: "convolution dst batch or channels".to_owned(),
                expected: src.shape().clone(),
                actual: dst.shape().clone(),
            }
            .into());
        }

        for i in 0..2 {
            let out = window_out_size(
                src_dims[2 + i],
                kernel[i],
                params.strides[i],
                params.padding_l[i],
                params.padding_r[i],
                params.dilation[i],
            );
            if out != Some(dst_dims[2 + i]) {
                return Err(ConfigError::InvalidParameter(format!(
                    "convolution {:?} with kernel {:?} maps src {} to {:?}, but dst is {}",
                    params,
                    kernel,
                    src.shape(),
                    out,
                    dst.shape()
                ))
                .into());
            }
        }

        let bias = match bias {
            None => None,
            Some(bias) => {
                require_rank("convolution bias", bias, &[1])?;
                require_dtype("convolution bias", bias, &[DType::F32])?;
                if require_fixed("convolution bias", bias)? != [oc] {
                    return Err(ConfigError::ShapeMismatch {
                        what: "convolution bias".to_owned(),
                        expected: pf_core::shape![oc],
                        actual: bias.shape().clone(),
                    }
                    .into());
                }
                Some(resolve_or("convolution", "bias", bias, &FormatTag::plain(1))?)
            }
        };

        attr.validate("convolution", SUPPORT, dst.shape())?;

        let channels_last: FormatTag = "acdb".parse()?;
        let weights_tag: FormatTag = if oc % 8 == 0 { "Acdb8a".parse()? } else { channels_last.clone() };

        Ok(PrimitiveDesc::Conv(ConvDesc {
            engine: engine.clone(),
            alg,
            params,
            attr: attr.clone(),
            src: resolve_or("convolution", "src", src, &channels_last)?,
            weights: resolve_or("convolution", "weights", weights, &weights_tag)?,
            bias,
            dst: resolve_or("convolution", "dst", dst, &channels_last)?,
        }))
    }

    pub fn alg(&self) -> ConvAlgorithm {
        self.alg
    }

    pub fn params(&self) -> ConvParams {
        self.params
    }

    pub(crate) fn problem(&self) -> String {
        let src = self.src.shape();
        let dst = self.dst.shape();
        let w = self.weights.shape();
        let p = &self.params;
        format!(
            "alg:{:?} mb{}_ic{}oc{}_ih{}oh{}kh{}sh{}dh{}ph{}_iw{}ow{}kw{}sw{}dw{}pw{}",
            self.alg,
            src[0],
            src[1],
            dst[1],
            src[2],
            dst[2],
            w[2],
            p.strides[0],
            p.dilation[0],
            p.padding_l[0],
            src[3],
            dst[3],
            w[3],
            p.strides[1],
            p.dilation[1],
            p.padding_l[1],
        )
    }

    pub(crate) fn run(&self, args: &BoundArgs) -> PfResult<()> {
        let src = fix_rank::<Ix4>(args.get(Arg::Src)?.to_ndarray()?)?;
        let weights = fix_rank::<Ix4>(args.get(Arg::Weights)?.to_ndarray()?)?;
        let bias = match args.get_opt(Arg::Bias) {
            Some(bias) => Some(fix_rank::<Ix1>(bias.to_ndarray()?)?),
            None => None,
        };
        let dst = args.get(Arg::Dst)?;

        let (_, ic, ih, iw) = src.dim();
        let (_, _, kh, kw) = weights.dim();
        let dst_dims = require_fixed("convolution dst", dst.desc())?;
        let p = self.params;

        let scales = match self.attr.output_scales() {
            Some(scales) => match &scales.values {
                AttrValues::Fixed(values) => {
                    let values = values.iter().map(|v| v.into_inner()).collect::<Vec<f32>>();
                    Some((scales.mask, values))
                }
                AttrValues::Runtime => {
                    let message = "convolution with runtime output scales".to_owned();
                    return Err(ConfigError::InvalidAttribute(message).into());
                }
            },
            None => None,
        };

        let shape = (dst_dims[0], dst_dims[1], dst_dims[2], dst_dims[3]);
        let output = Array4::from_shape_fn(shape, |(b, o, y, x)| {
            let mut acc = 0.0;
            for ky in 0..kh {
                let Some(sy) = window_input_pos(y, ky, p.strides[0], p.dilation[0], p.padding_l[0], ih) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(sx) = window_input_pos(x, kx, p.strides[1], p.dilation[1], p.padding_l[1], iw) else {
                        continue;
                    };
                    for c in 0..ic {
                        acc += src[(b, c, sy, sx)] * weights[(o, c, ky, kx)];
                    }
                }
            }

            if let Some((mask, values)) = &scales {
                acc *= values[scale_index(*mask, &dst_dims, &[b, o, y, x])];
            }
            if let Some(bias) = &bias {
                acc += bias[o];
            }
            self.attr.apply_post_ops(acc)
        });

        dst.write_ndarray(&output.into_dyn())
    }
}
