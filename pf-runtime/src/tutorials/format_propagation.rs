use ndarray::{s, Array2, Array4, ArrayD, Axis, Ix4};
use rand::Rng;
use tracing::info;

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::ConfigError;
use pf_core::shape;
use pf_engine::arg::Arg;
use pf_engine::attr::PrimitiveAttr;
use pf_engine::engine::Engine;
use pf_engine::memory::Memory;
use pf_engine::pipeline::Pipeline;
use pf_engine::primitive::conv::{ConvAlgorithm, ConvDesc, ConvParams};
use pf_engine::primitive::pooling::{PoolingAlg, PoolingDesc, PoolingParams};
use pf_engine::stream::Stream;

use crate::tutorials::{check_against_reference, uniform_vec};
use crate::TutorialResult;

/// Problem size of the convolution followed by max pooling. Both keep the spatial size.
#[derive(Debug, Copy, Clone)]
pub struct FormatPropagationConfig {
    pub batch: usize,
    pub channels_in: usize,
    pub channels_out: usize,
    pub size: usize,
    /// Odd kernel size, shared by the convolution and the pooling.
    pub kernel: usize,
}

impl Default for FormatPropagationConfig {
    fn default() -> Self {
        FormatPropagationConfig {
            batch: 1,
            channels_in: 128,
            channels_out: 256,
            size: 14,
            kernel: 3,
        }
    }
}

/// Let a convolution pick its layouts, feed it NCHW user buffers and check the pooled result.
///
/// Returns the number of reorders that were inserted.
pub fn format_propagation(
    engine: &Engine,
    config: &FormatPropagationConfig,
    rng: &mut impl Rng,
) -> TutorialResult<usize> {
    let FormatPropagationConfig {
        batch: n,
        channels_in: ic,
        channels_out: oc,
        size,
        kernel: k,
    } = *config;
    if k % 2 == 0 {
        return Err(ConfigError::InvalidParameter(format!("kernel size must be odd, got {}", k)).into());
    }
    let stream = Stream::new(engine);

    // let the convolution choose the formats
    let conv_src_md = MemoryDesc::any(shape![n, ic, size, size], DType::F32)?;
    let conv_weights_md = MemoryDesc::any(shape![oc, ic, k, k], DType::F32)?;
    let conv_dst_md = MemoryDesc::any(shape![n, oc, size, size], DType::F32)?;
    let pool_dst_md = conv_dst_md.clone();

    let conv = ConvDesc::new(
        engine,
        ConvAlgorithm::Auto,
        &conv_src_md,
        &conv_weights_md,
        None,
        &conv_dst_md,
        ConvParams::padded([k / 2, k / 2]),
        &PrimitiveAttr::new(),
    )?;
    let pool = PoolingDesc::new(
        engine,
        PoolingAlg::Max,
        &conv.resolve(Arg::Dst, &conv_dst_md)?,
        &pool_dst_md,
        PoolingParams::same([k, k]),
    )?;

    let src_values = ArrayD::from_shape_vec(vec![n, ic, size, size], uniform_vec(n * ic * size * size, rng))
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()))?;
    let weight_values = ArrayD::from_shape_vec(vec![oc, ic, k, k], uniform_vec(oc * ic * k * k, rng))
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()))?;

    let src_mem = Memory::from_ndarray(
        MemoryDesc::with_tag(shape![n, ic, size, size], DType::F32, "nchw")?,
        engine,
        &src_values,
    )?;
    let weights_mem = Memory::from_ndarray(
        MemoryDesc::with_tag(shape![oc, ic, k, k], DType::F32, "oihw")?,
        engine,
        &weight_values,
    )?;
    let dst_mem = Memory::new(MemoryDesc::with_tag(shape![n, oc, size, size], DType::F32, "nchw")?, engine)?;

    let mut pipeline = Pipeline::new(engine);
    let conv_src_mem = pipeline.input(&conv, Arg::Src, &src_mem)?;
    let conv_weights_mem = pipeline.input(&conv, Arg::Weights, &weights_mem)?;
    let conv_dst_mem = pipeline.scratch(&conv, Arg::Dst)?;
    let pool_dst_mem = pipeline.output(&pool, Arg::Dst, &dst_mem)?;

    pipeline.stage(
        &conv,
        &[
            (Arg::Src, &conv_src_mem),
            (Arg::Weights, &conv_weights_mem),
            (Arg::Dst, &conv_dst_mem),
        ],
    )?;
    pipeline.stage(&pool, &[(Arg::Src, &conv_dst_mem), (Arg::Dst, &pool_dst_mem)])?;
    pipeline.execute(&stream)?;

    info!(
        "format-propagation: {} reorders and {} intermediate buffers for {:?}",
        pipeline.reorder_count(),
        pipeline.intermediate_count(),
        config
    );

    let expected = reference_max_pool(&reference_conv(&src_values, &weight_values)?, k);
    check_against_reference(&expected.into_dyn(), &dst_mem.to_ndarray()?)?;

    Ok(pipeline.reorder_count())
}

/// Same-padded, unit stride convolution as a sum of one matrix product per kernel position.
fn reference_conv(src: &ArrayD<f32>, weights: &ArrayD<f32>) -> Result<Array4<f32>, ConfigError> {
    let invalid = |e: ndarray::ShapeError| ConfigError::InvalidParameter(e.to_string());
    let src = src.clone().into_dimensionality::<Ix4>().map_err(invalid)?;
    let weights = weights.clone().into_dimensionality::<Ix4>().map_err(invalid)?;

    let (n, ic, h, w) = src.dim();
    let (oc, _, k, _) = weights.dim();
    let p = k / 2;

    let mut padded = Array4::<f32>::zeros((n, ic, h + 2 * p, w + 2 * p));
    padded.slice_mut(s![.., .., p..p + h, p..p + w]).assign(&src);

    let mut result = Array4::<f32>::zeros((n, oc, h, w));
    for ky in 0..k {
        for kx in 0..k {
            let kernel: Array2<f32> = weights.slice(s![.., .., ky, kx]).to_owned();
            for b in 0..n {
                let window = padded.slice(s![b, .., ky..ky + h, kx..kx + w]).to_owned();
                let window = window.into_shape((ic, h * w)).map_err(invalid)?;
                let product = kernel.dot(&window).into_shape((oc, h, w)).map_err(invalid)?;
                let mut out = result.index_axis_mut(Axis(0), b);
                out += &product;
            }
        }
    }

    Ok(result)
}

/// Same-padded, unit stride max pooling, padding never wins.
fn reference_max_pool(src: &Array4<f32>, k: usize) -> Array4<f32> {
    let (n, c, h, w) = src.dim();
    let p = k / 2;

    let mut padded = Array4::<f32>::from_elem((n, c, h + 2 * p, w + 2 * p), f32::NEG_INFINITY);
    padded.slice_mut(s![.., .., p..p + h, p..p + w]).assign(src);

    let mut result = Array4::<f32>::from_elem((n, c, h, w), f32::NEG_INFINITY);
    for ky in 0..k {
        for kx in 0..k {
            let window = padded.slice(s![.., .., ky..ky + h, kx..kx + w]);
            result.zip_mut_with(&window, |r, &x| *r = f32::max(*r, x));
        }
    }
    result
}
