use itertools::Itertools;
use ndarray::{Array2, ArrayD, Ix2};
use rand::Rng;
use tracing::{debug, info};

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::ConfigError;
use pf_core::shape;
use pf_core::shape::Size;
use pf_engine::arg::{Arg, QuantTarget};
use pf_engine::attr::{AttrValues, EltwiseOp, PrimitiveAttr};
use pf_engine::engine::Engine;
use pf_engine::memory::Memory;
use pf_engine::primitive::matmul::MatMulDesc;
use pf_engine::primitive::reorder::ReorderDesc;
use pf_engine::primitive::Primitive;
use pf_engine::stream::Stream;

use crate::tutorials::uniform_vec;
use crate::{TutorialError, TutorialResult};

const ZP_SRC: i32 = 128;
const ZP_DST: i32 = 40;
const WEIGHT_SCALE: f32 = 127.0;

#[derive(Debug, Clone)]
pub struct Int8MatMulConfig {
    pub k: usize,
    pub n: usize,
    /// The row counts to run the single compiled matmul with.
    pub rows: Vec<usize>,
    /// Executions per row count.
    pub runs: usize,
}

impl Default for Int8MatMulConfig {
    fn default() -> Self {
        Int8MatMulConfig {
            k: 96,
            n: 1000,
            rows: vec![1, 100],
            runs: 1,
        }
    }
}

/// Compile a `u8 x s8 -> u8` matmul with an unknown row count and runtime quantization parameters once,
/// then execute it for every row count in the config.
pub fn int8_matmul(engine: &Engine, config: &Int8MatMulConfig, rng: &mut impl Rng) -> TutorialResult<()> {
    let Int8MatMulConfig { k, n, ref rows, runs } = *config;
    let stream = Stream::new(engine);

    let src_md = MemoryDesc::with_strides(shape![Size::RUNTIME, k], DType::U8, &[k, 1])?;
    let weights_md = MemoryDesc::any(shape![k, n], DType::S8)?;
    let dst_md = MemoryDesc::with_strides(shape![Size::RUNTIME, n], DType::U8, &[n, 1])?;

    // a scale per output column, the zero points are common
    let mut attr = PrimitiveAttr::new();
    attr.set_output_scales(1 << 1, AttrValues::Runtime);
    attr.set_zero_points(QuantTarget::Src, 0, AttrValues::Runtime);
    attr.set_zero_points(QuantTarget::Dst, 0, AttrValues::Runtime);
    attr.append_eltwise(EltwiseOp::relu(0.0));

    let matmul_desc = MatMulDesc::new(engine, &src_md, &weights_md, None, &dst_md, &attr)?;
    let matmul = Primitive::new(&matmul_desc);

    // quantize the weights once, straight into the layout the matmul picked
    let weight_values = uniform_vec(k * n, rng).into_iter().map(|x| 2.0 * x - 1.0).collect_vec();
    let weights_f32_md = MemoryDesc::with_tag(shape![k, n], DType::F32, "ab")?;
    let weights_f32 = Memory::from_slice(weights_f32_md, engine, &weight_values)?;
    let weights = Memory::new(matmul_desc.resolve(Arg::Weights, &weights_md)?, engine)?;

    let mut quant_attr = PrimitiveAttr::new();
    quant_attr.set_output_scales(0, AttrValues::Fixed(vec![WEIGHT_SCALE]));
    let quantize = ReorderDesc::new(engine, weights_f32.desc(), weights.desc(), &quant_attr)?;
    Primitive::new(&quantize).execute(&stream, &[(Arg::From, &weights_f32), (Arg::To, &weights)])?;

    let scale_values = uniform_vec(n, rng)
        .into_iter()
        .map(|x| x / (WEIGHT_SCALE * 16.0))
        .collect_vec();
    let scales = Memory::from_slice(MemoryDesc::with_tag(shape![n], DType::F32, "a")?, engine, &scale_values)?;
    let zp_desc = MemoryDesc::with_tag(shape![1], DType::S32, "a")?;
    let zp_src = Memory::from_slice(zp_desc.clone(), engine, &[ZP_SRC])?;
    let zp_dst = Memory::from_slice(zp_desc, engine, &[ZP_DST])?;

    stream.wait()?;
    let quantized_weights = weights.to_ndarray()?;
    debug!("int8-matmul: weights quantized into {}", weights.desc());

    for &m in rows {
        let src_values = (0..m * k).map(|_| rng.gen::<u8>()).collect_vec();
        let src = Memory::from_slice(src_md.bind(m), engine, &src_values)?;
        let dst = Memory::new(dst_md.bind(m), engine)?;

        let args = [
            (Arg::Src, &src),
            (Arg::Weights, &weights),
            (Arg::Dst, &dst),
            (Arg::AttrOutputScales, &scales),
            (Arg::AttrZeroPoints(QuantTarget::Src), &zp_src),
            (Arg::AttrZeroPoints(QuantTarget::Dst), &zp_dst),
        ];
        for _ in 0..runs {
            matmul.execute(&stream, &args)?;
        }
        stream.wait()?;

        let actual = dst.read_to_vec::<u8>()?;
        let expected = reference(&src_values, m, &quantized_weights, &scale_values)?;
        for ((i, j), &e) in expected.indexed_iter() {
            let a = actual[i * n + j];
            if (a as i32) < ZP_DST || (a as f32 - e).abs() > 0.5 + 1e-3 {
                return Err(TutorialError::Accuracy {
                    index: vec![i, j],
                    expected: e,
                    actual: a as f32,
                });
            }
        }

        info!("int8-matmul: M={} ran {} times on {}", m, runs, matmul.desc().problem());
    }

    Ok(())
}

/// The unrounded result clamped into the `u8` range.
fn reference(src: &[u8], m: usize, weights: &ArrayD<f32>, scales: &[f32]) -> Result<Array2<f32>, ConfigError> {
    let weights = weights
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| ConfigError::InvalidParameter(e.to_string()))?;
    let (k, n) = weights.dim();

    Ok(Array2::from_shape_fn((m, n), |(i, j)| {
        let acc: f32 = (0..k)
            .map(|kk| (src[i * k + kk] as i32 - ZP_SRC) as f32 * weights[(kk, j)])
            .sum();
        let y = f32::max(acc * scales[j], 0.0) + ZP_DST as f32;
        y.clamp(0.0, 255.0)
    }))
}
