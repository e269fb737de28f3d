use itertools::Itertools;
use ndarray::{Array2, ArrayD};
use rand::Rng;

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::{ConfigError, Error};
use pf_core::shape;
use pf_core::shape::Size;
use pf_engine::arg::{Arg, QuantTarget};
use pf_engine::attr::{AttrValues, EltwiseOp, PrimitiveAttr};
use pf_engine::engine::Engine;
use pf_engine::memory::Memory;
use pf_engine::primitive::matmul::MatMulDesc;
use pf_engine::primitive::Primitive;
use pf_engine::stream::Stream;
use pf_engine::tester::assert_tensors_match;

use crate::tensor_utils::{cpu, memory_of, rng_tensor, seeded_rng, tagged};

const K: usize = 6;
const N: usize = 4;

struct QuantizedMatMul {
    primitive: Primitive,
    weights: Memory,
    weight_values: Vec<i8>,
    scales: Memory,
    scale_values: Vec<f32>,
    zp_src: Memory,
    zp_dst: Memory,
}

const ZP_SRC: i32 = 128;
const ZP_DST: i32 = 10;

fn quantized_matmul(engine: &Engine, rng: &mut impl Rng) -> QuantizedMatMul {
    let src = tagged(shape![Size::RUNTIME, K], DType::U8, "ab");
    let weights = tagged(shape![K, N], DType::S8, "ab");
    let dst = tagged(shape![Size::RUNTIME, N], DType::U8, "ab");

    let mut attr = PrimitiveAttr::new();
    attr.set_output_scales(1 << 1, AttrValues::Runtime);
    attr.set_zero_points(QuantTarget::Src, 0, AttrValues::Runtime);
    attr.set_zero_points(QuantTarget::Dst, 0, AttrValues::Runtime);
    attr.append_eltwise(EltwiseOp::relu(0.0));

    let desc = MatMulDesc::new(engine, &src, &weights, None, &dst, &attr).unwrap();

    let weight_values = (0..K * N).map(|_| rng.gen_range(-8..=8)).collect_vec();
    let scale_values = (0..N).map(|n| 0.01 * (n + 1) as f32).collect_vec();

    QuantizedMatMul {
        primitive: Primitive::new(&desc),
        weights: Memory::from_slice(weights, engine, &weight_values).unwrap(),
        weight_values,
        scales: Memory::from_slice(tagged(shape![N], DType::F32, "a"), engine, &scale_values).unwrap(),
        scale_values,
        zp_src: Memory::from_slice(tagged(shape![1], DType::S32, "a"), engine, &[ZP_SRC]).unwrap(),
        zp_dst: Memory::from_slice(tagged(shape![1], DType::S32, "a"), engine, &[ZP_DST]).unwrap(),
    }
}

impl QuantizedMatMul {
    fn args<'a>(&'a self, src: &'a Memory, dst: &'a Memory) -> Vec<(Arg, &'a Memory)> {
        vec![
            (Arg::Src, src),
            (Arg::Weights, &self.weights),
            (Arg::Dst, dst),
            (Arg::AttrOutputScales, &self.scales),
            (Arg::AttrZeroPoints(QuantTarget::Src), &self.zp_src),
            (Arg::AttrZeroPoints(QuantTarget::Dst), &self.zp_dst),
        ]
    }

    /// The unrounded result, clamped into the u8 range.
    fn reference(&self, m: usize, src: &[u8]) -> Array2<f32> {
        Array2::from_shape_fn((m, N), |(i, j)| {
            let acc: i32 = (0..K)
                .map(|k| (src[i * K + k] as i32 - ZP_SRC) * self.weight_values[k * N + j] as i32)
                .sum();
            let y = f32::max(acc as f32 * self.scale_values[j], 0.0) + ZP_DST as f32;
            y.clamp(0.0, 255.0)
        })
    }
}

#[test]
fn one_stage_for_every_row_count() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let mut rng = seeded_rng();
    let matmul = quantized_matmul(&engine, &mut rng);

    for m in [1, 100] {
        let src_values = (0..m * K).map(|_| rng.gen::<u8>()).collect_vec();
        let src = Memory::from_slice(tagged(shape![m, K], DType::U8, "ab"), &engine, &src_values).unwrap();
        let dst = Memory::new(tagged(shape![m, N], DType::U8, "ab"), &engine).unwrap();

        matmul.primitive.execute(&stream, &matmul.args(&src, &dst)).unwrap();
        stream.wait().unwrap();

        let actual = dst.read_to_vec::<u8>().unwrap();
        assert!(actual.iter().all(|&x| x as i32 >= ZP_DST));

        let expected = matmul.reference(m, &src_values);
        for (&a, &e) in actual.iter().zip_eq(expected.iter()) {
            assert!((a as f32 - e).abs() <= 0.5 + 1e-3, "expected {} got {}", e, a);
        }
    }
}

#[test]
fn runtime_sizes_must_agree() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let matmul = quantized_matmul(&engine, &mut seeded_rng());

    let src = Memory::new(tagged(shape![3, K], DType::U8, "ab"), &engine).unwrap();
    let dst = Memory::new(tagged(shape![5, N], DType::U8, "ab"), &engine).unwrap();
    let result = matmul.primitive.execute(&stream, &matmul.args(&src, &dst));
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::RuntimeDimMismatch {
            expected: 3,
            actual: 5,
            ..
        }))
    ));
    assert_eq!(stream.pending().unwrap(), 0);
}

#[test]
fn wrong_inner_dimension_before_submission() {
    let engine = cpu();
    let stream = Stream::new(&engine);

    let src = tagged(shape![Size::RUNTIME, 96], DType::F32, "ab");
    let weights = tagged(shape![96, 8], DType::F32, "ab");
    let dst = tagged(shape![Size::RUNTIME, 8], DType::F32, "ab");
    let desc = MatMulDesc::new(&engine, &src, &weights, None, &dst, &PrimitiveAttr::new()).unwrap();
    let primitive = Primitive::new(&desc);

    let src = Memory::new(tagged(shape![4, 64], DType::F32, "ab"), &engine).unwrap();
    let weights = Memory::new(weights, &engine).unwrap();
    let dst = Memory::new(tagged(shape![4, 8], DType::F32, "ab"), &engine).unwrap();

    let result = primitive.execute(&stream, &[(Arg::Src, &src), (Arg::Weights, &weights), (Arg::Dst, &dst)]);
    assert!(matches!(result, Err(Error::Config(ConfigError::ShapeMismatch { .. }))));
    assert_eq!(stream.pending().unwrap(), 0);

    // the same mismatch is caught when the stage is constructed
    let short_weights = tagged(shape![64, 8], DType::F32, "ab");
    let result = MatMulDesc::new(&engine, &src_desc(96), &short_weights, None, &dst_desc(8), &PrimitiveAttr::new());
    assert!(matches!(result, Err(Error::Config(ConfigError::ShapeMismatch { .. }))));
}

fn src_desc(k: usize) -> MemoryDesc {
    tagged(shape![Size::RUNTIME, k], DType::F32, "ab")
}

fn dst_desc(n: usize) -> MemoryDesc {
    tagged(shape![Size::RUNTIME, n], DType::F32, "ab")
}

#[test]
fn runtime_dims_only_on_rows() {
    let engine = cpu();
    let attr = PrimitiveAttr::new();

    let weights = tagged(shape![Size::RUNTIME, 8], DType::F32, "ab");
    let result = MatMulDesc::new(&engine, &src_desc(16), &weights, None, &dst_desc(8), &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::RuntimeDimNotAllowed { .. }))));

    let any_src = MemoryDesc::any(shape![Size::RUNTIME, 16], DType::F32).unwrap();
    let weights = tagged(shape![16, 8], DType::F32, "ab");
    let result = MatMulDesc::new(&engine, &any_src, &weights, None, &dst_desc(8), &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::RuntimeDimNotAllowed { .. }))));

    // masking the runtime axis would need a runtime number of scales
    let mut masked = PrimitiveAttr::new();
    masked.set_output_scales(1 << 0, AttrValues::Runtime);
    let result = MatMulDesc::new(&engine, &src_desc(16), &weights, None, &dst_desc(8), &masked);
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidAttribute(_)))));
}

#[test]
fn weights_placeholder_is_transposed() {
    let engine = cpu();
    let src = MemoryDesc::any(shape![2, 5, 16], DType::F32).unwrap();
    let weights = MemoryDesc::any(shape![2, 16, 8], DType::F32).unwrap();
    let dst = MemoryDesc::any(shape![2, 5, 8], DType::F32).unwrap();
    let desc = MatMulDesc::new(&engine, &src, &weights, None, &dst, &PrimitiveAttr::new()).unwrap();

    assert_eq!(desc.query_md(Arg::Weights), Some(&tagged(shape![2, 16, 8], DType::F32, "acb")));
    assert_eq!(desc.query_md(Arg::Src), Some(&tagged(shape![2, 5, 16], DType::F32, "abc")));
}

#[test]
fn float_matmul_with_bias() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let mut rng = seeded_rng();

    let a = rng_tensor(&[5, 7], &mut rng);
    let b = rng_tensor(&[7, 3], &mut rng);
    let bias = rng_tensor(&[1, 3], &mut rng);

    let a2: Array2<f32> = a.clone().into_dimensionality().unwrap();
    let b2: Array2<f32> = b.clone().into_dimensionality().unwrap();
    let bias2: Array2<f32> = bias.clone().into_dimensionality().unwrap();
    let expected: ArrayD<f32> = (a2.dot(&b2) + &bias2).into_dyn();

    let src = memory_of(&engine, shape![5, 7], "ab", &a);
    let weights = memory_of(&engine, shape![7, 3], "ba", &b);
    let bias = memory_of(&engine, shape![1, 3], "ab", &bias);
    let dst = Memory::new(tagged(shape![5, 3], DType::F32, "ab"), &engine).unwrap();

    let desc = MatMulDesc::new(
        &engine,
        src.desc(),
        weights.desc(),
        Some(bias.desc()),
        dst.desc(),
        &PrimitiveAttr::new(),
    )
    .unwrap();
    let args = [
        (Arg::Src, &src),
        (Arg::Weights, &weights),
        (Arg::Bias, &bias),
        (Arg::Dst, &dst),
    ];
    Primitive::new(&desc).execute(&stream, &args).unwrap();
    stream.wait().unwrap();

    assert_tensors_match(&[expected], &[dst.to_ndarray().unwrap()], false);
}

#[test]
fn float_sources_reject_zero_points() {
    let engine = cpu();
    let mut attr = PrimitiveAttr::new();
    attr.set_zero_points(QuantTarget::Src, 0, AttrValues::Fixed(vec![1]));

    let weights = tagged(shape![16, 8], DType::F32, "ab");
    let result = MatMulDesc::new(&engine, &src_desc(16), &weights, None, &dst_desc(8), &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidAttribute(_)))));
}

#[test]
fn s32_destination_keeps_every_bit() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let k = 1025;

    let src = Memory::from_slice(tagged(shape![1, k], DType::U8, "ab"), &engine, &vec![255u8; k]).unwrap();
    let weights = Memory::from_slice(tagged(shape![k, 1], DType::S8, "ab"), &engine, &vec![127i8; k]).unwrap();
    let dst = Memory::new(tagged(shape![1, 1], DType::S32, "ab"), &engine).unwrap();

    let attr = PrimitiveAttr::new();
    let desc = MatMulDesc::new(&engine, src.desc(), weights.desc(), None, dst.desc(), &attr).unwrap();
    Primitive::new(&desc)
        .execute(&stream, &[(Arg::Src, &src), (Arg::Weights, &weights), (Arg::Dst, &dst)])
        .unwrap();
    stream.wait().unwrap();

    // above 2^24, so an f32 round trip would lose the last bit
    assert_eq!(dst.read_to_vec::<i32>().unwrap(), vec![255 * 127 * 1025]);
}
