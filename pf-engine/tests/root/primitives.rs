use ndarray::{Array4, ArrayD, Ix1, Ix4};

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::error::{ConfigError, Error};
use pf_core::shape;
use pf_engine::arg::{Arg, QuantTarget};
use pf_engine::attr::{AttrValues, EltwiseAlg, EltwiseOp, PrimitiveAttr};
use pf_engine::memory::Memory;
use pf_engine::pipeline::Pipeline;
use pf_engine::primitive::conv::{ConvAlgorithm, ConvDesc, ConvParams};
use pf_engine::primitive::eltwise::EltwiseDesc;
use pf_engine::primitive::pooling::{PoolingAlg, PoolingDesc, PoolingParams};
use pf_engine::primitive::reorder::ReorderDesc;
use pf_engine::primitive::{Primitive, PrimitiveDesc};
use pf_engine::stream::Stream;
use pf_engine::tester::assert_tensors_match;

use crate::tensor_utils::{cpu, manual_tensor, memory_of, range_vec, rng_tensor, seeded_rng, tagged};

fn reference_conv(src: &ArrayD<f32>, weights: &ArrayD<f32>, bias: &ArrayD<f32>, pad: usize) -> ArrayD<f32> {
    let src = src.clone().into_dimensionality::<Ix4>().unwrap();
    let weights = weights.clone().into_dimensionality::<Ix4>().unwrap();
    let bias = bias.clone().into_dimensionality::<Ix1>().unwrap();

    let (n, ic, h, w) = src.dim();
    let (oc, _, kh, kw) = weights.dim();
    let oh = h + 2 * pad + 1 - kh;
    let ow = w + 2 * pad + 1 - kw;

    let result = Array4::from_shape_fn((n, oc, oh, ow), |(b, o, y, x)| {
        let mut acc = bias[o];
        for c in 0..ic {
            for ky in 0..kh {
                for kx in 0..kw {
                    let sy = (y + ky) as isize - pad as isize;
                    let sx = (x + kx) as isize - pad as isize;
                    if sy >= 0 && sx >= 0 && (sy as usize) < h && (sx as usize) < w {
                        acc += src[(b, c, sy as usize, sx as usize)] * weights[(o, c, ky, kx)];
                    }
                }
            }
        }
        acc
    });
    result.into_dyn()
}

fn run(stage: &PrimitiveDesc, args: &[(Arg, &Memory)]) {
    let stream = Stream::new(stage.engine());
    Primitive::new(stage).execute(&stream, args).unwrap();
    stream.wait().unwrap();
}

#[test]
fn eltwise_dst_placeholder_follows_src() {
    let engine = cpu();
    let src = tagged(shape![1, 3, 4, 5], DType::F32, "nhwc");
    let dst = MemoryDesc::any(shape![1, 3, 4, 5], DType::U8).unwrap();
    let stage = EltwiseDesc::new(&engine, EltwiseOp::relu(0.0), &src, &dst).unwrap();

    assert_eq!(stage.query_md(Arg::Dst), Some(&tagged(shape![1, 3, 4, 5], DType::U8, "nhwc")));
}

#[test]
fn eltwise_dst_placeholder_keeps_src_strides() {
    let engine = cpu();
    // the size-1 axis makes the strides ambiguous as a format tag
    let tied = tagged(shape![2, 1, 3], DType::F32, "acb");
    let padded = MemoryDesc::with_strides(shape![2, 3], DType::F32, &[8, 1]).unwrap();

    for src in [tied, padded] {
        let dst = MemoryDesc::any(src.shape().clone(), DType::F32).unwrap();
        let stage = EltwiseDesc::new(&engine, EltwiseOp::relu(0.0), &src, &dst).unwrap();
        let resolved = stage.query_md(Arg::Dst).unwrap();
        assert_eq!(resolved.blocking(), src.blocking());

        let input = Memory::new(src.clone(), &engine).unwrap();
        let output = Memory::new(src.clone(), &engine).unwrap();
        Primitive::new(&stage)
            .validate(&engine, &[(Arg::Src, &input), (Arg::Dst, &output)])
            .unwrap();
    }
}

#[test]
fn eltwise_rejects_empty_clip() {
    let engine = cpu();
    let desc = tagged(shape![4], DType::F32, "a");
    let clip = EltwiseOp::new(EltwiseAlg::Clip, 1.0, -1.0);
    let result = EltwiseDesc::new(&engine, clip, &desc, &desc);
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidParameter(_)))));
}

#[test]
fn conv_weight_policy() {
    let engine = cpu();
    let src = MemoryDesc::any(shape![1, 3, 8, 8], DType::F32).unwrap();
    let params = ConvParams::padded([1, 1]);

    for (oc, tag) in [(8, "Acdb8a"), (3, "acdb")] {
        let weights = MemoryDesc::any(shape![oc, 3, 3, 3], DType::F32).unwrap();
        let dst = MemoryDesc::any(shape![1, oc, 8, 8], DType::F32).unwrap();
        let attr = PrimitiveAttr::new();
        let stage = ConvDesc::new(&engine, ConvAlgorithm::Auto, &src, &weights, None, &dst, params, &attr).unwrap();

        assert_eq!(stage.query_md(Arg::Weights), Some(&tagged(shape![oc, 3, 3, 3], DType::F32, tag)));
        assert_eq!(stage.query_md(Arg::Src), Some(&tagged(shape![1, 3, 8, 8], DType::F32, "nhwc")));
        assert_eq!(stage.query_md(Arg::Bias), None);

        match &stage {
            PrimitiveDesc::Conv(conv) => assert_eq!(conv.alg(), ConvAlgorithm::Direct),
            other => panic!("Expected convolution, got {:?}", other),
        }
    }
}

#[test]
fn conv_matches_reference_in_any_layout() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let mut rng = seeded_rng();

    let src_values = rng_tensor(&[2, 3, 6, 6], &mut rng);
    let weight_values = rng_tensor(&[8, 3, 3, 3], &mut rng);
    let bias_values = rng_tensor(&[8], &mut rng);
    let expected = reference_conv(&src_values, &weight_values, &bias_values, 1);

    let params = ConvParams::padded([1, 1]);
    let attr = PrimitiveAttr::new();
    let any = |shape| MemoryDesc::any(shape, DType::F32).unwrap();
    let bias_desc = tagged(shape![8], DType::F32, "a");
    let stage = ConvDesc::new(
        &engine,
        ConvAlgorithm::Direct,
        &any(shape![2, 3, 6, 6]),
        &any(shape![8, 3, 3, 3]),
        Some(&bias_desc),
        &any(shape![2, 8, 6, 6]),
        params,
        &attr,
    )
    .unwrap();

    let src_user = memory_of(&engine, shape![2, 3, 6, 6], "nchw", &src_values);
    let weights_user = memory_of(&engine, shape![8, 3, 3, 3], "oihw", &weight_values);
    let bias_user = memory_of(&engine, shape![8], "a", &bias_values);
    let dst_user = Memory::new(tagged(shape![2, 8, 6, 6], DType::F32, "nchw"), &engine).unwrap();

    let mut pipeline = Pipeline::new(&engine);
    let src = pipeline.input(&stage, Arg::Src, &src_user).unwrap();
    let weights = pipeline.input(&stage, Arg::Weights, &weights_user).unwrap();
    let bias = pipeline.input(&stage, Arg::Bias, &bias_user).unwrap();
    let dst = pipeline.output(&stage, Arg::Dst, &dst_user).unwrap();
    pipeline
        .stage(
            &stage,
            &[(Arg::Src, &src), (Arg::Weights, &weights), (Arg::Bias, &bias), (Arg::Dst, &dst)],
        )
        .unwrap();
    assert_eq!(pipeline.reorder_count(), 3);
    pipeline.execute(&stream).unwrap();

    let actual = dst_user.to_ndarray().unwrap();
    assert_tensors_match(&[expected], &[actual.clone()], false);

    // the same convolution on plain buffers gives bit-identical results
    let plain_stage = ConvDesc::new(
        &engine,
        ConvAlgorithm::Direct,
        src_user.desc(),
        weights_user.desc(),
        Some(bias_user.desc()),
        dst_user.desc(),
        params,
        &attr,
    )
    .unwrap();
    let plain_dst = Memory::new(dst_user.desc().clone(), &engine).unwrap();
    run(
        &plain_stage,
        &[
            (Arg::Src, &src_user),
            (Arg::Weights, &weights_user),
            (Arg::Bias, &bias_user),
            (Arg::Dst, &plain_dst),
        ],
    );
    assert_eq!(plain_dst.to_ndarray().unwrap(), actual);
}

#[test]
fn conv_scales_and_post_ops() {
    let engine = cpu();
    // a 1x1 convolution that sums the two input channels
    let src_values = manual_tensor(&[1, 2, 1, 2], vec![1.0, -2.0, 3.0, -4.0]);
    let weight_values = manual_tensor(&[2, 2, 1, 1], vec![1.0, 1.0, 1.0, 1.0]);

    let mut attr = PrimitiveAttr::new();
    attr.set_output_scales(1 << 1, AttrValues::Fixed(vec![1.0, 0.5]));
    attr.append_eltwise(EltwiseOp::relu(0.0));

    let src = memory_of(&engine, shape![1, 2, 1, 2], "nchw", &src_values);
    let weights = memory_of(&engine, shape![2, 2, 1, 1], "oihw", &weight_values);
    let dst = Memory::new(tagged(shape![1, 2, 1, 2], DType::F32, "nchw"), &engine).unwrap();

    let stage = ConvDesc::new(
        &engine,
        ConvAlgorithm::Direct,
        src.desc(),
        weights.desc(),
        None,
        dst.desc(),
        ConvParams::default(),
        &attr,
    )
    .unwrap();
    run(&stage, &[(Arg::Src, &src), (Arg::Weights, &weights), (Arg::Dst, &dst)]);

    // sums are [4, -6] for both output channels
    assert_eq!(dst.read_to_vec::<f32>().unwrap(), vec![4.0, 0.0, 2.0, 0.0]);
}

#[test]
fn conv_rejects_invalid_configurations() {
    let engine = cpu();
    let src = tagged(shape![1, 3, 8, 8], DType::F32, "nchw");
    let weights = tagged(shape![4, 3, 3, 3], DType::F32, "oihw");
    let dst = tagged(shape![1, 4, 8, 8], DType::F32, "nchw");
    let attr = PrimitiveAttr::new();

    // without padding the output would be 6x6
    let unpadded = ConvParams::default();
    let result = ConvDesc::new(&engine, ConvAlgorithm::Direct, &src, &weights, None, &dst, unpadded, &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidParameter(_)))));

    let params = ConvParams::padded([1, 1]);
    let wrong_channels = tagged(shape![4, 2, 3, 3], DType::F32, "oihw");
    let result = ConvDesc::new(&engine, ConvAlgorithm::Direct, &src, &wrong_channels, None, &dst, params, &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::ShapeMismatch { .. }))));

    let mut zp_attr = PrimitiveAttr::new();
    zp_attr.set_zero_points(QuantTarget::Src, 0, AttrValues::Fixed(vec![3]));
    let result = ConvDesc::new(&engine, ConvAlgorithm::Direct, &src, &weights, None, &dst, params, &zp_attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidAttribute(_)))));

    let int_src = tagged(shape![1, 3, 8, 8], DType::U8, "nchw");
    let result = ConvDesc::new(&engine, ConvAlgorithm::Direct, &int_src, &weights, None, &dst, params, &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::UnsupportedDType { .. }))));
}

#[test]
fn max_pooling() {
    let engine = cpu();
    let src = memory_of(&engine, shape![1, 1, 4, 4], "nchw", &manual_tensor(&[1, 1, 4, 4], range_vec(16)));

    let params = PoolingParams {
        kernel: [2, 2],
        strides: [2, 2],
        padding_l: [0, 0],
        padding_r: [0, 0],
        dilation: [0, 0],
    };
    let dst = Memory::new(tagged(shape![1, 1, 2, 2], DType::F32, "nchw"), &engine).unwrap();
    let stage = PoolingDesc::new(&engine, PoolingAlg::Max, src.desc(), dst.desc(), params).unwrap();
    run(&stage, &[(Arg::Src, &src), (Arg::Dst, &dst)]);
    assert_eq!(dst.read_to_vec::<f32>().unwrap(), vec![5.0, 7.0, 13.0, 15.0]);

    // a dilated kernel skips every other row and column
    let params = PoolingParams {
        strides: [1, 1],
        dilation: [1, 1],
        ..params
    };
    let stage = PoolingDesc::new(&engine, PoolingAlg::Max, src.desc(), dst.desc(), params).unwrap();
    run(&stage, &[(Arg::Src, &src), (Arg::Dst, &dst)]);
    assert_eq!(dst.read_to_vec::<f32>().unwrap(), vec![10.0, 11.0, 14.0, 15.0]);
}

#[test]
fn average_pooling_padding_modes() {
    let engine = cpu();
    let values = manual_tensor(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    let src = memory_of(&engine, shape![1, 1, 2, 2], "nchw", &values);
    let dst = Memory::new(tagged(shape![1, 1, 2, 2], DType::F32, "nchw"), &engine).unwrap();
    let params = PoolingParams::same([3, 3]);

    let stage = PoolingDesc::new(&engine, PoolingAlg::AvgExcludePadding, src.desc(), dst.desc(), params).unwrap();
    run(&stage, &[(Arg::Src, &src), (Arg::Dst, &dst)]);
    assert_eq!(dst.read_to_vec::<f32>().unwrap(), vec![2.5; 4]);

    let stage = PoolingDesc::new(&engine, PoolingAlg::AvgIncludePadding, src.desc(), dst.desc(), params).unwrap();
    run(&stage, &[(Arg::Src, &src), (Arg::Dst, &dst)]);
    assert_eq!(dst.read_to_vec::<f32>().unwrap(), vec![10.0 / 9.0; 4]);
}

#[test]
fn pooling_placeholders() {
    let engine = cpu();
    let src = MemoryDesc::any(shape![2, 16, 8, 8], DType::U8).unwrap();
    let dst = MemoryDesc::any(shape![2, 16, 4, 4], DType::U8).unwrap();
    let params = PoolingParams {
        kernel: [2, 2],
        strides: [2, 2],
        padding_l: [0, 0],
        padding_r: [0, 0],
        dilation: [0, 0],
    };
    let stage = PoolingDesc::new(&engine, PoolingAlg::Max, &src, &dst, params).unwrap();
    assert_eq!(stage.query_md(Arg::Src), Some(&tagged(shape![2, 16, 8, 8], DType::U8, "acdb")));
    assert_eq!(stage.query_md(Arg::Dst), Some(&tagged(shape![2, 16, 4, 4], DType::U8, "acdb")));

    let f32_dst = MemoryDesc::any(shape![2, 16, 4, 4], DType::F32).unwrap();
    let result = PoolingDesc::new(&engine, PoolingAlg::Max, &src, &f32_dst, params);
    assert!(matches!(result, Err(Error::Config(ConfigError::DTypeMismatch { .. }))));
}

#[test]
fn reorder_round_trip_through_blocked() {
    let engine = cpu();
    let mut rng = seeded_rng();
    let values = rng_tensor(&[2, 3, 4, 5], &mut rng);

    let plain = memory_of(&engine, shape![2, 3, 4, 5], "nchw", &values);
    let blocked = Memory::new(tagged(shape![2, 3, 4, 5], DType::F32, "nChw8c"), &engine).unwrap();
    let back = Memory::new(plain.desc().clone(), &engine).unwrap();

    // the padded channels take up space
    assert_eq!(blocked.size_bytes(), 2 * 8 * 4 * 5 * 4);

    let attr = PrimitiveAttr::new();
    let to_blocked = ReorderDesc::new(&engine, plain.desc(), blocked.desc(), &attr).unwrap();
    let to_plain = ReorderDesc::new(&engine, blocked.desc(), back.desc(), &attr).unwrap();

    run(&to_blocked, &[(Arg::From, &plain), (Arg::To, &blocked)]);
    run(&to_plain, &[(Arg::From, &blocked), (Arg::To, &back)]);

    assert_eq!(blocked.to_ndarray().unwrap(), values);
    assert_eq!(back.read_to_vec::<f32>().unwrap(), plain.read_to_vec::<f32>().unwrap());
}

#[test]
fn quantizing_reorder() {
    let engine = cpu();
    let values = [0.4f32, -1.3, 100.0, -100.0, 0.25];
    let from = Memory::from_slice(tagged(shape![5], DType::F32, "a"), &engine, &values).unwrap();
    let to = Memory::new(tagged(shape![5], DType::S8, "a"), &engine).unwrap();

    let mut attr = PrimitiveAttr::new();
    attr.set_output_scales(0, AttrValues::Fixed(vec![2.0]));
    let stage = ReorderDesc::new(&engine, from.desc(), to.desc(), &attr).unwrap();
    run(&stage, &[(Arg::From, &from), (Arg::To, &to)]);

    // 0.5 rounds to the even neighbour
    assert_eq!(to.read_to_vec::<i8>().unwrap(), vec![1, -3, 127, -128, 0]);
}

#[test]
fn integer_reorder_round_trip_is_exact() {
    let engine = cpu();
    // not representable as f32
    let values = [16_777_217i32, 1, 2, 3];
    let plain = Memory::from_slice(tagged(shape![2, 2], DType::S32, "ab"), &engine, &values).unwrap();
    let transposed = Memory::new(tagged(shape![2, 2], DType::S32, "ba"), &engine).unwrap();
    let back = Memory::new(plain.desc().clone(), &engine).unwrap();

    let attr = PrimitiveAttr::new();
    let there = ReorderDesc::new(&engine, plain.desc(), transposed.desc(), &attr).unwrap();
    let home = ReorderDesc::new(&engine, transposed.desc(), back.desc(), &attr).unwrap();
    run(&there, &[(Arg::From, &plain), (Arg::To, &transposed)]);
    run(&home, &[(Arg::From, &transposed), (Arg::To, &back)]);

    assert_eq!(transposed.read_to_vec::<i32>().unwrap(), vec![16_777_217, 2, 1, 3]);
    assert_eq!(back.read_to_vec::<i32>().unwrap(), values.to_vec());
}

#[test]
fn reorder_rejects_invalid_configurations() {
    let engine = cpu();
    let attr = PrimitiveAttr::new();
    let plain = tagged(shape![4, 6], DType::F32, "ab");
    let any = MemoryDesc::any(shape![4, 6], DType::F32).unwrap();

    let result = ReorderDesc::new(&engine, &plain, &any, &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::UnresolvedLayout(_)))));

    let other_shape = tagged(shape![6, 4], DType::F32, "ab");
    let result = ReorderDesc::new(&engine, &plain, &other_shape, &attr);
    assert!(matches!(result, Err(Error::Config(ConfigError::ShapeMismatch { .. }))));

    let mut masked = PrimitiveAttr::new();
    masked.set_output_scales(1, AttrValues::Fixed(vec![1.0; 4]));
    let result = ReorderDesc::new(&engine, &plain, &tagged(shape![4, 6], DType::S8, "ba"), &masked);
    assert!(matches!(result, Err(Error::Config(ConfigError::InvalidAttribute(_)))));
}
