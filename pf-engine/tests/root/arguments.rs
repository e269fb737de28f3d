use pf_core::dtype::DType;
use pf_core::error::{ConfigError, Error, ExecutionError};
use pf_core::shape;
use pf_engine::arg::Arg;
use pf_engine::attr::{EltwiseOp, PrimitiveAttr};
use pf_engine::memory::Memory;
use pf_engine::primitive::eltwise::EltwiseDesc;
use pf_engine::primitive::reorder::ReorderDesc;
use pf_engine::primitive::Primitive;
use pf_engine::stream::Stream;

use crate::tensor_utils::{cpu, tagged};

#[test]
fn reorder_with_wrong_argument_name() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let from = Memory::new(tagged(shape![2, 3], DType::F32, "ab"), &engine).unwrap();
    let to = Memory::new(tagged(shape![2, 3], DType::F32, "ba"), &engine).unwrap();
    let reorder = Primitive::new(&ReorderDesc::new(&engine, from.desc(), to.desc(), &PrimitiveAttr::new()).unwrap());

    let result = reorder.execute(&stream, &[(Arg::Weights, &from), (Arg::To, &to)]);
    assert!(matches!(result, Err(Error::Execution(ExecutionError::UnexpectedArgument(_)))));

    let result = reorder.execute(&stream, &[(Arg::From, &from)]);
    assert!(matches!(result, Err(Error::Execution(ExecutionError::MissingArgument(_)))));

    let result = reorder.execute(&stream, &[(Arg::From, &from), (Arg::To, &to), (Arg::From, &from)]);
    assert!(matches!(result, Err(Error::Execution(ExecutionError::DuplicateArgument(_)))));

    // swapping the buffers is a layout mismatch on both sides
    let result = reorder.execute(&stream, &[(Arg::From, &to), (Arg::To, &from)]);
    match result {
        Err(Error::LayoutMismatch(e)) => {
            assert_eq!(e.what, "from");
            assert_eq!(&e.expected, from.desc());
            assert_eq!(&e.actual, to.desc());
        }
        other => panic!("Expected layout mismatch, got {:?}", other),
    }

    assert_eq!(stream.pending().unwrap(), 0);
    reorder.execute(&stream, &[(Arg::From, &from), (Arg::To, &to)]).unwrap();
    assert_eq!(stream.pending().unwrap(), 1);
    stream.wait().unwrap();
}

#[test]
fn logical_mismatch_reported_before_layout() {
    let engine = cpu();
    let stream = Stream::new(&engine);
    let desc = tagged(shape![4, 4], DType::F32, "ab");
    let relu = Primitive::new(&EltwiseDesc::new(&engine, EltwiseOp::relu(0.0), &desc, &desc).unwrap());

    let transposed = Memory::new(tagged(shape![4, 4], DType::F32, "ba"), &engine).unwrap();
    let wrong_type = Memory::new(tagged(shape![4, 4], DType::S32, "ab"), &engine).unwrap();

    let result = relu.execute(&stream, &[(Arg::Src, &transposed), (Arg::Dst, &wrong_type)]);
    assert!(matches!(result, Err(Error::Config(ConfigError::DTypeMismatch { .. }))));
}

#[test]
fn buffers_on_other_engines() {
    let engine = cpu();
    let other = cpu();
    assert_ne!(engine, other);

    let desc = tagged(shape![4], DType::F32, "a");
    let relu = Primitive::new(&EltwiseDesc::new(&engine, EltwiseOp::relu(0.0), &desc, &desc).unwrap());
    let local = Memory::new(desc.clone(), &engine).unwrap();
    let foreign = Memory::new(desc.clone(), &other).unwrap();

    let stream = Stream::new(&engine);
    let result = relu.execute(&stream, &[(Arg::Src, &foreign), (Arg::Dst, &local)]);
    assert!(matches!(result, Err(Error::Execution(ExecutionError::EngineMismatch(_)))));

    let other_stream = Stream::new(&other);
    let result = relu.execute(&other_stream, &[(Arg::Src, &local), (Arg::Dst, &local)]);
    assert!(matches!(result, Err(Error::Execution(ExecutionError::EngineMismatch(_)))));
}

#[test]
fn validate_without_submitting() {
    let engine = cpu();
    let desc = tagged(shape![4], DType::F32, "a");
    let relu = Primitive::new(&EltwiseDesc::new(&engine, EltwiseOp::relu(0.0), &desc, &desc).unwrap());
    let buffer = Memory::new(desc, &engine).unwrap();

    relu.validate(&engine, &[(Arg::Src, &buffer), (Arg::Dst, &buffer)]).unwrap();
    let result = relu.validate(&engine, &[(Arg::Src, &buffer)]);
    assert!(matches!(result, Err(Error::Execution(ExecutionError::MissingArgument(_)))));
}
