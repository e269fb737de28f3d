use itertools::iproduct;
use tracing::info;

use pf_core::desc::MemoryDesc;
use pf_core::dtype::DType;
use pf_core::shape;
use pf_engine::arg::Arg;
use pf_engine::attr::EltwiseOp;
use pf_engine::engine::Engine;
use pf_engine::memory::Memory;
use pf_engine::primitive::eltwise::EltwiseDesc;
use pf_engine::primitive::Primitive;
use pf_engine::stream::Stream;

use crate::{TutorialError, TutorialResult};

/// Apply relu to a small channels-last image and check every value.
pub fn get_started(engine: &Engine) -> TutorialResult<()> {
    let stream = Stream::new(engine);

    let (n, h, w, c) = (1, 13, 13, 3);
    let stride_n = h * w * c;
    let stride_h = w * c;
    let stride_w = c;
    let stride_c = 1;
    let offset = |ni: usize, hi: usize, wi: usize, ci: usize| {
        ni * stride_n + hi * stride_h + wi * stride_w + ci * stride_c
    };

    let image_size = n * h * w * c;
    let mut image = vec![0.0f32; image_size];
    for (ni, hi, wi, ci) in iproduct!(0..n, 0..h, 0..w, 0..c) {
        let off = offset(ni, hi, wi, ci);
        image[off] = -(off as f32 / 10.0).cos();
    }

    // logical dims are always NCHW, the physical layout is channels-last
    let src_md = MemoryDesc::with_tag(shape![n, c, h, w], DType::F32, "nhwc")?;
    let strides = [stride_n, stride_c, stride_h, stride_w];
    let alt_src_md = MemoryDesc::with_strides(shape![n, c, h, w], DType::F32, &strides)?;
    if src_md != alt_src_md {
        return Err(TutorialError::DescriptorMismatch(format!("{} != {}", src_md, alt_src_md)));
    }

    let src_mem = Memory::from_slice(src_md.clone(), engine, &image)?;
    let dst_mem = Memory::new(src_md.clone(), engine)?;

    let relu_desc = EltwiseDesc::new(engine, EltwiseOp::relu(0.0), &src_md, &src_md)?;
    let relu = Primitive::new(&relu_desc);
    relu.execute(&stream, &[(Arg::Src, &src_mem), (Arg::Dst, &dst_mem)])?;
    stream.wait()?;

    let relu_image = dst_mem.read_to_vec::<f32>()?;
    for (ni, hi, wi, ci) in iproduct!(0..n, 0..h, 0..w, 0..c) {
        let off = offset(ni, hi, wi, ci);
        let expected = if image[off] < 0.0 { 0.0 } else { image[off] };
        if relu_image[off] != expected {
            return Err(TutorialError::Accuracy {
                index: vec![ni, ci, hi, wi],
                expected,
                actual: relu_image[off],
            });
        }
    }

    info!("get-started: relu on {} matched", src_md);
    Ok(())
}
