use pf_core::desc::MemoryDesc;
use pf_core::error::{ConfigError, PfResult};
use pf_core::layout::FormatTag;

use crate::arg::Arg;
use crate::attr::EltwiseOp;
use crate::engine::Engine;
use crate::primitive::{require_fixed, require_rank, resolve_like, resolve_or, BoundArgs, PrimitiveDesc};

/// Apply an [EltwiseOp] to every element. Source and destination may differ in type and layout.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EltwiseDesc {
    pub(crate) engine: Engine,
    pub(crate) op: EltwiseOp,
    pub(crate) src: MemoryDesc,
    pub(crate) dst: MemoryDesc,
}

impl EltwiseDesc {
    pub fn new(engine: &Engine, op: EltwiseOp, src: &MemoryDesc, dst: &MemoryDesc) -> PfResult<PrimitiveDesc> {
        op.validate()?;
        require_fixed("eltwise src", src)?;
        require_rank("eltwise dst", dst, &[src.rank()])?;
        if src.shape() != dst.shape() {
            return Err(ConfigError::ShapeMismatch {
                what: "eltwise dst".to_owned(),
                expected: src.shape().clone(),
                actual: dst.shape().clone(),
            }
            .into());
        }

        let src = resolve_or("eltwise", "src", src, &FormatTag::plain(src.rank()))?;
        let dst = resolve_like("eltwise", "dst", dst, &src)?;

        Ok(PrimitiveDesc::Eltwise(EltwiseDesc {
            engine: engine.clone(),
            op,
            src,
            dst,
        }))
    }

    pub fn op(&self) -> EltwiseOp {
        self.op
    }

    pub(crate) fn problem(&self) -> String {
        format!(
            "alg:{:?} alpha:{} beta:{} {}",
            self.op.alg,
            self.op.alpha.into_inner(),
            self.op.beta.into_inner(),
            self.src.shape()
        )
    }

    pub(crate) fn run(&self, args: &BoundArgs) -> PfResult<()> {
        let src = args.get(Arg::Src)?.to_ndarray()?;
        let result = src.mapv(|x| self.op.apply(x));
        args.get(Arg::Dst)?.write_ndarray(&result)
    }
}
