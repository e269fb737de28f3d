use decorum::Total;

use pf_core::desc::MemoryDesc;
use pf_core::error::{ConfigError, PfResult};

use crate::arg::Arg;
use crate::attr::{AttrSupport, AttrValues, PrimitiveAttr};
use crate::engine::Engine;
use crate::primitive::{require_fixed, BoundArgs, PrimitiveDesc};

const SUPPORT: AttrSupport = AttrSupport {
    output_scales: true,
    runtime_scales: false,
    zero_points: false,
    post_ops: false,
};

/// Copy a tensor between two layouts, converting the element type on the way.
///
/// Takes exactly the [Arg::From] and [Arg::To] arguments.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReorderDesc {
    pub(crate) engine: Engine,
    pub(crate) scale: Option<Total<f32>>,
    pub(crate) from: MemoryDesc,
    pub(crate) to: MemoryDesc,
}

impl ReorderDesc {
    /// The only supported attribute is a fixed common output scale, applied before conversion.
    pub fn new(engine: &Engine, from: &MemoryDesc, to: &MemoryDesc, attr: &PrimitiveAttr) -> PfResult<PrimitiveDesc> {
        from.require_blocking("reorder from")?;
        to.require_blocking("reorder to")?;
        require_fixed("reorder from", from)?;

        if from.shape() != to.shape() {
            return Err(ConfigError::ShapeMismatch {
                what: "reorder to".to_owned(),
                expected: from.shape().clone(),
                actual: to.shape().clone(),
            }
            .into());
        }

        attr.validate("reorder", SUPPORT, to.shape())?;
        let scale = match attr.output_scales() {
            None => None,
            Some(scales) => match (&scales.values, scales.mask) {
                (AttrValues::Fixed(values), 0) => Some(values[0]),
                _ => {
                    return Err(
                        ConfigError::InvalidAttribute("reorder only supports a common output scale".to_owned()).into(),
                    )
                }
            },
        };

        Ok(PrimitiveDesc::Reorder(ReorderDesc {
            engine: engine.clone(),
            scale,
            from: from.clone(),
            to: to.clone(),
        }))
    }

    pub fn from(&self) -> &MemoryDesc {
        &self.from
    }

    pub fn to(&self) -> &MemoryDesc {
        &self.to
    }

    pub(crate) fn problem(&self) -> String {
        format!("{}->{} {}", self.from.dtype(), self.to.dtype(), self.from.shape())
    }

    pub(crate) fn run(&self, args: &BoundArgs) -> PfResult<()> {
        // f64 holds every element exactly, and the product with an f32 scale is exact too
        let mut values = args.get(Arg::From)?.to_ndarray_f64()?;
        if let Some(scale) = self.scale {
            let scale = scale.into_inner() as f64;
            values.mapv_inplace(|x| x * scale);
        }
        args.get(Arg::To)?.write_ndarray_f64(&values)
    }
}
