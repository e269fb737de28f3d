use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytemuck::{cast_slice, pod_collect_to_vec};
use ndarray::{ArrayD, Dimension, IxDyn};

use pf_core::desc::MemoryDesc;
use pf_core::dtype::{DType, IntoDType};
use pf_core::error::{ConfigError, ExecutionError, PfResult};
use pf_core::layout::Blocking;

use crate::engine::Engine;

/// A buffer on an engine, laid out as its descriptor says.
///
/// Clones are handles to the same storage.
#[derive(Clone)]
pub struct Memory {
    desc: MemoryDesc,
    engine: Engine,
    data: Arc<RwLock<Vec<u8>>>,
}

/// The fixed dims and evaluated strides of a buffer, used to map logical indices to element offsets.
#[derive(Debug)]
pub(crate) struct LogicalLayout<'a> {
    pub dims: Vec<usize>,
    strides: Vec<usize>,
    blocking: &'a Blocking,
    dtype: DType,
}

impl Memory {
    /// Allocate a zero-initialized buffer. The descriptor must be resolved and fully fixed.
    pub fn new(desc: MemoryDesc, engine: &Engine) -> PfResult<Memory> {
        let bytes = desc.size_bytes()?;
        Ok(Memory {
            desc,
            engine: engine.clone(),
            data: Arc::new(RwLock::new(vec![0; bytes])),
        })
    }

    /// Allocate a buffer and fill it with raw elements in physical order, including any block padding.
    pub fn from_slice<T: IntoDType>(desc: MemoryDesc, engine: &Engine, data: &[T]) -> PfResult<Memory> {
        let memory = Memory::new(desc, engine)?;
        memory.write_from(data)?;
        Ok(memory)
    }

    /// Allocate a buffer holding the logical values of `array`, converted to the descriptor type.
    pub fn from_ndarray(desc: MemoryDesc, engine: &Engine, array: &ArrayD<f32>) -> PfResult<Memory> {
        let memory = Memory::new(desc, engine)?;
        memory.write_ndarray(array)?;
        Ok(memory)
    }

    pub fn desc(&self) -> &MemoryDesc {
        &self.desc
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn same_buffer(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn size_bytes(&self) -> usize {
        // the size was validated at allocation
        self.desc.size_bytes().unwrap_or(0)
    }

    /// Overwrite the buffer with raw elements in physical order.
    pub fn write_from<T: IntoDType>(&self, data: &[T]) -> PfResult<()> {
        self.check_host_type::<T>()?;
        let mut bytes = self.write()?;

        let expected = bytes.len() / T::DTYPE.size().bytes();
        if data.len() != expected {
            return Err(ConfigError::InvalidParameter(format!(
                "buffer {} holds {} elements, got {}",
                self.desc,
                expected,
                data.len()
            ))
            .into());
        }

        bytes.copy_from_slice(cast_slice(data));
        Ok(())
    }

    /// Read all raw elements in physical order.
    pub fn read_to_vec<T: IntoDType>(&self) -> PfResult<Vec<T>> {
        self.check_host_type::<T>()?;
        let bytes = self.read()?;
        Ok(pod_collect_to_vec(&bytes))
    }

    /// Read the logical tensor, converting every element to `f32`. Block padding is skipped.
    pub fn to_ndarray(&self) -> PfResult<ArrayD<f32>> {
        self.map_logical(|dtype, bytes| dtype.read_f32(bytes))
    }

    /// Read the logical tensor as `f64`, which holds every element type exactly.
    pub fn to_ndarray_f64(&self) -> PfResult<ArrayD<f64>> {
        self.map_logical(|dtype, bytes| dtype.read_f64(bytes))
    }

    /// Overwrite the logical tensor, rounding and saturating into the buffer type. Block padding is left alone.
    pub fn write_ndarray(&self, array: &ArrayD<f32>) -> PfResult<()> {
        self.write_logical(array, |dtype, value, bytes| dtype.write_f32(value, bytes))
    }

    /// [Memory::write_ndarray] without the intermediate `f32`, so 32-bit integer results stay exact.
    pub fn write_ndarray_f64(&self, array: &ArrayD<f64>) -> PfResult<()> {
        self.write_logical(array, |dtype, value, bytes| dtype.write_f64(value, bytes))
    }

    fn write_logical<T: Copy>(&self, array: &ArrayD<T>, f: impl Fn(DType, T, &mut [u8])) -> PfResult<()> {
        let layout = self.logical_layout()?;
        if array.shape() != layout.dims.as_slice() {
            return Err(ConfigError::InvalidParameter(format!(
                "array with shape {:?} does not match buffer {}",
                array.shape(),
                self.desc
            ))
            .into());
        }

        let mut bytes = self.write()?;
        for (index, &value) in array.indexed_iter() {
            f(layout.dtype, value, layout.element_mut(&mut bytes, index.slice()));
        }
        Ok(())
    }

    fn map_logical<T>(&self, f: impl Fn(DType, &[u8]) -> T) -> PfResult<ArrayD<T>> {
        let layout = self.logical_layout()?;
        let bytes = self.read()?;
        Ok(ArrayD::from_shape_fn(IxDyn(&layout.dims), |index| {
            f(layout.dtype, layout.element(&bytes, index.slice()))
        }))
    }

    pub(crate) fn logical_layout(&self) -> PfResult<LogicalLayout> {
        let blocking = self.desc.require_blocking("buffer")?;
        let dims = self
            .desc
            .shape()
            .as_fixed()
            .ok_or_else(|| ConfigError::RuntimeDimNotAllowed {
                what: "buffer".to_owned(),
                shape: self.desc.shape().clone(),
            })?
            .dims;

        Ok(LogicalLayout {
            dims,
            strides: blocking.eval_strides(0),
            blocking,
            dtype: self.desc.dtype(),
        })
    }

    pub(crate) fn read(&self) -> PfResult<RwLockReadGuard<Vec<u8>>> {
        self.data
            .read()
            .map_err(|_| ExecutionError::Poisoned(self.desc.to_string()).into())
    }

    pub(crate) fn write(&self) -> PfResult<RwLockWriteGuard<Vec<u8>>> {
        self.data
            .write()
            .map_err(|_| ExecutionError::Poisoned(self.desc.to_string()).into())
    }

    fn check_host_type<T: IntoDType>(&self) -> PfResult<()> {
        if T::DTYPE != self.desc.dtype() {
            return Err(ConfigError::DTypeMismatch {
                what: "host data".to_owned(),
                expected: self.desc.dtype(),
                actual: T::DTYPE,
            }
            .into());
        }
        Ok(())
    }
}

impl LogicalLayout<'_> {
    fn byte_range(&self, index: &[usize]) -> std::ops::Range<usize> {
        let size = self.dtype.size().bytes();
        let offset = self.blocking.offset(&self.strides, index);
        offset * size..(offset + 1) * size
    }

    pub fn element<'b>(&self, bytes: &'b [u8], index: &[usize]) -> &'b [u8] {
        &bytes[self.byte_range(index)]
    }

    pub fn element_mut<'b>(&self, bytes: &'b mut [u8], index: &[usize]) -> &'b mut [u8] {
        &mut bytes[self.byte_range(index)]
    }
}

impl Debug for Memory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("desc", &self.desc)
            .field("engine", &self.engine)
            .field("ptr", &Arc::as_ptr(&self.data))
            .finish()
    }
}
