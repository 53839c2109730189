//! Tensor buffers: engine-managed or caller-supplied memory for one tensor.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lrt_engine::{
    is_aligned, BufferHandle, BufferType, Engine, LockMode, ResourceKind, Status, TensorSlot,
    BUFFER_ALIGNMENT,
};
use lrt_tensor::{
    packed_size, DynamicSizeEstimator, ElementType, Layout, RankedTensorType, TensorError,
};

use crate::compiled::CompiledModel;
use crate::environment::{Environment, ResourceId};
use crate::error::{Checked, Error, Result};
use crate::event::{Event, EventRef};

/// One engine buffer handle, shared by every duplicate wrapper. The engine
/// buffer is destroyed when the last holder lets go.
pub(crate) struct BufferCore {
    engine: Arc<dyn Engine>,
    handle: BufferHandle,
    id: ResourceId,
    /// Set while a [`BufferLock`] maps the buffer, through any duplicate.
    locked: AtomicBool,
}

impl BufferCore {
    pub(crate) fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl Drop for BufferCore {
    fn drop(&mut self) {
        self.engine.destroy_buffer(self.handle);
        tracing::debug!(id = %self.id, "tensor buffer destroyed");
    }
}

pub struct TensorBuffer<'a> {
    core: Option<Arc<BufferCore>>,
    _memory: PhantomData<&'a mut [u8]>,
}

impl fmt::Debug for TensorBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorBuffer")
            .field("id", &self.core.as_ref().map(|c| c.id))
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl<'a> TensorBuffer<'a> {
    fn wrap(engine: Arc<dyn Engine>, handle: BufferHandle) -> Self {
        let id = ResourceId::next();
        tracing::debug!(%id, "tensor buffer created");
        TensorBuffer {
            core: Some(Arc::new(BufferCore {
                engine,
                handle,
                id,
                locked: AtomicBool::new(false),
            })),
            _memory: PhantomData,
        }
    }

    /// Let the engine allocate `size` bytes of `buffer_type` memory.
    pub fn create_managed(
        env: &'a Environment,
        buffer_type: BufferType,
        tensor_type: &RankedTensorType,
        size: usize,
    ) -> Result<Self> {
        let env_handle = env.handle()?;
        let engine = env.engine().clone();
        let handle = engine
            .create_managed_buffer(env_handle, buffer_type, tensor_type, size)
            .checked(engine.as_ref())?;
        Ok(Self::wrap(engine, handle))
    }

    /// Allocate a buffer matching what the compiled model reports for one
    /// of its tensors, using the model's declared tensor type.
    pub fn from_requirements(
        compiled: &CompiledModel<'a>,
        signature: usize,
        slot: TensorSlot,
    ) -> Result<Self> {
        let tensor_type = compiled.model().tensor_type(signature, slot)?;
        let reqs = compiled.requirements(signature, slot)?;
        let buffer_type = reqs.preferred_type()?;
        let size = reqs.buffer_size()?;
        Self::create_managed(compiled.environment(), buffer_type, &tensor_type, size)
    }

    /// Allocate for an explicit layout, such as the one an input was just
    /// resized to. The size is the largest of the engine requirement, the
    /// packed size of `layout` and `min_size`.
    pub fn for_layout(
        compiled: &CompiledModel<'a>,
        signature: usize,
        slot: TensorSlot,
        layout: &Layout,
        min_size: usize,
    ) -> Result<Self> {
        let element_type = compiled.model().tensor_type(signature, slot)?.element_type;
        let reqs = compiled.requirements(signature, slot)?;
        let buffer_type = reqs.preferred_type()?;
        let size = reqs
            .buffer_size()?
            .max(packed_size(element_type, layout)?)
            .max(min_size);
        let tensor_type = RankedTensorType::new(element_type, layout.clone());
        Self::create_managed(compiled.environment(), buffer_type, &tensor_type, size)
    }

    /// Allocate an output whose true shape is only known after the run.
    ///
    /// Shapes are propagated from the current inputs first; the provisional
    /// layout is then inflated by `estimator`.
    pub fn for_dynamic_output(
        compiled: &CompiledModel<'a>,
        signature: usize,
        output: usize,
        estimator: &DynamicSizeEstimator,
    ) -> Result<Self> {
        let slot = TensorSlot::Output(output);
        let layouts = compiled.output_layouts(signature, true)?;
        let reported = layouts.get(output).ok_or_else(|| {
            Error::InvalidArgument(format!("signature {signature} has no output {output}"))
        })?;
        let element_type = compiled.model().tensor_type(signature, slot)?.element_type;
        let reqs = compiled.requirements(signature, slot)?;
        let buffer_type = reqs.preferred_type()?;
        let requirement = reqs.buffer_size()?;
        let size = estimator.capacity(element_type, reported, requirement)?;

        let adjusted = estimator.adjusted_dims(reported.dims());
        let dims = adjusted
            .iter()
            .map(|&d| i32::try_from(d))
            .collect::<std::result::Result<Vec<i32>, _>>()
            .map_err(|_| TensorError::Overflow(adjusted.iter().map(|&d| d as i64).collect()))?;
        let tensor_type = RankedTensorType::new(element_type, Layout::new(dims)?);
        tracing::debug!(
            %reported,
            requirement,
            size,
            max_frames = estimator.max_frames(),
            "dynamic output buffer sized"
        );
        Self::create_managed(compiled.environment(), buffer_type, &tensor_type, size)
    }

    /// Wrap caller memory without copying. The memory must be
    /// [`BUFFER_ALIGNMENT`]-aligned and stays borrowed while the buffer lives.
    pub fn from_host_memory(
        env: &'a Environment,
        tensor_type: &RankedTensorType,
        memory: &'a mut [u8],
    ) -> Result<Self> {
        env.handle()?;
        if !is_aligned(memory.as_ptr()) {
            return Err(Error::InvalidArgument(format!(
                "host memory at {:p} is not {BUFFER_ALIGNMENT}-byte aligned",
                memory.as_ptr()
            )));
        }
        if let Ok(packed) = tensor_type.packed_size() {
            if memory.len() < packed {
                return Err(Error::InvalidArgument(format!(
                    "{tensor_type} needs {packed} bytes, host memory holds {}",
                    memory.len()
                )));
            }
        }
        let engine = env.engine().clone();
        let handle = unsafe {
            engine.create_buffer_from_host_memory(tensor_type, memory.as_mut_ptr(), memory.len())
        }
        .checked(engine.as_ref())?;
        Ok(Self::wrap(engine, handle))
    }

    pub fn is_valid(&self) -> bool {
        self.core.is_some()
    }

    pub fn id(&self) -> Option<ResourceId> {
        self.core.as_ref().map(|c| c.id)
    }

    /// Holders of the underlying engine buffer, including a compiled model
    /// that retains it for an outstanding asynchronous run. Zero once this
    /// wrapper is destroyed.
    pub fn ref_count(&self) -> usize {
        self.core.as_ref().map(Arc::strong_count).unwrap_or(0)
    }

    pub(crate) fn core(&self) -> Result<&Arc<BufferCore>> {
        self.core.as_ref().ok_or(Error::Destroyed {
            resource: ResourceKind::TensorBuffer,
        })
    }

    fn engine_and_handle(&self) -> Result<(&dyn Engine, BufferHandle)> {
        let core = self.core()?;
        Ok((core.engine.as_ref(), core.handle))
    }

    /// A second owner of the same engine buffer.
    pub fn duplicate(&self) -> Result<TensorBuffer<'a>> {
        let core = Arc::clone(self.core()?);
        tracing::debug!(id = %core.id, holders = Arc::strong_count(&core), "tensor buffer duplicated");
        Ok(TensorBuffer {
            core: Some(core),
            _memory: PhantomData,
        })
    }

    /// Drop this wrapper's hold on the engine buffer. The engine buffer is
    /// destroyed with the last holder. Further calls are no-ops.
    pub fn destroy(&mut self) {
        if let Some(core) = self.core.take() {
            let remaining = Arc::strong_count(&core) - 1;
            tracing::debug!(id = %core.id, remaining, "tensor buffer released");
        }
    }

    pub fn buffer_type(&self) -> Result<BufferType> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.buffer_type(handle).checked(engine)
    }

    pub fn tensor_type(&self) -> Result<RankedTensorType> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.buffer_tensor_type(handle).checked(engine)
    }

    /// Allocated capacity in bytes.
    pub fn size(&self) -> Result<usize> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.buffer_size(handle).checked(engine)
    }

    pub fn packed_size(&self) -> Result<usize> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.buffer_packed_size(handle).checked(engine)
    }

    pub fn offset(&self) -> Result<usize> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.buffer_offset(handle).checked(engine)
    }

    /// Zero the whole allocation.
    pub fn clear(&mut self) -> Result<()> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.clear_buffer(handle).checked(engine)
    }

    /// Map the buffer into host memory until the guard drops. Only one
    /// lock may be held at a time across all duplicates.
    pub fn lock(&mut self, mode: LockMode) -> Result<BufferLock<'_>> {
        let core = self.core()?;
        if core
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidArgument(format!(
                "tensor buffer {} is already locked",
                core.id
            )));
        }
        let engine = core.engine.as_ref();
        let mapped = engine
            .buffer_size(core.handle)
            .and_then(|len| engine.lock_buffer(core.handle, mode).map(|ptr| (ptr, len)));
        let (ptr, len) = match mapped {
            Ok(mapped) => mapped,
            Err(status) => {
                core.locked.store(false, Ordering::Release);
                return Err(Error::engine(engine, status));
            }
        };
        // From here the guard owns the unlock.
        let guard = BufferLock {
            core,
            ptr,
            len,
            mode,
        };
        if ptr.is_null() {
            return Err(Error::engine(engine, Status::ErrorRuntimeFailure));
        }
        Ok(guard)
    }

    /// Copy `bytes` to the start of the buffer.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut lock = self.lock(LockMode::Write)?;
        let dst = lock.as_mut_slice()?;
        if bytes.len() > dst.len() {
            return Err(Error::InvalidArgument(format!(
                "{} bytes do not fit a {}-byte buffer",
                bytes.len(),
                dst.len()
            )));
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let lock = self.lock(LockMode::Read)?;
        Ok(lock.as_slice().to_vec())
    }

    /// Store f32 values at the start of an f32 buffer.
    pub fn write_f32(&mut self, values: &[f32]) -> Result<()> {
        self.expect_f32()?;
        let mut lock = self.lock(LockMode::Write)?;
        let dst = lock.as_mut_slice()?;
        let needed = values.len() * 4;
        if needed > dst.len() {
            return Err(Error::InvalidArgument(format!(
                "{} f32 values need {needed} bytes, buffer holds {}",
                values.len(),
                dst.len()
            )));
        }
        for (chunk, v) in dst.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    /// Every f32 in the allocation, padding included.
    pub fn read_f32(&mut self) -> Result<Vec<f32>> {
        self.expect_f32()?;
        let lock = self.lock(LockMode::Read)?;
        Ok(lock
            .as_slice()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Decode an f32, f16 or bf16 buffer to f32 values.
    pub fn read_as_f32(&mut self) -> Result<Vec<f32>> {
        let element_type = self.tensor_type()?.element_type;
        let lock = self.lock(LockMode::Read)?;
        Ok(element_type.decode_f32(lock.as_slice())?)
    }

    fn expect_f32(&self) -> Result<()> {
        let element_type = self.tensor_type()?.element_type;
        if element_type != ElementType::Float32 {
            return Err(Error::InvalidArgument(format!(
                "buffer holds {element_type}, not f32"
            )));
        }
        Ok(())
    }

    pub fn has_event(&self) -> Result<bool> {
        let (engine, handle) = self.engine_and_handle()?;
        engine.buffer_has_event(handle).checked(engine)
    }

    /// The attached event, which stays owned by the buffer.
    pub fn event(&self) -> Result<Option<EventRef<'_>>> {
        let (engine, handle) = self.engine_and_handle()?;
        if !engine.buffer_has_event(handle).checked(engine)? {
            return Ok(None);
        }
        let event = engine.buffer_event(handle).checked(engine)?;
        Ok(Some(EventRef::new(engine, event)))
    }

    /// Attach `event`; the buffer owns it from now on.
    pub fn set_event(&mut self, mut event: Event<'_>) -> Result<()> {
        let (engine, handle) = self.engine_and_handle()?;
        let event_handle = event.handle()?;
        if let Err(status) = engine.set_buffer_event(handle, event_handle) {
            event.destroy();
            return Err(Error::engine(engine, status));
        }
        event.into_handle()?;
        Ok(())
    }

    /// Detach the attached event and hand its ownership to the caller.
    pub fn clear_event(&mut self) -> Result<Option<Event<'a>>> {
        let core = self.core()?;
        let engine = core.engine.as_ref();
        if !engine.buffer_has_event(core.handle).checked(engine)? {
            return Ok(None);
        }
        let event = engine.buffer_event(core.handle).checked(engine)?;
        engine.clear_buffer_event(core.handle).checked(engine)?;
        Ok(Some(Event::from_handle(core.engine.clone(), event)))
    }
}

impl Drop for TensorBuffer<'_> {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(id = ?self.id(), "tensor buffer dropped without destroy");
            self.destroy();
        }
    }
}

/// Host mapping of a locked buffer. Dropping it unlocks the buffer.
pub struct BufferLock<'b> {
    core: &'b BufferCore,
    ptr: *mut u8,
    len: usize,
    mode: LockMode,
}

impl fmt::Debug for BufferLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLock")
            .field("len", &self.len)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl BufferLock<'_> {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if !self.mode.can_write() {
            return Err(Error::InvalidArgument(format!(
                "buffer locked for {:?} cannot be written",
                self.mode
            )));
        }
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) })
    }
}

impl Drop for BufferLock<'_> {
    fn drop(&mut self) {
        if let Err(status) = self.core.engine.unlock_buffer(self.core.handle) {
            tracing::warn!(id = %self.core.id, %status, "tensor buffer unlock failed");
        }
        self.core.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lrt_engine::{AlignedBytes, EventType, HostEngine};

    fn f32_type(dims: &[i32]) -> RankedTensorType {
        RankedTensorType::new(ElementType::Float32, Layout::from_slice(dims).unwrap())
    }

    fn managed<'e>(env: &'e Environment, dims: &[i32]) -> TensorBuffer<'e> {
        let t = f32_type(dims);
        let size = t.packed_size().unwrap();
        TensorBuffer::create_managed(env, BufferType::HostMemory, &t, size).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut buffer = managed(&env, &[1, 3]);
            assert_eq!(buffer.size().unwrap(), 12);
            assert_eq!(buffer.packed_size().unwrap(), 12);
            assert_eq!(buffer.offset().unwrap(), 0);
            assert_eq!(buffer.buffer_type().unwrap(), BufferType::HostMemory);

            buffer.write_f32(&[0.5, -1.0, 2.25]).unwrap();
            let values = buffer.read_f32().unwrap();
            assert_relative_eq!(values[2], 2.25);
            assert_eq!(buffer.read_as_f32().unwrap(), values);

            buffer.clear().unwrap();
            assert_eq!(buffer.read_bytes().unwrap(), vec![0; 12]);
            buffer.destroy();
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_failed_copy_still_unlocks() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut buffer = managed(&env, &[2]);
            assert!(matches!(
                buffer.write_f32(&[1.0, 2.0, 3.0]),
                Err(Error::InvalidArgument(_))
            ));
            assert!(buffer.write_bytes(&[0; 9]).is_err());
            buffer.write_f32(&[1.0, 2.0]).unwrap();
            buffer.destroy();
        }
        env.destroy();
        let stats = engine.stats();
        assert_eq!(stats.locks, 3);
        assert_eq!(stats.locks, stats.unlocks);
    }

    #[test]
    fn test_read_lock_rejects_writes() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut buffer = managed(&env, &[4]);
            {
                let mut lock = buffer.lock(LockMode::Read).unwrap();
                assert_eq!(lock.len(), 16);
                assert!(lock.as_mut_slice().is_err());
            }
            buffer.destroy();
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_f32_helpers_check_element_type() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let t = RankedTensorType::new(ElementType::Int8, Layout::from_slice(&[4]).unwrap());
            let mut buffer = TensorBuffer::create_managed(&env, BufferType::HostMemory, &t, 4).unwrap();
            assert!(buffer.write_f32(&[1.0]).is_err());
            buffer.write_bytes(&[1, 2, 3, 4]).unwrap();

            // Decoding fails after the buffer was mapped.
            assert!(matches!(buffer.read_as_f32(), Err(Error::Tensor(_))));
            let stats = engine.stats();
            assert_eq!(stats.locks, 2);
            assert_eq!(stats.locks, stats.unlocks);
            assert_eq!(buffer.read_bytes().unwrap(), vec![1, 2, 3, 4]);
            buffer.destroy();
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_duplicates_cannot_lock_concurrently() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut first = managed(&env, &[2]);
            let mut second = first.duplicate().unwrap();
            {
                let _lock = first.lock(LockMode::Write).unwrap();
                let err = second.lock(LockMode::Write).unwrap_err();
                assert!(matches!(err, Error::InvalidArgument(_)));
                assert!(second.lock(LockMode::Read).is_err());
                assert!(second.read_bytes().is_err());
                // Refused without asking the engine.
                assert_eq!(engine.stats().locks, 1);
            }
            second.write_f32(&[1.0, 2.0]).unwrap();
            assert_eq!(first.read_f32().unwrap(), vec![1.0, 2.0]);

            first.destroy();
            second.destroy();
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_duplicates_share_one_allocation() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut first = managed(&env, &[2]);
            let mut second = first.duplicate().unwrap();
            assert_eq!(first.ref_count(), 2);
            assert_eq!(engine.stats().created(ResourceKind::TensorBuffer), 1);

            first.write_f32(&[3.0, 4.0]).unwrap();
            first.destroy();
            first.destroy();
            assert!(!first.is_valid());
            assert_eq!(second.ref_count(), 1);
            assert_eq!(engine.stats().live(ResourceKind::TensorBuffer), 1);
            assert_eq!(second.read_f32().unwrap(), vec![3.0, 4.0]);

            second.destroy();
            assert_eq!(engine.stats().live(ResourceKind::TensorBuffer), 0);
            assert!(matches!(first.duplicate(), Err(Error::Destroyed { .. })));
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_host_memory_must_be_aligned() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        let mut memory = AlignedBytes::new(128).unwrap();
        let t = f32_type(&[8]);
        {
            let err = TensorBuffer::from_host_memory(&env, &t, &mut memory[4..68]).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
            let err = TensorBuffer::from_host_memory(&env, &t, &mut memory[..16]).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
            assert_eq!(engine.stats().created(ResourceKind::TensorBuffer), 0);

            let mut buffer = TensorBuffer::from_host_memory(&env, &t, &mut memory).unwrap();
            buffer.write_f32(&[1.5; 8]).unwrap();
            buffer.destroy();
        }
        assert_eq!(f32::from_le_bytes([memory[0], memory[1], memory[2], memory[3]]), 1.5);
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_event_ownership_moves_with_buffer() {
        let engine = Arc::new(HostEngine::new());
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut buffer = managed(&env, &[1]);
            assert!(buffer.event().unwrap().is_none());

            let event = Event::new(&env, EventType::Unknown).unwrap();
            buffer.set_event(event).unwrap();
            assert!(buffer.has_event().unwrap());
            let view = buffer.event().unwrap().unwrap();
            view.signal().unwrap();
            assert!(view.is_signaled().unwrap());

            let mut detached = buffer.clear_event().unwrap().unwrap();
            assert!(!buffer.has_event().unwrap());
            assert!(detached.is_signaled().unwrap());
            detached.destroy();

            let replacement = Event::new(&env, EventType::Unknown).unwrap();
            buffer.set_event(replacement).unwrap();
            buffer.destroy();
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }
}
