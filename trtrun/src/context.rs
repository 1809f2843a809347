//! Execution contexts: per-invocation binding state and stream submission
//!
//! A context is driven in this order:
//!
//! 1. [`set_input_shape`](ExecutionContext::set_input_shape) for every dynamic input
//! 2. [`set_tensor_address`](ExecutionContext::set_tensor_address) for every IO tensor
//! 3. [`set_device_memory`](ExecutionContext::set_device_memory) if the context was
//!    created without device memory
//! 4. [`enqueue_v3`](ExecutionContext::enqueue_v3)
//!
//! Bindings persist across enqueues and are overwritten by rebinding.

use crate::cuda::{CudaEvent, CudaStream, DevicePtr};
use crate::engine::CudaEngine;
use crate::error::{error_buffer, Error, Result};
use crate::tensor::{Dims, TensorIoMode};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use trtrun_sys::*;

/// Progress of a context through the binding protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextState {
    /// Nothing has been bound yet
    Created,
    /// Some input dimensions are still unspecified
    ShapesPending,
    /// All input dimensions are known; some tensor addresses are missing
    ShapesSet,
    /// Shapes and addresses are complete; device memory is missing
    AddressesBound,
    /// Every precondition of `enqueue_v3` holds
    Ready,
    /// The last enqueue succeeded and nothing was rebound since
    Enqueued,
}

/// Granularity of the NVTX ranges emitted during enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvtxVerbosity {
    LayerNamesOnly,
    None,
    Detailed,
}

impl NvtxVerbosity {
    fn as_raw(self) -> i32 {
        match self {
            NvtxVerbosity::LayerNamesOnly => 0,
            NvtxVerbosity::None => 1,
            NvtxVerbosity::Detailed => 2,
        }
    }

    fn from_raw(raw: i32) -> Self {
        match raw {
            1 => NvtxVerbosity::None,
            2 => NvtxVerbosity::Detailed,
            _ => NvtxVerbosity::LayerNamesOnly,
        }
    }
}

/// Execution context for running inference
///
/// Borrows the engine it was created from. A context may move between
/// threads but must only be driven by one at a time.
pub struct ExecutionContext<'engine> {
    inner: *mut TrtExecutionContext,
    engine: &'engine CudaEngine,
    user_managed: bool,
    device_memory: Option<(DevicePtr, usize)>,
    aux_streams: Vec<CudaStream>,
    touched: bool,
    enqueued: bool,
}

impl<'engine> ExecutionContext<'engine> {
    /// # Safety
    ///
    /// `inner` must be a fresh context handle created from `engine`.
    pub(crate) unsafe fn from_raw(
        inner: *mut TrtExecutionContext,
        engine: &'engine CudaEngine,
        user_managed: bool,
    ) -> Self {
        tracing::debug!(user_managed, "created execution context");
        ExecutionContext {
            inner,
            engine,
            user_managed,
            device_memory: None,
            aux_streams: Vec::new(),
            touched: false,
            enqueued: false,
        }
    }

    /// Engine this context was created from
    pub fn engine(&self) -> &'engine CudaEngine {
        self.engine
    }

    /// Whether the caller must supply device memory before enqueue
    pub fn requires_device_memory(&self) -> bool {
        self.user_managed
    }

    fn binding_changed(&mut self) {
        self.touched = true;
        self.enqueued = false;
    }

    fn expect_mode(&self, name: &str, mode: TensorIoMode) -> Result<()> {
        if self.engine.tensor_io_mode(name)? != mode {
            let expected = if mode.is_input() { "input" } else { "output" };
            return Err(Error::WrongIoMode {
                name: name.to_string(),
                expected,
            });
        }
        Ok(())
    }

    /// Bind the runtime shape of an input
    ///
    /// A rejected shape leaves the previous binding in place.
    pub fn set_input_shape(&mut self, name: &str, dims: &[i64]) -> Result<()> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        self.expect_mode(name, TensorIoMode::Input)?;

        let dims = Dims::from(dims);
        let raw = dims.to_raw()?;
        let mut error_msg = error_buffer();

        let result = unsafe {
            trt_execution_context_set_input_shape(
                self.inner,
                name_cstr.as_ptr(),
                &raw,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            let reason = Error::from_ffi(result, &error_msg).ffi_message();
            tracing::warn!(tensor = name, dims = %dims, %reason, "input shape rejected");
            return Err(Error::Shape {
                name: name.to_string(),
                dims,
                reason,
            });
        }

        self.binding_changed();
        Ok(())
    }

    /// Bind the shapes of several inputs at once
    ///
    /// Every name is checked before anything is bound. Inputs already bound
    /// to the requested shape are skipped and do not count as a rebinding.
    /// Binding stops at the first rejected shape; inputs bound before it
    /// keep their new shapes.
    pub fn set_input_shapes<I, K, D>(&mut self, shapes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, D)>,
        K: AsRef<str>,
        D: AsRef<[i64]>,
    {
        let shapes: Vec<(K, D)> = shapes.into_iter().collect();
        for (name, _) in &shapes {
            let name = name.as_ref();
            self.engine.tensor_cstr(name)?;
            self.expect_mode(name, TensorIoMode::Input)?;
        }

        for (name, dims) in &shapes {
            let (name, dims) = (name.as_ref(), dims.as_ref());
            if self.tensor_shape(name)?.as_slice() == dims {
                continue;
            }
            self.set_input_shape(name, dims)?;
        }
        Ok(())
    }

    /// Shape as seen by this context; input bindings resolve dynamic axes
    pub fn tensor_shape(&self, name: &str) -> Result<Dims> {
        self.dims_query(name, trt_execution_context_get_tensor_shape)
    }

    /// Element strides of a tensor under the current bindings
    pub fn tensor_strides(&self, name: &str) -> Result<Dims> {
        self.dims_query(name, trt_execution_context_get_tensor_strides)
    }

    fn dims_query(
        &self,
        name: &str,
        f: unsafe extern "C" fn(
            *mut TrtExecutionContext,
            *const c_char,
            *mut TrtDims,
            *mut c_char,
            usize,
        ) -> i32,
    ) -> Result<Dims> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        let mut raw = TrtDims::default();
        let mut error_msg = error_buffer();

        let result = unsafe {
            f(
                self.inner,
                name_cstr.as_ptr(),
                &mut raw,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(Dims::from_raw(&raw))
    }

    /// Upper bound in bytes of an output under the current profile and shapes
    pub fn max_output_size(&self, name: &str) -> Result<usize> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        self.expect_mode(name, TensorIoMode::Output)?;

        let mut size = 0usize;
        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_get_max_output_size(
                self.inner,
                name_cstr.as_ptr(),
                &mut size,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(size)
    }

    /// True once every input dimension is known
    pub fn all_input_dimensions_specified(&self) -> bool {
        unsafe { trt_execution_context_all_input_dimensions_specified(self.inner) }
    }

    /// True once every input dimension and every shape-tensor value is known
    pub fn all_input_shapes_specified(&self) -> bool {
        unsafe { trt_execution_context_all_input_shapes_specified(self.inner) }
    }

    /// Bind the device address of an input or output tensor
    ///
    /// The address is recorded, not dereferenced; see [`enqueue_v3`](Self::enqueue_v3)
    /// for the validity requirements.
    pub fn set_tensor_address(&mut self, name: &str, address: DevicePtr) -> Result<()> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        self.bind_address(name, &name_cstr, address, trt_execution_context_set_tensor_address)
    }

    /// Bind the address of an input that is only read
    pub fn set_input_tensor_address(&mut self, name: &str, address: DevicePtr) -> Result<()> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        self.expect_mode(name, TensorIoMode::Input)?;
        self.bind_address(
            name,
            &name_cstr,
            address,
            trt_execution_context_set_input_tensor_address,
        )
    }

    fn bind_address(
        &mut self,
        name: &str,
        name_cstr: &CStr,
        address: DevicePtr,
        f: unsafe extern "C" fn(
            *mut TrtExecutionContext,
            *const c_char,
            usize,
            *mut c_char,
            usize,
        ) -> i32,
    ) -> Result<()> {
        let invalid = || Error::InvalidAddress {
            name: name.to_string(),
            address: address.as_raw(),
        };

        if address.is_null() {
            tracing::warn!(tensor = name, "null tensor address rejected");
            return Err(invalid());
        }

        let mut error_msg = error_buffer();
        let result = unsafe {
            f(
                self.inner,
                name_cstr.as_ptr(),
                address.as_raw(),
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result == TRT_ERROR_INVALID_ARGUMENT {
            let reason = Error::from_ffi(result, &error_msg);
            tracing::warn!(tensor = name, ?address, error = %reason, "tensor address rejected");
            return Err(invalid());
        }
        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        self.binding_changed();
        Ok(())
    }

    /// Address bound to a tensor, null if unbound
    pub fn get_tensor_address(&self, name: &str) -> Result<DevicePtr> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        self.address_query(&name_cstr, trt_execution_context_get_tensor_address)
    }

    /// Address bound to an output tensor
    pub fn get_output_tensor_address(&self, name: &str) -> Result<DevicePtr> {
        let name_cstr = self.engine.tensor_cstr(name)?;
        self.expect_mode(name, TensorIoMode::Output)?;
        self.address_query(&name_cstr, trt_execution_context_get_output_tensor_address)
    }

    fn address_query(
        &self,
        name_cstr: &CStr,
        f: unsafe extern "C" fn(
            *mut TrtExecutionContext,
            *const c_char,
            *mut usize,
            *mut c_char,
            usize,
        ) -> i32,
    ) -> Result<DevicePtr> {
        let mut address = 0usize;
        let mut error_msg = error_buffer();

        let result = unsafe {
            f(
                self.inner,
                name_cstr.as_ptr(),
                &mut address,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(DevicePtr::from_raw(address))
    }

    /// Select an optimization profile
    ///
    /// Switching to a different profile discards the bound input shapes;
    /// they must be set again against the new profile's ranges.
    pub fn set_optimization_profile_async(&mut self, index: i32, stream: CudaStream) -> Result<()> {
        let count = self.engine.num_optimization_profiles();
        if index < 0 || index >= count {
            return Err(Error::ProfileOutOfRange { index, count });
        }

        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_set_optimization_profile_async(
                self.inner,
                index,
                stream.as_raw(),
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        self.binding_changed();
        Ok(())
    }

    /// Index of the active optimization profile
    pub fn optimization_profile(&self) -> i32 {
        unsafe { trt_execution_context_get_optimization_profile(self.inner) }
    }

    /// Supply scratch memory to a context created without device memory
    pub fn set_device_memory(&mut self, memory: DevicePtr, size: usize) -> Result<()> {
        if memory.is_null() {
            return Err(Error::InvalidAddress {
                name: "device memory".to_string(),
                address: 0,
            });
        }
        if !self.user_managed {
            return Err(Error::InvalidArgument(
                "context manages its own device memory".to_string(),
            ));
        }
        let required = self.engine.device_memory_size();
        if size < required {
            return Err(Error::DeviceMemoryTooSmall { size, required });
        }

        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_set_device_memory(
                self.inner,
                memory.as_raw(),
                size,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        self.device_memory = Some((memory, size));
        self.binding_changed();
        Ok(())
    }

    /// Region assigned with [`set_device_memory`](Self::set_device_memory)
    pub fn device_memory(&self) -> Option<(DevicePtr, usize)> {
        self.device_memory
    }

    /// Event recorded once the inputs of the next enqueue may be overwritten
    pub fn set_input_consumed_event(&mut self, event: CudaEvent) -> Result<()> {
        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_set_input_consumed_event(
                self.inner,
                event.as_raw(),
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(())
    }

    /// Event set with [`set_input_consumed_event`](Self::set_input_consumed_event), null if none
    pub fn input_consumed_event(&self) -> CudaEvent {
        CudaEvent::from_raw(unsafe { trt_execution_context_get_input_consumed_event(self.inner) })
    }

    fn first_unbound_tensor(&self) -> Result<Option<&'engine str>> {
        let engine = self.engine;
        for name in engine.io_tensor_names() {
            if self.get_tensor_address(name)?.is_null() {
                return Ok(Some(name.as_str()));
            }
        }
        Ok(None)
    }

    /// Where the context stands in the binding protocol
    pub fn state(&self) -> ContextState {
        if self.enqueued {
            return ContextState::Enqueued;
        }
        let dims_ok = self.all_input_dimensions_specified();
        let addresses_ok = matches!(self.first_unbound_tensor(), Ok(None));
        let memory_ok = !self.user_managed || self.device_memory.is_some();

        match (dims_ok, addresses_ok, memory_ok) {
            (true, true, true) => ContextState::Ready,
            _ if !self.touched => ContextState::Created,
            (false, _, _) => ContextState::ShapesPending,
            (true, false, _) => ContextState::ShapesSet,
            (true, true, false) => ContextState::AddressesBound,
        }
    }

    /// Enqueue inference work on a CUDA stream
    ///
    /// Returns once the work is submitted, not when it completes.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `stream` is a valid CUDA stream handle (or the default stream)
    /// - every bound address points to device memory large enough for its
    ///   tensor under the bound shapes, and stays valid until the work completes
    /// - device memory given to [`set_device_memory`](Self::set_device_memory)
    ///   stays valid until the work completes
    /// - the context is not dropped while the work is in flight
    pub unsafe fn enqueue_v3(&mut self, stream: CudaStream) -> Result<()> {
        if self.user_managed && self.device_memory.is_none() {
            return Err(Error::DeviceMemoryRequired);
        }
        if !self.all_input_dimensions_specified() {
            return Err(Error::ShapesNotSpecified);
        }
        if let Some(name) = self.first_unbound_tensor()? {
            return Err(Error::AddressNotBound(name.to_string()));
        }

        let mut error_msg = error_buffer();
        let result = trt_execution_context_enqueue_v3(
            self.inner,
            stream.as_raw(),
            error_msg.as_mut_ptr(),
            error_msg.len(),
        );

        if result != TRT_SUCCESS {
            let err = Error::from_ffi(result, &error_msg);
            return Err(Error::Enqueue(err.ffi_message()));
        }

        self.enqueued = true;
        Ok(())
    }

    /// Synchronize after every layer, for debugging
    pub fn set_debug_sync(&mut self, sync: bool) {
        unsafe { trt_execution_context_set_debug_sync(self.inner, sync) }
    }

    /// Whether per-layer synchronization is on
    pub fn debug_sync(&self) -> bool {
        unsafe { trt_execution_context_get_debug_sync(self.inner) }
    }

    /// Name shown in profiler and error output
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let name_cstr = CString::new(name)?;
        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_set_name(
                self.inner,
                name_cstr.as_ptr(),
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(())
    }

    /// Name set with [`set_name`](Self::set_name), empty if none
    pub fn name(&self) -> String {
        let ptr = unsafe { trt_execution_context_get_name(self.inner) };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    /// Granularity of the NVTX ranges emitted by enqueue
    pub fn set_nvtx_verbosity(&mut self, verbosity: NvtxVerbosity) -> Result<()> {
        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_set_nvtx_verbosity(
                self.inner,
                verbosity.as_raw(),
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(())
    }

    /// Current NVTX granularity
    pub fn nvtx_verbosity(&self) -> NvtxVerbosity {
        NvtxVerbosity::from_raw(unsafe { trt_execution_context_get_nvtx_verbosity(self.inner) })
    }

    /// When false, layer timings are only reported by [`report_to_profiler`](Self::report_to_profiler)
    pub fn set_enqueue_emits_profile(&mut self, emits: bool) {
        unsafe { trt_execution_context_set_enqueue_emits_profile(self.inner, emits) }
    }

    /// Whether enqueue reports layer timings directly
    pub fn enqueue_emits_profile(&self) -> bool {
        unsafe { trt_execution_context_get_enqueue_emits_profile(self.inner) }
    }

    /// Flush the timings of the last enqueue to the profiler
    pub fn report_to_profiler(&self) -> Result<()> {
        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_execution_context_report_to_profiler(
                self.inner,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(())
    }

    /// Bytes of L2 persisting cache this context may use
    pub fn set_persistent_cache_limit(&mut self, bytes: usize) {
        unsafe { trt_execution_context_set_persistent_cache_limit(self.inner, bytes) }
    }

    /// Persisting L2 cache limit in bytes
    pub fn persistent_cache_limit(&self) -> usize {
        unsafe { trt_execution_context_get_persistent_cache_limit(self.inner) }
    }

    /// Streams for the engine's auxiliary work
    ///
    /// Streams beyond [`CudaEngine::num_aux_streams`] are ignored; missing
    /// ones are created by the runtime.
    pub fn set_aux_streams(&mut self, streams: &[CudaStream]) {
        let used = usize::try_from(self.engine.num_aux_streams()).unwrap_or(0);
        if streams.len() > used {
            tracing::debug!(
                given = streams.len(),
                used,
                "engine uses fewer auxiliary streams than given"
            );
        }
        let streams = &streams[..streams.len().min(used)];
        let raw: Vec<usize> = streams.iter().map(|s| s.as_raw()).collect();
        unsafe {
            trt_execution_context_set_aux_streams(
                self.inner,
                raw.as_ptr(),
                raw.len() as i32,
            )
        }
        self.aux_streams = streams.to_vec();
    }

    /// Auxiliary streams handed to the runtime by [`set_aux_streams`](Self::set_aux_streams)
    pub fn aux_streams(&self) -> &[CudaStream] {
        &self.aux_streams
    }
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("engine", &self.engine.name())
            .field("profile", &self.optimization_profile())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ExecutionContext<'_> {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trt_execution_context_destroy(self.inner);
            }
            tracing::debug!("destroyed execution context");
        }
    }
}

// One submitter at a time: Send, deliberately not Sync
unsafe impl Send for ExecutionContext<'_> {}

#[cfg(all(test, trtrun_mock))]
mod tests {
    use super::*;
    use crate::logger::{LogHandler, Logger, Severity};
    use crate::runtime::Runtime;
    use std::sync::{Arc, Mutex};
    use trtrun_sys::mock::MockEngine;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<(Severity, String)>>>);

    impl LogHandler for Collect {
        fn log(&self, severity: Severity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_string()));
        }
    }

    const IMAGES: DevicePtr = DevicePtr::from_raw(0x10_0000);
    const LOGITS: DevicePtr = DevicePtr::from_raw(0x20_0000);

    fn engine_with(logger: &Logger) -> CudaEngine {
        let blob = MockEngine::new("classifier")
            .device_memory(4096)
            .profiles(2)
            .input("images", "float", &[-1, 3, 224, 224])
            .output("logits", "float", "images.0x1000")
            .profile("images", 0, &[1, 3, 224, 224], &[4, 3, 224, 224], &[8, 3, 224, 224])
            .profile("images", 1, &[16, 3, 224, 224], &[16, 3, 224, 224], &[32, 3, 224, 224])
            .build();
        Runtime::new(logger)
            .unwrap()
            .deserialize_cuda_engine(&blob)
            .unwrap()
    }

    fn engine() -> CudaEngine {
        engine_with(&Logger::tracing().unwrap())
    }

    #[test]
    fn test_state_progression() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert_eq!(ctx.state(), ContextState::Created);

        ctx.set_tensor_address("logits", LOGITS).unwrap();
        assert_eq!(ctx.state(), ContextState::ShapesPending);

        ctx.set_input_shape("images", &[2, 3, 224, 224]).unwrap();
        assert_eq!(ctx.state(), ContextState::ShapesSet);

        ctx.set_tensor_address("images", IMAGES).unwrap();
        assert_eq!(ctx.state(), ContextState::Ready);

        unsafe { ctx.enqueue_v3(CudaStream::DEFAULT).unwrap() };
        assert_eq!(ctx.state(), ContextState::Enqueued);

        ctx.set_input_shape("images", &[4, 3, 224, 224]).unwrap();
        assert_eq!(ctx.state(), ContextState::Ready);
        unsafe { ctx.enqueue_v3(CudaStream::DEFAULT).unwrap() };
        assert_eq!(ctx.state(), ContextState::Enqueued);
    }

    #[test]
    fn test_dynamic_shape_resolution() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert_eq!(ctx.tensor_shape("images").unwrap(), [-1, 3, 224, 224]);
        assert!(!ctx.all_input_dimensions_specified());
        assert!(!ctx.all_input_shapes_specified());

        ctx.set_input_shape("images", &[2, 3, 224, 224]).unwrap();
        assert_eq!(ctx.tensor_shape("images").unwrap(), [2, 3, 224, 224]);
        assert_eq!(ctx.tensor_shape("logits").unwrap(), [2, 1000]);
        assert_eq!(ctx.tensor_strides("images").unwrap(), [150528, 50176, 224, 1]);
        assert!(ctx.all_input_dimensions_specified());
        assert!(ctx.all_input_shapes_specified());
        assert_eq!(ctx.max_output_size("logits").unwrap(), 2 * 1000 * 4);
    }

    #[test]
    fn test_rejected_shape_keeps_previous_binding() {
        let handler = Collect::default();
        let logger = Logger::new(handler.clone()).unwrap();
        let engine = engine_with(&logger);
        let mut ctx = engine.create_execution_context().unwrap();
        ctx.set_input_shape("images", &[2, 3, 224, 224]).unwrap();

        let rejected: [&[i64]; 4] = [
            &[2, 3, 224],
            &[2, 4, 224, 224],
            &[-2, 3, 224, 224],
            &[9, 3, 224, 224],
        ];
        for bad in rejected {
            let err = ctx.set_input_shape("images", bad).unwrap_err();
            assert!(matches!(err, Error::Shape { ref name, .. } if name == "images"), "{err}");
            assert_eq!(ctx.tensor_shape("images").unwrap(), [2, 3, 224, 224]);
        }

        let errors = handler.0.lock().unwrap();
        assert!(errors
            .iter()
            .all(|(severity, msg)| *severity == Severity::Error && msg.contains("setInputShape")));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_shape_on_output_is_wrong_mode() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert!(matches!(
            ctx.set_input_shape("logits", &[2, 1000]),
            Err(Error::WrongIoMode { expected: "input", .. })
        ));
        assert!(matches!(
            ctx.set_input_shape("nope", &[1]),
            Err(Error::UnknownTensor(_))
        ));
    }

    #[test]
    fn test_address_binding() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert!(ctx.get_tensor_address("images").unwrap().is_null());

        ctx.set_input_tensor_address("images", IMAGES).unwrap();
        assert_eq!(ctx.get_tensor_address("images").unwrap(), IMAGES);

        ctx.set_tensor_address("logits", LOGITS).unwrap();
        assert_eq!(ctx.get_output_tensor_address("logits").unwrap(), LOGITS);

        // rebinding overwrites
        ctx.set_tensor_address("logits", LOGITS.offset(0x100)).unwrap();
        assert_eq!(ctx.get_tensor_address("logits").unwrap(), LOGITS.offset(0x100));

        assert!(matches!(
            ctx.set_input_tensor_address("logits", LOGITS),
            Err(Error::WrongIoMode { expected: "input", .. })
        ));
        assert!(matches!(
            ctx.get_output_tensor_address("images"),
            Err(Error::WrongIoMode { expected: "output", .. })
        ));
    }

    #[test]
    fn test_invalid_addresses() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert!(matches!(
            ctx.set_tensor_address("images", DevicePtr::null()),
            Err(Error::InvalidAddress { address: 0, .. })
        ));
        assert!(matches!(
            ctx.set_tensor_address("images", DevicePtr::from_raw(0x1001)),
            Err(Error::InvalidAddress { address: 0x1001, .. })
        ));
        assert!(ctx.get_tensor_address("images").unwrap().is_null());
    }

    #[test]
    fn test_profile_switch_clears_shapes() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        ctx.set_input_shape("images", &[2, 3, 224, 224]).unwrap();

        // 2 is outside profile 1's range
        ctx.set_optimization_profile_async(1, CudaStream::DEFAULT).unwrap();
        assert_eq!(ctx.optimization_profile(), 1);
        assert!(!ctx.all_input_dimensions_specified());
        assert!(ctx.set_input_shape("images", &[2, 3, 224, 224]).is_err());
        ctx.set_input_shape("images", &[24, 3, 224, 224]).unwrap();

        assert!(matches!(
            ctx.set_optimization_profile_async(2, CudaStream::DEFAULT),
            Err(Error::ProfileOutOfRange { index: 2, count: 2 })
        ));
        assert_eq!(ctx.optimization_profile(), 1);
    }

    #[test]
    fn test_device_memory_protocol() {
        let engine = engine();
        let mut ctx = engine.create_execution_context_without_device_memory().unwrap();
        assert!(ctx.requires_device_memory());
        ctx.set_input_shape("images", &[1, 3, 224, 224]).unwrap();
        ctx.set_tensor_address("images", IMAGES).unwrap();
        ctx.set_tensor_address("logits", LOGITS).unwrap();
        assert_eq!(ctx.state(), ContextState::AddressesBound);

        assert!(matches!(
            unsafe { ctx.enqueue_v3(CudaStream::DEFAULT) },
            Err(Error::DeviceMemoryRequired)
        ));
        assert!(matches!(
            ctx.set_device_memory(DevicePtr::from_raw(0x9000), 1024),
            Err(Error::DeviceMemoryTooSmall { size: 1024, required: 4096 })
        ));
        assert!(matches!(
            ctx.set_device_memory(DevicePtr::null(), 4096),
            Err(Error::InvalidAddress { .. })
        ));

        ctx.set_device_memory(DevicePtr::from_raw(0x9000), 4096).unwrap();
        assert_eq!(ctx.device_memory(), Some((DevicePtr::from_raw(0x9000), 4096)));
        assert_eq!(ctx.state(), ContextState::Ready);
        unsafe { ctx.enqueue_v3(CudaStream::from_raw(0x42)).unwrap() };
    }

    #[test]
    fn test_device_memory_on_managed_context() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert!(matches!(
            ctx.set_device_memory(DevicePtr::from_raw(0x9000), 1 << 20),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_enqueue_preconditions() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();
        assert!(matches!(
            unsafe { ctx.enqueue_v3(CudaStream::DEFAULT) },
            Err(Error::ShapesNotSpecified)
        ));

        ctx.set_input_shape("images", &[1, 3, 224, 224]).unwrap();
        ctx.set_tensor_address("images", IMAGES).unwrap();
        assert!(matches!(
            unsafe { ctx.enqueue_v3(CudaStream::DEFAULT) },
            Err(Error::AddressNotBound(name)) if name == "logits"
        ));
    }

    #[test]
    fn test_ancillary_controls() {
        let engine = engine();
        let mut ctx = engine.create_execution_context().unwrap();

        ctx.set_debug_sync(true);
        assert!(ctx.debug_sync());

        ctx.set_name("worker-0").unwrap();
        assert_eq!(ctx.name(), "worker-0");
        assert!(ctx.set_name("bad\0name").is_err());

        ctx.set_nvtx_verbosity(NvtxVerbosity::Detailed).unwrap();
        assert_eq!(ctx.nvtx_verbosity(), NvtxVerbosity::Detailed);

        assert!(ctx.enqueue_emits_profile());
        assert!(ctx.report_to_profiler().is_err());
        ctx.set_enqueue_emits_profile(false);
        assert!(ctx.report_to_profiler().is_ok());

        ctx.set_persistent_cache_limit(1 << 20);
        assert_eq!(ctx.persistent_cache_limit(), 1 << 20);

        // this engine runs no auxiliary work
        ctx.set_aux_streams(&[CudaStream::from_raw(0x10), CudaStream::from_raw(0x20)]);
        assert!(ctx.aux_streams().is_empty());

        ctx.set_input_consumed_event(CudaEvent::from_raw(0x77)).unwrap();
        assert_eq!(ctx.input_consumed_event(), CudaEvent::from_raw(0x77));
    }

    #[test]
    fn test_aux_streams_truncated_to_engine_count() {
        let blob = MockEngine::new("branches")
            .aux_streams(2)
            .input("x", "float", &[1, 16])
            .output("y", "float", "1x16")
            .build();
        let engine = Runtime::new(&Logger::tracing().unwrap())
            .unwrap()
            .deserialize_cuda_engine(&blob)
            .unwrap();
        let mut ctx = engine.create_execution_context().unwrap();
        assert!(ctx.aux_streams().is_empty());

        let streams = [0x10, 0x20, 0x30].map(CudaStream::from_raw);
        ctx.set_aux_streams(&streams);
        assert_eq!(ctx.aux_streams(), &streams[..2]);

        ctx.set_aux_streams(&streams[..1]);
        assert_eq!(ctx.aux_streams(), &streams[..1]);

        ctx.set_aux_streams(&[]);
        assert!(ctx.aux_streams().is_empty());
    }

    #[test]
    fn test_oversized_shapes_are_rejected_or_saturate() {
        let blob = MockEngine::new("unbounded")
            .input("input", "float", &[-1, 3])
            .output("out", "float", "1000x1000xinput.0x1000")
            .build();
        let engine = Runtime::new(&Logger::tracing().unwrap())
            .unwrap()
            .deserialize_cuda_engine(&blob)
            .unwrap();
        let mut ctx = engine.create_execution_context().unwrap();

        // element count overflows i64
        let err = ctx.set_input_shape("input", &[i64::MAX / 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Shape { .. }), "{err}");
        assert!(!ctx.all_input_dimensions_specified());

        let batch = i64::MAX / 8;
        ctx.set_input_shape("input", &[batch, 3]).unwrap();
        assert_eq!(ctx.tensor_strides("input").unwrap(), [3, 1]);
        assert_eq!(ctx.tensor_shape("out").unwrap(), [1000, 1000, batch, 1000]);
        // strides past the overflowing axis are unknown
        assert_eq!(ctx.tensor_strides("out").unwrap(), [-1, -1, 1000, 1]);
        assert!(matches!(
            ctx.max_output_size("out"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_set_input_shapes_checks_names_first() {
        let blob = MockEngine::new("pair")
            .input("a", "float", &[-1, 8])
            .input("b", "float", &[-1, 8])
            .output("sum", "float", "a.0x8")
            .profile("a", 0, &[1, 8], &[2, 8], &[4, 8])
            .profile("b", 0, &[1, 8], &[2, 8], &[4, 8])
            .build();
        let engine = Runtime::new(&Logger::tracing().unwrap())
            .unwrap()
            .deserialize_cuda_engine(&blob)
            .unwrap();
        let mut ctx = engine.create_execution_context().unwrap();

        let err = ctx
            .set_input_shapes([("a", vec![2i64, 8]), ("missing", vec![2i64, 8])])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTensor(_)));
        assert_eq!(ctx.tensor_shape("a").unwrap(), [-1, 8]);
        assert_eq!(ctx.state(), ContextState::Created);

        assert!(matches!(
            ctx.set_input_shapes([("sum", [2i64, 8])]),
            Err(Error::WrongIoMode { expected: "input", .. })
        ));

        // out of profile range: a is bound, b is not
        let err = ctx
            .set_input_shapes([("a", [3i64, 8]), ("b", [9i64, 8])])
            .unwrap_err();
        assert!(matches!(err, Error::Shape { ref name, .. } if name == "b"));
        assert_eq!(ctx.tensor_shape("a").unwrap(), [3, 8]);
        assert_eq!(ctx.tensor_shape("b").unwrap(), [-1, 8]);
    }

    #[test]
    fn test_context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ExecutionContext<'static>>();
    }
}
