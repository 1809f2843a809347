//! Deserialized engines and their tensor metadata

use crate::context::ExecutionContext;
use crate::error::{error_buffer, Error, Result};
use crate::logger::Logger;
use crate::tensor::{DataType, Dims, ProfileSelector, TensorDesc, TensorFormat, TensorIoMode};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use trtrun_sys::*;

/// Per-name engine query as exposed by the shim
type TensorQuery<T> =
    unsafe extern "C" fn(*mut TrtCudaEngine, *const c_char, *mut T, *mut c_char, usize) -> i32;

/// Hardware compatibility the engine was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCompatibilityLevel {
    /// Runs only on the GPU architecture it was built on
    None,
    /// Runs on Ampere and newer
    AmperePlus,
    /// Runs on GPUs with the same compute capability
    SameComputeCapability,
    Other(i32),
}

impl HardwareCompatibilityLevel {
    fn from_raw(raw: i32) -> Self {
        match raw {
            0 => HardwareCompatibilityLevel::None,
            1 => HardwareCompatibilityLevel::AmperePlus,
            2 => HardwareCompatibilityLevel::SameComputeCapability,
            other => HardwareCompatibilityLevel::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCapability {
    Standard,
    Safety,
    DlaStandalone,
    Other(i32),
}

impl EngineCapability {
    fn from_raw(raw: i32) -> Self {
        match raw {
            0 => EngineCapability::Standard,
            1 => EngineCapability::Safety,
            2 => EngineCapability::DlaStandalone,
            other => EngineCapability::Other(other),
        }
    }
}

/// A deserialized engine
///
/// Engines are immutable once loaded and can be shared between threads; each
/// thread drives its own [`ExecutionContext`].
pub struct CudaEngine {
    inner: *mut TrtCudaEngine,
    io_names: Vec<String>,
    // Keeps the native logger alive for messages raised by this engine
    logger: Logger,
}

impl CudaEngine {
    /// Take ownership of a native engine and cache its IO tensor names
    ///
    /// # Safety
    ///
    /// `inner` must be a valid engine handle that nothing else will destroy.
    pub(crate) unsafe fn from_raw(inner: *mut TrtCudaEngine, logger: Logger) -> Result<Self> {
        let mut engine = CudaEngine {
            inner,
            io_names: Vec::new(),
            logger,
        };

        let mut count: i32 = 0;
        let result = trt_cuda_engine_get_nb_io_tensors(inner, &mut count);
        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &[]));
        }

        for index in 0..count {
            let name = engine.fetch_io_tensor_name(index)?;
            engine.io_names.push(name);
        }

        tracing::debug!(
            name = %engine.name(),
            io_tensors = count,
            layers = engine.num_layers(),
            "deserialized engine"
        );
        Ok(engine)
    }

    fn fetch_io_tensor_name(&self, index: i32) -> Result<String> {
        let mut name_ptr: *const c_char = std::ptr::null();
        let mut error_msg = error_buffer();

        let result = unsafe {
            trt_cuda_engine_get_io_tensor_name(
                self.inner,
                index,
                &mut name_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        if name_ptr.is_null() {
            return Err(Error::Runtime(format!("IO tensor {index} has no name")));
        }

        let name = unsafe { CStr::from_ptr(name_ptr) }.to_str()?.to_string();
        Ok(name)
    }

    /// Number of IO tensors
    pub fn num_io_tensors(&self) -> i32 {
        self.io_names.len() as i32
    }

    /// Name of the IO tensor at `index`, in `[0, num_io_tensors())`
    pub fn io_tensor_name(&self, index: i32) -> Result<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.io_names.get(i))
            .map(String::as_str)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "IO tensor index {index} out of range [0, {})",
                    self.io_names.len()
                ))
            })
    }

    /// All IO tensor names, in binding index order
    pub fn io_tensor_names(&self) -> &[String] {
        &self.io_names
    }

    /// Whether `name` is one of the engine's IO tensors
    pub fn has_tensor(&self, name: &str) -> bool {
        self.io_names.iter().any(|n| n == name)
    }

    /// Validate `name` against the engine and convert it for the FFI
    pub(crate) fn tensor_cstr(&self, name: &str) -> Result<CString> {
        if !self.has_tensor(name) {
            return Err(Error::UnknownTensor(name.to_string()));
        }
        Ok(CString::new(name)?)
    }

    fn query<T: Default>(&self, name: &str, f: TensorQuery<T>) -> Result<T> {
        let name_cstr = self.tensor_cstr(name)?;
        let mut value = T::default();
        let mut error_msg = error_buffer();

        let result = unsafe {
            f(
                self.inner,
                name_cstr.as_ptr(),
                &mut value,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        Ok(value)
    }

    /// Engine-level shape; dynamic axes are `-1`
    pub fn tensor_shape(&self, name: &str) -> Result<Dims> {
        let raw = self.query(name, trt_cuda_engine_get_tensor_shape)?;
        Ok(Dims::from_raw(&raw))
    }

    /// Element type of a tensor
    pub fn tensor_dtype(&self, name: &str) -> Result<DataType> {
        DataType::from_raw(self.query(name, trt_cuda_engine_get_tensor_dtype)?)
    }

    /// Whether a tensor is an input or an output
    pub fn tensor_io_mode(&self, name: &str) -> Result<TensorIoMode> {
        TensorIoMode::from_raw(self.query(name, trt_cuda_engine_get_tensor_io_mode)?)
    }

    /// Memory layout the engine expects for a tensor
    pub fn tensor_format(&self, name: &str) -> Result<TensorFormat> {
        TensorFormat::from_raw(self.query(name, trt_cuda_engine_get_tensor_format)?)
    }

    /// Bytes per component of a vectorized element
    pub fn tensor_bytes_per_component(&self, name: &str) -> Result<i32> {
        self.query(name, trt_cuda_engine_get_tensor_bytes_per_component)
    }

    /// Components packed into one vectorized element, 1 for linear formats
    pub fn tensor_components_per_element(&self, name: &str) -> Result<i32> {
        self.query(name, trt_cuda_engine_get_tensor_components_per_element)
    }

    /// Vectorized axis, or `-1` for scalar formats
    pub fn tensor_vectorized_dim(&self, name: &str) -> Result<i32> {
        self.query(name, trt_cuda_engine_get_tensor_vectorized_dim)
    }

    /// Whether the tensor is a shape tensor read on the host
    pub fn is_shape_inference_io(&self, name: &str) -> Result<bool> {
        self.query(name, trt_cuda_engine_is_shape_inference_io)
    }

    /// Min, optimum or max shape of an input in one optimization profile
    pub fn profile_shape(&self, name: &str, profile: i32, selector: ProfileSelector) -> Result<Dims> {
        let count = self.num_optimization_profiles();
        if profile < 0 || profile >= count {
            return Err(Error::ProfileOutOfRange {
                index: profile,
                count,
            });
        }

        let name_cstr = self.tensor_cstr(name)?;
        let mut raw = TrtDims::default();
        let mut error_msg = error_buffer();

        let result = unsafe {
            trt_cuda_engine_get_profile_shape(
                self.inner,
                name_cstr.as_ptr(),
                profile,
                selector.as_raw(),
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

    /// All metadata of one IO tensor
    pub fn tensor_desc(&self, name: &str) -> Result<TensorDesc> {
        let vectorized_dim = self.tensor_vectorized_dim(name)?;
        Ok(TensorDesc {
            name: name.to_string(),
            io_mode: self.tensor_io_mode(name)?,
            dtype: self.tensor_dtype(name)?,
            shape: self.tensor_shape(name)?,
            format: self.tensor_format(name)?,
            bytes_per_component: self.tensor_bytes_per_component(name)?,
            components_per_element: self.tensor_components_per_element(name)?,
            vectorized_dim: (vectorized_dim >= 0).then_some(vectorized_dim),
            shape_inference_io: self.is_shape_inference_io(name)?,
        })
    }

    /// Metadata of every IO tensor, in index order
    pub fn tensor_descs(&self) -> Result<Vec<TensorDesc>> {
        self.io_names.iter().map(|name| self.tensor_desc(name)).collect()
    }

    /// Number of layers after optimization
    pub fn num_layers(&self) -> i32 {
        unsafe { trt_cuda_engine_get_nb_layers(self.inner) }
    }

    /// Bytes a context created without device memory must be given
    pub fn device_memory_size(&self) -> usize {
        unsafe { trt_cuda_engine_get_device_memory_size(self.inner) }
    }

    /// Number of optimization profiles the engine was built with
    pub fn num_optimization_profiles(&self) -> i32 {
        unsafe { trt_cuda_engine_get_nb_optimization_profiles(self.inner) }
    }

    /// GPU architectures the engine may run on
    pub fn hardware_compatibility_level(&self) -> HardwareCompatibilityLevel {
        HardwareCompatibilityLevel::from_raw(unsafe {
            trt_cuda_engine_get_hardware_compatibility_level(self.inner)
        })
    }

    /// Auxiliary streams the engine uses besides the enqueue stream
    pub fn num_aux_streams(&self) -> i32 {
        unsafe { trt_cuda_engine_get_nb_aux_streams(self.inner) }
    }

    /// Whether the weights may be refitted
    pub fn is_refittable(&self) -> bool {
        unsafe { trt_cuda_engine_is_refittable(self.inner) }
    }

    /// Name given to the network at build time
    pub fn name(&self) -> String {
        let ptr = unsafe { trt_cuda_engine_get_name(self.inner) };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    /// Capability class the engine was built for
    pub fn engine_capability(&self) -> EngineCapability {
        EngineCapability::from_raw(unsafe { trt_cuda_engine_get_engine_capability(self.inner) })
    }

    /// Create an execution context with internally managed device memory
    pub fn create_execution_context(&self) -> Result<ExecutionContext<'_>> {
        self.new_context(false)
    }

    /// Create an execution context whose device memory the caller supplies
    ///
    /// [`ExecutionContext::set_device_memory`] must be called with at least
    /// [`device_memory_size`](Self::device_memory_size) bytes before enqueue.
    pub fn create_execution_context_without_device_memory(&self) -> Result<ExecutionContext<'_>> {
        self.new_context(true)
    }

    fn new_context(&self, user_managed: bool) -> Result<ExecutionContext<'_>> {
        let mut context_ptr: *mut TrtExecutionContext = std::ptr::null_mut();
        let mut error_msg = error_buffer();

        let result = unsafe {
            if user_managed {
                trt_cuda_engine_create_execution_context_without_device_memory(
                    self.inner,
                    &mut context_ptr,
                    error_msg.as_mut_ptr(),
                    error_msg.len(),
                )
            } else {
                trt_cuda_engine_create_execution_context(
                    self.inner,
                    &mut context_ptr,
                    error_msg.as_mut_ptr(),
                    error_msg.len(),
                )
            }
        };

        if result != TRT_SUCCESS || context_ptr.is_null() {
            let err = Error::from_ffi(result, &error_msg);
            return Err(Error::ContextCreation(err.ffi_message()));
        }

        // SAFETY: freshly created and owned by nobody else
        Ok(unsafe { ExecutionContext::from_raw(context_ptr, self, user_managed) })
    }

    /// Logger inherited from the runtime
    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl std::fmt::Debug for CudaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaEngine")
            .field("name", &self.name())
            .field("io_tensors", &self.io_names)
            .finish()
    }
}

impl Drop for CudaEngine {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trt_cuda_engine_destroy(self.inner);
            }
            tracing::debug!("destroyed engine");
        }
    }
}

unsafe impl Send for CudaEngine {}
unsafe impl Sync for CudaEngine {}
