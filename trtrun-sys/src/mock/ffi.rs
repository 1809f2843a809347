//! Pure-Rust implementation of the `wrapper.hpp` ABI.
//!
//! Signatures match what bindgen generates for the real shim, so the safe
//! crate compiles unchanged against either backend.

use super::desc::{Dim, EngineDesc};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TRT_SUCCESS: i32 = 0;
pub const TRT_ERROR_INVALID_ARGUMENT: i32 = 1;
pub const TRT_ERROR_OUT_OF_MEMORY: i32 = 2;
pub const TRT_ERROR_RUNTIME_ERROR: i32 = 3;
pub const TRT_ERROR_CUDA_ERROR: i32 = 4;
pub const TRT_ERROR_UNKNOWN: i32 = 99;

pub const TRT_SEVERITY_INTERNAL_ERROR: i32 = 0;
pub const TRT_SEVERITY_ERROR: i32 = 1;
pub const TRT_SEVERITY_WARNING: i32 = 2;
pub const TRT_SEVERITY_INFO: i32 = 3;
pub const TRT_SEVERITY_VERBOSE: i32 = 4;

pub const TRT_TENSOR_IO_MODE_NONE: i32 = 0;
pub const TRT_TENSOR_IO_MODE_INPUT: i32 = 1;
pub const TRT_TENSOR_IO_MODE_OUTPUT: i32 = 2;

pub const TRT_PROFILE_SELECTOR_MIN: i32 = 0;
pub const TRT_PROFILE_SELECTOR_OPT: i32 = 1;
pub const TRT_PROFILE_SELECTOR_MAX: i32 = 2;

pub const TRT_MAX_DIMS: i32 = 8;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
pub struct TrtDims {
    pub nb_dims: i32,
    pub d: [i64; 8],
}

pub type TrtLoggerCallback = ::std::option::Option<
    unsafe extern "C" fn(user_data: *mut c_void, severity: i32, msg: *const c_char),
>;

pub struct TrtLogger {
    callback: TrtLoggerCallback,
    user_data: *mut c_void,
}

impl TrtLogger {
    fn emit(&self, severity: i32, msg: &str) {
        let Some(callback) = self.callback else {
            return;
        };
        let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
        unsafe { callback(self.user_data, severity, msg.as_ptr()) }
    }
}

pub struct TrtRuntime {
    logger: *mut TrtLogger,
    max_threads: i32,
    host_code_allowed: bool,
}

pub struct TrtCudaEngine {
    desc: Arc<EngineDesc>,
    logger: *mut TrtLogger,
}

pub struct TrtExecutionContext {
    engine: Arc<EngineDesc>,
    logger: *mut TrtLogger,
    profile: i32,
    shapes: Vec<Option<Vec<i64>>>,
    addresses: Vec<usize>,
    user_managed: bool,
    device_memory: Option<(usize, usize)>,
    debug_sync: bool,
    name: CString,
    emits_profile: bool,
    persistent_cache_limit: usize,
    nvtx_verbosity: i32,
    aux_streams: Vec<usize>,
    input_consumed_event: usize,
}

unsafe fn log_to(logger: *mut TrtLogger, severity: i32, msg: &str) {
    if let Some(logger) = logger.as_ref() {
        logger.emit(severity, msg);
    }
}

unsafe fn write_error(buf: *mut c_char, len: usize, msg: &str) {
    if buf.is_null() || len == 0 {
        return;
    }
    let bytes = msg.as_bytes();
    let n = bytes.len().min(len - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buf, n);
    *buf.add(n) = 0;
}

macro_rules! fail {
    ($buf:expr, $len:expr, $code:expr, $($arg:tt)*) => {{
        write_error($buf, $len, &format!($($arg)*));
        return $code;
    }};
}

unsafe fn name_str<'a>(name: *const c_char) -> Option<&'a CStr> {
    if name.is_null() {
        None
    } else {
        Some(CStr::from_ptr(name))
    }
}

unsafe fn lookup(desc: &EngineDesc, name: *const c_char) -> Result<usize, String> {
    let name = name_str(name).ok_or_else(|| "tensor name is null".to_string())?;
    desc.index_of(name)
        .ok_or_else(|| format!("unknown tensor: {}", name.to_string_lossy()))
}

fn dims_to_vec(dims: &TrtDims) -> Option<Vec<i64>> {
    if dims.nb_dims < 0 || dims.nb_dims > TRT_MAX_DIMS {
        return None;
    }
    Some(dims.d[..dims.nb_dims as usize].to_vec())
}

fn vec_to_dims(values: &[i64]) -> TrtDims {
    let mut dims = TrtDims {
        nb_dims: values.len() as i32,
        ..TrtDims::default()
    };
    dims.d[..values.len()].copy_from_slice(values);
    dims
}

impl TrtExecutionContext {
    fn new(engine: &TrtCudaEngine, user_managed: bool) -> Self {
        let count = engine.desc.tensors.len();
        TrtExecutionContext {
            engine: Arc::clone(&engine.desc),
            logger: engine.logger,
            profile: 0,
            shapes: vec![None; count],
            addresses: vec![0; count],
            user_managed,
            device_memory: None,
            debug_sync: false,
            name: CString::default(),
            emits_profile: true,
            persistent_cache_limit: 0,
            nvtx_verbosity: 0,
            aux_streams: Vec::new(),
            input_consumed_event: 0,
        }
    }

    fn shape_of(&self, index: usize) -> Vec<i64> {
        let tensor = &self.engine.tensors[index];
        if tensor.is_input() {
            if let Some(shape) = &self.shapes[index] {
                return shape.clone();
            }
            return tensor.engine_dims();
        }
        tensor
            .dims
            .iter()
            .map(|dim| match *dim {
                Dim::Fixed(v) => v,
                Dim::Dynamic => -1,
                Dim::Linked { input, axis } => self.shape_of(input)[axis],
            })
            .collect()
    }

    fn check_input_shape(&self, index: usize, shape: &[i64]) -> Result<(), String> {
        let tensor = &self.engine.tensors[index];
        let name = tensor.name.to_string_lossy();
        if !tensor.is_input() {
            return Err(format!("{name} is not an input tensor"));
        }
        if shape.len() != tensor.dims.len() {
            return Err(format!(
                "{name}: rank {} does not match engine rank {}",
                shape.len(),
                tensor.dims.len()
            ));
        }
        for (axis, (&value, dim)) in shape.iter().zip(&tensor.dims).enumerate() {
            if value < 0 {
                return Err(format!("{name}: dimension {axis} is negative"));
            }
            if let Dim::Fixed(fixed) = *dim {
                if fixed != value {
                    return Err(format!(
                        "{name}: dimension {axis} is {value}, engine requires {fixed}"
                    ));
                }
            }
        }
        if shape.iter().try_fold(1i64, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(format!("{name}: element count of {shape:?} overflows"));
        }
        if let Some(Some(range)) = tensor.ranges.get(self.profile as usize) {
            for axis in 0..shape.len() {
                if shape[axis] < range.min[axis] || shape[axis] > range.max[axis] {
                    return Err(format!(
                        "{name}: dimension {axis} = {} outside profile {} range [{}, {}]",
                        shape[axis], self.profile, range.min[axis], range.max[axis]
                    ));
                }
            }
        }
        Ok(())
    }

    fn all_dimensions_specified(&self) -> bool {
        (0..self.engine.tensors.len())
            .filter(|&i| self.engine.tensors[i].is_input())
            .all(|i| self.shape_of(i).iter().all(|&d| d >= 0))
    }

    fn all_shapes_specified(&self) -> bool {
        self.all_dimensions_specified()
            && self
                .engine
                .tensors
                .iter()
                .zip(&self.addresses)
                .filter(|(t, _)| t.is_input() && t.shape_io)
                .all(|(_, &address)| address != 0)
    }

    fn strides_of(&self, index: usize) -> Vec<i64> {
        let shape = self.shape_of(index);
        let mut strides = vec![0i64; shape.len()];
        let mut acc = Some(1i64);
        for axis in (0..shape.len()).rev() {
            strides[axis] = acc.unwrap_or(-1);
            acc = match (acc, shape[axis]) {
                (Some(a), d) if d >= 0 => a.checked_mul(d),
                _ => None,
            };
        }
        strides
    }

    fn max_output_bytes(&self, index: usize) -> Option<usize> {
        let tensor = &self.engine.tensors[index];
        let profile = self.profile as usize;
        let mut volume: usize = 1;
        for dim in &tensor.dims {
            let value = match *dim {
                Dim::Fixed(v) => v,
                Dim::Dynamic => return None,
                Dim::Linked { input, axis } => {
                    let bound = self.shape_of(input)[axis];
                    if bound >= 0 {
                        bound
                    } else {
                        self.engine.tensors[input]
                            .ranges
                            .get(profile)?
                            .as_ref()?
                            .max[axis]
                    }
                }
            };
            volume = volume.checked_mul(value as usize)?;
        }
        volume.checked_mul(tensor.bytes_per_component())
    }

    fn enqueue_blocker(&self) -> Option<String> {
        if self.user_managed && self.device_memory.is_none() {
            return Some("device memory was not set on a user-managed context".into());
        }
        if !self.all_dimensions_specified() {
            return Some("not all input dimensions are specified".into());
        }
        if let Some(tensor) = self
            .engine
            .tensors
            .iter()
            .zip(&self.addresses)
            .find(|(_, &address)| address == 0)
            .map(|(t, _)| t)
        {
            return Some(format!(
                "address of tensor {} is not set",
                tensor.name.to_string_lossy()
            ));
        }
        None
    }
}

// Logger

pub unsafe extern "C" fn trt_logger_create(
    callback: TrtLoggerCallback,
    user_data: *mut c_void,
    out_logger: *mut *mut TrtLogger,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if out_logger.is_null() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "out_logger is null");
    }
    *out_logger = Box::into_raw(Box::new(TrtLogger { callback, user_data }));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_logger_destroy(logger: *mut TrtLogger) {
    if !logger.is_null() {
        drop(Box::from_raw(logger));
    }
}

// Runtime

pub unsafe extern "C" fn trt_runtime_create(
    logger: *mut TrtLogger,
    out_runtime: *mut *mut TrtRuntime,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if logger.is_null() || out_runtime.is_null() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "logger or out_runtime is null");
    }
    *out_runtime = Box::into_raw(Box::new(TrtRuntime {
        logger,
        max_threads: 1,
        host_code_allowed: false,
    }));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_runtime_destroy(runtime: *mut TrtRuntime) {
    if !runtime.is_null() {
        drop(Box::from_raw(runtime));
    }
}

pub unsafe extern "C" fn trt_runtime_deserialize_cuda_engine(
    runtime: *mut TrtRuntime,
    data: *const c_void,
    size: usize,
    out_engine: *mut *mut TrtCudaEngine,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if runtime.is_null() || data.is_null() || out_engine.is_null() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "null argument to deserialize");
    }
    let runtime = &*runtime;
    let bytes = std::slice::from_raw_parts(data as *const u8, size);

    let desc = match EngineDesc::parse(bytes) {
        Ok(desc) => desc,
        Err(reason) => {
            let msg = format!("IRuntime::deserializeCudaEngine: {reason}");
            log_to(runtime.logger, TRT_SEVERITY_ERROR, &msg);
            fail!(error_msg, error_msg_len, TRT_ERROR_RUNTIME_ERROR, "{msg}");
        }
    };
    if desc.host_code && !runtime.host_code_allowed {
        let msg = "IRuntime::deserializeCudaEngine: engine contains host code, \
                   which is not allowed by this runtime";
        log_to(runtime.logger, TRT_SEVERITY_ERROR, msg);
        fail!(error_msg, error_msg_len, TRT_ERROR_RUNTIME_ERROR, "{msg}");
    }

    log_to(
        runtime.logger,
        TRT_SEVERITY_VERBOSE,
        &format!("Loaded engine size: {size} bytes, {} IO tensors", desc.tensors.len()),
    );
    *out_engine = Box::into_raw(Box::new(TrtCudaEngine {
        desc: Arc::new(desc),
        logger: runtime.logger,
    }));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_runtime_set_max_threads(
    runtime: *mut TrtRuntime,
    max_threads: i32,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if max_threads < 1 {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "maxThreads must be positive");
    }
    (*runtime).max_threads = max_threads;
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_runtime_get_max_threads(runtime: *mut TrtRuntime) -> i32 {
    (*runtime).max_threads
}

pub unsafe extern "C" fn trt_runtime_set_engine_host_code_allowed(runtime: *mut TrtRuntime, allowed: bool) {
    (*runtime).host_code_allowed = allowed;
}

pub unsafe extern "C" fn trt_runtime_get_engine_host_code_allowed(runtime: *mut TrtRuntime) -> bool {
    (*runtime).host_code_allowed
}

// CudaEngine

pub unsafe extern "C" fn trt_cuda_engine_destroy(engine: *mut TrtCudaEngine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

pub unsafe extern "C" fn trt_cuda_engine_create_execution_context(
    engine: *mut TrtCudaEngine,
    out_context: *mut *mut TrtExecutionContext,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if engine.is_null() || out_context.is_null() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "engine or out_context is null");
    }
    *out_context = Box::into_raw(Box::new(TrtExecutionContext::new(&*engine, false)));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_cuda_engine_create_execution_context_without_device_memory(
    engine: *mut TrtCudaEngine,
    out_context: *mut *mut TrtExecutionContext,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if engine.is_null() || out_context.is_null() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "engine or out_context is null");
    }
    *out_context = Box::into_raw(Box::new(TrtExecutionContext::new(&*engine, true)));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_cuda_engine_get_nb_io_tensors(
    engine: *mut TrtCudaEngine,
    out_count: *mut i32,
) -> i32 {
    if engine.is_null() || out_count.is_null() {
        return TRT_ERROR_INVALID_ARGUMENT;
    }
    *out_count = (&(*engine).desc).tensors.len() as i32;
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_cuda_engine_get_io_tensor_name(
    engine: *mut TrtCudaEngine,
    index: i32,
    out_name: *mut *const c_char,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let tensors = &(&(*engine).desc).tensors;
    if index < 0 || index as usize >= tensors.len() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "tensor index out of range");
    }
    *out_name = tensors[index as usize].name.as_ptr();
    TRT_SUCCESS
}

/// Shared body of the per-tensor engine queries.
macro_rules! engine_tensor_query {
    ($fn_name:ident, $out_ty:ty, |$tensor:ident| $value:expr) => {
        pub unsafe extern "C" fn $fn_name(
            engine: *mut TrtCudaEngine,
            name: *const c_char,
            out_value: *mut $out_ty,
            error_msg: *mut c_char,
            error_msg_len: usize,
        ) -> i32 {
            let desc = &(*engine).desc;
            match lookup(desc, name) {
                Ok(index) => {
                    let $tensor = &desc.tensors[index];
                    *out_value = $value;
                    TRT_SUCCESS
                }
                Err(msg) => fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "{msg}"),
            }
        }
    };
}

engine_tensor_query!(trt_cuda_engine_get_tensor_shape, TrtDims, |t| vec_to_dims(&t.engine_dims()));
engine_tensor_query!(trt_cuda_engine_get_tensor_dtype, i32, |t| t.dtype);
engine_tensor_query!(trt_cuda_engine_get_tensor_io_mode, i32, |t| t.mode);
engine_tensor_query!(trt_cuda_engine_get_tensor_format, i32, |_t| 0);
engine_tensor_query!(trt_cuda_engine_get_tensor_bytes_per_component, i32, |t| {
    t.bytes_per_component() as i32
});
engine_tensor_query!(trt_cuda_engine_get_tensor_components_per_element, i32, |_t| 1);
engine_tensor_query!(trt_cuda_engine_get_tensor_vectorized_dim, i32, |_t| -1);
engine_tensor_query!(trt_cuda_engine_is_shape_inference_io, bool, |t| t.shape_io);

pub unsafe extern "C" fn trt_cuda_engine_get_profile_shape(
    engine: *mut TrtCudaEngine,
    name: *const c_char,
    profile_index: i32,
    selector: i32,
    out_dims: *mut TrtDims,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let desc = &(*engine).desc;
    let index = match lookup(desc, name) {
        Ok(index) => index,
        Err(msg) => fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "{msg}"),
    };
    if profile_index < 0 || profile_index >= desc.profiles {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "optimization profile index out of range");
    }
    let tensor = &desc.tensors[index];
    let range = tensor.ranges.get(profile_index as usize).and_then(Option::as_ref);
    let shape = match (range, selector) {
        (Some(r), TRT_PROFILE_SELECTOR_MIN) => r.min.clone(),
        (Some(r), TRT_PROFILE_SELECTOR_OPT) => r.opt.clone(),
        (Some(r), TRT_PROFILE_SELECTOR_MAX) => r.max.clone(),
        (None, TRT_PROFILE_SELECTOR_MIN..=TRT_PROFILE_SELECTOR_MAX) => tensor.engine_dims(),
        _ => fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "invalid profile selector"),
    };
    *out_dims = vec_to_dims(&shape);
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_cuda_engine_get_nb_layers(engine: *mut TrtCudaEngine) -> i32 {
    (&(*engine).desc).layers
}

pub unsafe extern "C" fn trt_cuda_engine_get_device_memory_size(engine: *mut TrtCudaEngine) -> usize {
    (&(*engine).desc).device_memory
}

pub unsafe extern "C" fn trt_cuda_engine_get_nb_optimization_profiles(engine: *mut TrtCudaEngine) -> i32 {
    (&(*engine).desc).profiles
}

pub unsafe extern "C" fn trt_cuda_engine_get_hardware_compatibility_level(engine: *mut TrtCudaEngine) -> i32 {
    (&(*engine).desc).hardware_compat
}

pub unsafe extern "C" fn trt_cuda_engine_get_nb_aux_streams(engine: *mut TrtCudaEngine) -> i32 {
    (&(*engine).desc).aux_streams
}

pub unsafe extern "C" fn trt_cuda_engine_is_refittable(engine: *mut TrtCudaEngine) -> bool {
    (&(*engine).desc).refittable
}

pub unsafe extern "C" fn trt_cuda_engine_get_name(engine: *mut TrtCudaEngine) -> *const c_char {
    (&(*engine).desc).name.as_ptr()
}

pub unsafe extern "C" fn trt_cuda_engine_get_engine_capability(_engine: *mut TrtCudaEngine) -> i32 {
    0
}

// ExecutionContext

pub unsafe extern "C" fn trt_execution_context_destroy(context: *mut TrtExecutionContext) {
    if !context.is_null() {
        drop(Box::from_raw(context));
    }
}

/// Resolves `name` against the context's engine or bails out with an
/// API-usage error logged through the runtime logger.
macro_rules! context_tensor {
    ($ctx:expr, $name:expr, $api:literal, $buf:expr, $len:expr) => {
        match lookup(&$ctx.engine, $name) {
            Ok(index) => index,
            Err(msg) => {
                let msg = format!(concat!("IExecutionContext::", $api, ": {}"), msg);
                log_to($ctx.logger, TRT_SEVERITY_ERROR, &msg);
                fail!($buf, $len, TRT_ERROR_INVALID_ARGUMENT, "{msg}");
            }
        }
    };
}

pub unsafe extern "C" fn trt_execution_context_set_input_shape(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    dims: *const TrtDims,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &mut *context;
    let index = context_tensor!(ctx, name, "setInputShape", error_msg, error_msg_len);
    let Some(shape) = dims.as_ref().and_then(dims_to_vec) else {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "invalid dimension count");
    };
    if let Err(reason) = ctx.check_input_shape(index, &shape) {
        let msg = format!("IExecutionContext::setInputShape: {reason}");
        log_to(ctx.logger, TRT_SEVERITY_ERROR, &msg);
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "{msg}");
    }
    ctx.shapes[index] = Some(shape);
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_tensor_shape(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    out_dims: *mut TrtDims,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &*context;
    let index = context_tensor!(ctx, name, "getTensorShape", error_msg, error_msg_len);
    *out_dims = vec_to_dims(&ctx.shape_of(index));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_tensor_strides(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    out_strides: *mut TrtDims,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &*context;
    let index = context_tensor!(ctx, name, "getTensorStrides", error_msg, error_msg_len);
    *out_strides = vec_to_dims(&ctx.strides_of(index));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_all_input_dimensions_specified(
    context: *mut TrtExecutionContext,
) -> bool {
    (*context).all_dimensions_specified()
}

pub unsafe extern "C" fn trt_execution_context_all_input_shapes_specified(
    context: *mut TrtExecutionContext,
) -> bool {
    (*context).all_shapes_specified()
}

unsafe fn bind_address(
    ctx: &mut TrtExecutionContext,
    index: usize,
    address: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let tensor = &ctx.engine.tensors[index];
    let alignment = tensor.bytes_per_component();
    if address == 0 || address % alignment != 0 {
        let msg = format!(
            "IExecutionContext::setTensorAddress: invalid address {address:#x} for tensor {}",
            tensor.name.to_string_lossy()
        );
        log_to(ctx.logger, TRT_SEVERITY_ERROR, &msg);
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "{msg}");
    }
    ctx.addresses[index] = address;
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_set_tensor_address(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    address: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &mut *context;
    let index = context_tensor!(ctx, name, "setTensorAddress", error_msg, error_msg_len);
    bind_address(ctx, index, address, error_msg, error_msg_len)
}

pub unsafe extern "C" fn trt_execution_context_set_input_tensor_address(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    address: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &mut *context;
    let index = context_tensor!(ctx, name, "setInputTensorAddress", error_msg, error_msg_len);
    if !ctx.engine.tensors[index].is_input() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "tensor is not an input");
    }
    bind_address(ctx, index, address, error_msg, error_msg_len)
}

pub unsafe extern "C" fn trt_execution_context_get_tensor_address(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    out_address: *mut usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &*context;
    let index = context_tensor!(ctx, name, "getTensorAddress", error_msg, error_msg_len);
    *out_address = ctx.addresses[index];
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_output_tensor_address(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    out_address: *mut usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &*context;
    let index = context_tensor!(ctx, name, "getOutputTensorAddress", error_msg, error_msg_len);
    if ctx.engine.tensors[index].is_input() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "tensor is not an output");
    }
    *out_address = ctx.addresses[index];
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_set_optimization_profile_async(
    context: *mut TrtExecutionContext,
    profile_index: i32,
    _stream: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &mut *context;
    if profile_index < 0 || profile_index >= ctx.engine.profiles {
        let msg = format!(
            "IExecutionContext::setOptimizationProfileAsync: profile {profile_index} out of range [0, {})",
            ctx.engine.profiles
        );
        log_to(ctx.logger, TRT_SEVERITY_ERROR, &msg);
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "{msg}");
    }
    if profile_index != ctx.profile {
        ctx.profile = profile_index;
        ctx.shapes.iter_mut().for_each(|shape| *shape = None);
    }
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_optimization_profile(
    context: *mut TrtExecutionContext,
) -> i32 {
    (*context).profile
}

pub unsafe extern "C" fn trt_execution_context_set_device_memory(
    context: *mut TrtExecutionContext,
    address: usize,
    size: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &mut *context;
    if address == 0 {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "device memory address is null");
    }
    if !ctx.user_managed {
        fail!(
            error_msg,
            error_msg_len,
            TRT_ERROR_INVALID_ARGUMENT,
            "setDeviceMemory is only valid for contexts created without device memory"
        );
    }
    if size < ctx.engine.device_memory {
        fail!(
            error_msg,
            error_msg_len,
            TRT_ERROR_INVALID_ARGUMENT,
            "device memory region of {size} bytes is smaller than the required {}",
            ctx.engine.device_memory
        );
    }
    ctx.device_memory = Some((address, size));
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_set_input_consumed_event(
    context: *mut TrtExecutionContext,
    event: usize,
    _error_msg: *mut c_char,
    _error_msg_len: usize,
) -> i32 {
    (*context).input_consumed_event = event;
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_input_consumed_event(
    context: *mut TrtExecutionContext,
) -> usize {
    (*context).input_consumed_event
}

pub unsafe extern "C" fn trt_execution_context_get_max_output_size(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    out_size: *mut usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &*context;
    let index = context_tensor!(ctx, name, "getMaxOutputSize", error_msg, error_msg_len);
    if ctx.engine.tensors[index].is_input() {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "tensor is not an output");
    }
    match ctx.max_output_bytes(index) {
        Some(size) => {
            *out_size = size;
            TRT_SUCCESS
        }
        None => fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "no output size bound"),
    }
}

pub unsafe extern "C" fn trt_execution_context_enqueue_v3(
    context: *mut TrtExecutionContext,
    stream: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let ctx = &*context;
    if let Some(reason) = ctx.enqueue_blocker() {
        let msg = format!("IExecutionContext::enqueueV3: {reason}");
        log_to(ctx.logger, TRT_SEVERITY_ERROR, &msg);
        fail!(error_msg, error_msg_len, TRT_ERROR_RUNTIME_ERROR, "{msg}");
    }
    if ctx.debug_sync {
        log_to(
            ctx.logger,
            TRT_SEVERITY_VERBOSE,
            &format!("enqueueV3 on stream {stream:#x} (debug sync)"),
        );
    }
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_set_debug_sync(context: *mut TrtExecutionContext, sync: bool) {
    (*context).debug_sync = sync;
}

pub unsafe extern "C" fn trt_execution_context_get_debug_sync(context: *mut TrtExecutionContext) -> bool {
    (*context).debug_sync
}

pub unsafe extern "C" fn trt_execution_context_set_name(
    context: *mut TrtExecutionContext,
    name: *const c_char,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let Some(name) = name_str(name) else {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "name is null");
    };
    (*context).name = name.to_owned();
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_name(context: *mut TrtExecutionContext) -> *const c_char {
    (*context).name.as_ptr()
}

pub unsafe extern "C" fn trt_execution_context_set_enqueue_emits_profile(
    context: *mut TrtExecutionContext,
    emits: bool,
) {
    (*context).emits_profile = emits;
}

pub unsafe extern "C" fn trt_execution_context_get_enqueue_emits_profile(
    context: *mut TrtExecutionContext,
) -> bool {
    (*context).emits_profile
}

pub unsafe extern "C" fn trt_execution_context_report_to_profiler(
    context: *mut TrtExecutionContext,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if (*context).emits_profile {
        fail!(
            error_msg,
            error_msg_len,
            TRT_ERROR_RUNTIME_ERROR,
            "reportToProfiler requires setEnqueueEmitsProfile(false)"
        );
    }
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_set_persistent_cache_limit(
    context: *mut TrtExecutionContext,
    limit: usize,
) {
    (*context).persistent_cache_limit = limit;
}

pub unsafe extern "C" fn trt_execution_context_get_persistent_cache_limit(
    context: *mut TrtExecutionContext,
) -> usize {
    (*context).persistent_cache_limit
}

pub unsafe extern "C" fn trt_execution_context_set_nvtx_verbosity(
    context: *mut TrtExecutionContext,
    verbosity: i32,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    if !(0..=2).contains(&verbosity) {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "invalid NVTX verbosity {verbosity}");
    }
    (*context).nvtx_verbosity = verbosity;
    TRT_SUCCESS
}

pub unsafe extern "C" fn trt_execution_context_get_nvtx_verbosity(context: *mut TrtExecutionContext) -> i32 {
    (*context).nvtx_verbosity
}

pub unsafe extern "C" fn trt_execution_context_set_aux_streams(
    context: *mut TrtExecutionContext,
    streams: *const usize,
    nb_streams: i32,
) {
    let streams = if streams.is_null() || nb_streams <= 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(streams, nb_streams as usize)
    };
    (*context).aux_streams = streams.to_vec();
}

// Plugin registry

static NEXT_PLUGIN_HANDLE: AtomicUsize = AtomicUsize::new(0x1000);
static PLUGIN_LIBRARIES: Mutex<Vec<usize>> = Mutex::new(Vec::new());

pub unsafe extern "C" fn trt_plugin_load_library(
    path: *const c_char,
    out_handle: *mut usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let Some(path) = name_str(path) else {
        fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "path is null");
    };
    let path = path.to_string_lossy();
    if out_handle.is_null() || resolve_library(Path::new(path.as_ref())).is_none() {
        fail!(error_msg, error_msg_len, TRT_ERROR_RUNTIME_ERROR, "failed to load plugin library {path}");
    }
    let handle = NEXT_PLUGIN_HANDLE.fetch_add(0x10, Ordering::Relaxed);
    match PLUGIN_LIBRARIES.lock() {
        Ok(mut libraries) => libraries.push(handle),
        Err(_) => fail!(error_msg, error_msg_len, TRT_ERROR_UNKNOWN, "plugin registry poisoned"),
    }
    *out_handle = handle;
    TRT_SUCCESS
}

/// Resolves a library the way the dynamic loader does: a path with a
/// directory component is used as is, a bare name is searched for in
/// `LD_LIBRARY_PATH` and then the system library directories.
fn resolve_library(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let arch_dir = format!("{}-linux-gnu", std::env::consts::ARCH);
    let mut dirs: Vec<PathBuf> = std::env::var_os("LD_LIBRARY_PATH")
        .map(|value| std::env::split_paths(&value).collect())
        .unwrap_or_default();
    for base in ["/lib", "/lib64", "/usr/lib", "/usr/lib64", "/usr/local/lib"] {
        dirs.push(PathBuf::from(base));
        dirs.push(Path::new(base).join(&arch_dir));
    }
    dirs.into_iter()
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
}

pub unsafe extern "C" fn trt_plugin_deregister_library(
    handle: usize,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> i32 {
    let Ok(mut libraries) = PLUGIN_LIBRARIES.lock() else {
        fail!(error_msg, error_msg_len, TRT_ERROR_UNKNOWN, "plugin registry poisoned");
    };
    match libraries.iter().position(|&h| h == handle) {
        Some(pos) => {
            libraries.swap_remove(pos);
            TRT_SUCCESS
        }
        None => fail!(error_msg, error_msg_len, TRT_ERROR_INVALID_ARGUMENT, "unknown plugin handle {handle:#x}"),
    }
}
