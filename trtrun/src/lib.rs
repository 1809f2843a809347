//! Safe Rust bindings to the NVIDIA TensorRT inference runtime
//!
//! This crate drives engines that were built and serialized ahead of time:
//! it deserializes them, inspects their IO tensors, and binds shapes and
//! device addresses on execution contexts before submitting work to a CUDA
//! stream. Building engines, parsing models and allocating device memory
//! are left to other tools.
//!
//! # Workflow
//!
//! 1. Create a [`Logger`] to capture TensorRT messages
//! 2. Create a [`Runtime`] and deserialize the engine with
//!    [`Runtime::deserialize_cuda_engine`]
//! 3. Create one [`ExecutionContext`] per concurrent submitter
//! 4. Set the shapes of dynamic inputs and bind every tensor address
//! 5. Submit with [`ExecutionContext::enqueue_v3`]
//!
//! # Example
//!
//! ```rust,no_run
//! use trtrun::{CudaStream, DevicePtr, Logger, Runtime};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = Logger::tracing()?;
//! let runtime = Runtime::new(&logger)?;
//!
//! let engine_data = std::fs::read("model.engine")?;
//! let engine = runtime.deserialize_cuda_engine(&engine_data)?;
//!
//! for name in engine.io_tensor_names() {
//!     println!("{}: {} {:?}", name, engine.tensor_shape(name)?, engine.tensor_io_mode(name)?);
//! }
//!
//! let mut context = engine.create_execution_context()?;
//! context.set_input_shape("images", &[1, 3, 224, 224])?;
//! # let (input, output) = (DevicePtr::from_raw(0x1000), DevicePtr::from_raw(0x2000));
//! context.set_tensor_address("images", input)?;
//! context.set_tensor_address("logits", output)?;
//!
//! // SAFETY: both buffers are live device allocations sized for the bound shapes
//! unsafe { context.enqueue_v3(CudaStream::DEFAULT)? };
//! # Ok(())
//! # }
//! ```
//!
//! # Safety
//!
//! Device pointers, streams and events are opaque values owned by the
//! caller's CUDA layer. Binding them is safe; [`ExecutionContext::enqueue_v3`]
//! is `unsafe` because that is where the runtime dereferences them.
//!
//! # Prerequisites
//!
//! - NVIDIA TensorRT 10 and the CUDA runtime
//! - Compatible NVIDIA GPU
//!
//! Set `TENSORRT_INCLUDE_PATH`/`TENSORRT_LIBRARY_PATH` (and the `CUDA_*`
//! equivalents) if they are not in a standard location. Without TensorRT,
//! or with the `mock` feature, the crate builds against a mock runtime; see
//! [`is_mock_backend`].

pub mod config;
pub mod context;
pub mod cuda;
pub mod engine;
pub mod error;
pub mod logger;
pub mod plugin;
pub mod runtime;
pub mod tensor;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use context::{ContextState, ExecutionContext, NvtxVerbosity};
pub use cuda::{CudaEvent, CudaStream, DevicePtr};
pub use engine::{CudaEngine, EngineCapability, HardwareCompatibilityLevel};
pub use error::{Error, Result};
pub use logger::{LogHandler, Logger, Severity, StderrHandler, TracingHandler};
pub use plugin::{PluginHandle, PluginLibrary, PluginRegistry};
pub use runtime::Runtime;
pub use tensor::{DataType, Dims, ProfileSelector, TensorDesc, TensorFormat, TensorIoMode};

/// Mock engine builder, available when built against the mock runtime
#[cfg(trtrun_mock)]
pub use trtrun_sys::mock::MockEngine;

/// True when linked against the mock runtime instead of TensorRT
pub fn is_mock_backend() -> bool {
    trtrun_sys::IS_MOCK
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_backend_flag_matches_cfg() {
        assert_eq!(super::is_mock_backend(), cfg!(trtrun_mock));
    }
}
