//! Runtime for deserializing TensorRT engines

use crate::config::RuntimeConfig;
use crate::engine::CudaEngine;
use crate::error::{error_buffer, Error, Result};
use crate::logger::Logger;
use std::path::Path;
use trtrun_sys::*;

/// Runtime for deserializing engines
///
/// A runtime is only a factory: engines it produces stay valid after it is
/// dropped.
pub struct Runtime {
    inner: *mut TrtRuntime,
    logger: Logger,
}

impl Runtime {
    /// Create a new runtime reporting through `logger`
    pub fn new(logger: &Logger) -> Result<Self> {
        let mut runtime_ptr: *mut TrtRuntime = std::ptr::null_mut();
        let mut error_msg = error_buffer();

        let result = unsafe {
            trt_runtime_create(
                logger.as_ptr(),
                &mut runtime_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS || runtime_ptr.is_null() {
            let err = Error::from_ffi(result, &error_msg);
            return Err(Error::RuntimeCreation(err.ffi_message()));
        }

        tracing::debug!(mock = IS_MOCK, "created runtime");
        Ok(Runtime {
            inner: runtime_ptr,
            logger: logger.clone(),
        })
    }

    /// Create a runtime and apply `config` before any engine is loaded
    pub fn with_config(logger: &Logger, config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        if let Some(severity) = config.min_severity {
            logger.set_min_severity(severity);
        }

        let mut runtime = Self::new(logger)?;
        runtime.set_max_threads(config.max_threads)?;
        runtime.set_engine_host_code_allowed(config.engine_host_code_allowed);
        Ok(runtime)
    }

    /// Deserialize a CUDA engine from serialized data
    ///
    /// The bytes are handed to the native runtime as is; a blob it rejects
    /// yields [`Error::Deserialization`] and leaves the runtime usable.
    pub fn deserialize_cuda_engine(&self, data: &[u8]) -> Result<CudaEngine> {
        if data.is_empty() {
            return Err(Error::Deserialization("engine buffer is empty".to_string()));
        }

        let mut engine_ptr: *mut TrtCudaEngine = std::ptr::null_mut();
        let mut error_msg = error_buffer();

        let result = unsafe {
            trt_runtime_deserialize_cuda_engine(
                self.inner,
                data.as_ptr() as *const std::ffi::c_void,
                data.len(),
                &mut engine_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS || engine_ptr.is_null() {
            let err = Error::from_ffi(result, &error_msg);
            tracing::warn!(size = data.len(), error = %err, "engine deserialization rejected");
            return Err(Error::Deserialization(err.ffi_message()));
        }

        // SAFETY: the pointer was just produced by the runtime and is owned by nobody else
        unsafe { CudaEngine::from_raw(engine_ptr, self.logger.clone()) }
    }

    /// Read a serialized engine from `path` and deserialize it
    ///
    /// A file that cannot be read is [`Error::Io`]; its contents are then
    /// treated as in [`deserialize_cuda_engine`](Self::deserialize_cuda_engine).
    pub fn deserialize_cuda_engine_from_file(&self, path: impl AsRef<Path>) -> Result<CudaEngine> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        tracing::debug!(path = %path.display(), size = data.len(), "read engine file");
        self.deserialize_cuda_engine(&data)
    }

    /// Limit the threads the runtime may use
    pub fn set_max_threads(&mut self, max_threads: i32) -> Result<()> {
        if max_threads < 1 {
            return Err(Error::InvalidArgument(format!(
                "max_threads must be at least 1, got {max_threads}"
            )));
        }

        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_runtime_set_max_threads(
                self.inner,
                max_threads,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            let err = Error::from_ffi(result, &error_msg);
            return Err(Error::InvalidArgument(err.ffi_message()));
        }
        Ok(())
    }

    /// Current thread limit
    pub fn max_threads(&self) -> i32 {
        unsafe { trt_runtime_get_max_threads(self.inner) }
    }

    /// Allow engines with embedded host code; affects engines deserialized afterwards
    pub fn set_engine_host_code_allowed(&mut self, allowed: bool) {
        unsafe { trt_runtime_set_engine_host_code_allowed(self.inner, allowed) }
    }

    /// Whether engines with embedded host code are accepted
    pub fn engine_host_code_allowed(&self) -> bool {
        unsafe { trt_runtime_get_engine_host_code_allowed(self.inner) }
    }

    /// Logger this runtime reports through
    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trt_runtime_destroy(self.inner);
            }
            tracing::debug!("destroyed runtime");
        }
    }
}

unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

#[cfg(all(test, trtrun_mock))]
mod tests {
    use super::*;
    use crate::logger::{LogHandler, Severity};
    use std::sync::{Arc, Mutex};
    use trtrun_sys::mock::MockEngine;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<(Severity, String)>>>);

    impl LogHandler for Collect {
        fn log(&self, severity: Severity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_string()));
        }
    }

    fn blob() -> Vec<u8> {
        MockEngine::new("tiny")
            .input("x", "float", &[1, 4])
            .output("y", "float", "1x4")
            .build()
    }

    #[test]
    fn test_deserialize() {
        let logger = Logger::tracing().unwrap();
        let runtime = Runtime::new(&logger).unwrap();
        let engine = runtime.deserialize_cuda_engine(&blob()).unwrap();
        assert_eq!(engine.num_io_tensors(), 2);
    }

    #[test]
    fn test_deserialize_from_file() {
        let logger = Logger::tracing().unwrap();
        let runtime = Runtime::new(&logger).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("tiny.engine");
        std::fs::write(&path, blob()).unwrap();
        let engine = runtime.deserialize_cuda_engine_from_file(&path).unwrap();
        assert_eq!(engine.io_tensor_names(), ["x", "y"]);

        assert!(matches!(
            runtime.deserialize_cuda_engine_from_file(dir.path().join("missing.engine")),
            Err(Error::Io(_))
        ));

        let junk = dir.path().join("junk.engine");
        std::fs::write(&junk, b"not an engine").unwrap();
        assert!(matches!(
            runtime.deserialize_cuda_engine_from_file(&junk),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let logger = Logger::tracing().unwrap();
        let runtime = Runtime::new(&logger).unwrap();
        assert!(matches!(
            runtime.deserialize_cuda_engine(&[]),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_garbage_rejected_and_logged() {
        let handler = Collect::default();
        let logger = Logger::new(handler.clone()).unwrap();
        let runtime = Runtime::new(&logger).unwrap();

        let err = runtime.deserialize_cuda_engine(b"not an engine").unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));

        let messages = handler.0.lock().unwrap();
        assert!(messages
            .iter()
            .any(|(severity, msg)| *severity == Severity::Error && msg.contains("deserializeCudaEngine")));

        // the runtime stays usable
        drop(messages);
        assert!(runtime.deserialize_cuda_engine(&blob()).is_ok());
    }

    #[test]
    fn test_max_threads() {
        let logger = Logger::tracing().unwrap();
        let mut runtime = Runtime::new(&logger).unwrap();
        assert_eq!(runtime.max_threads(), 1);
        runtime.set_max_threads(4).unwrap();
        assert_eq!(runtime.max_threads(), 4);
        assert!(matches!(
            runtime.set_max_threads(0),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(runtime.max_threads(), 4);
    }

    #[test]
    fn test_host_code_knob_applies_to_later_engines() {
        let logger = Logger::tracing().unwrap();
        let mut runtime = Runtime::new(&logger).unwrap();
        let blob = MockEngine::new("hosted")
            .host_code(true)
            .input("x", "float", &[1])
            .output("y", "float", "1")
            .build();

        assert!(!runtime.engine_host_code_allowed());
        assert!(runtime.deserialize_cuda_engine(&blob).is_err());

        runtime.set_engine_host_code_allowed(true);
        assert!(runtime.engine_host_code_allowed());
        assert!(runtime.deserialize_cuda_engine(&blob).is_ok());
    }

    #[test]
    fn test_with_config() {
        let logger = Logger::tracing().unwrap();
        let config = RuntimeConfig::new()
            .with_max_threads(2)
            .with_engine_host_code_allowed(true)
            .with_min_severity(Severity::Error);
        let runtime = Runtime::with_config(&logger, &config).unwrap();
        assert_eq!(runtime.max_threads(), 2);
        assert!(runtime.engine_host_code_allowed());
        assert_eq!(logger.min_severity(), Severity::Error);

        let bad = RuntimeConfig::new().with_max_threads(0);
        assert!(Runtime::with_config(&logger, &bad).is_err());
    }

    #[test]
    fn test_engine_outlives_runtime() {
        let logger = Logger::tracing().unwrap();
        let engine = {
            let runtime = Runtime::new(&logger).unwrap();
            runtime.deserialize_cuda_engine(&blob()).unwrap()
        };
        assert_eq!(engine.io_tensor_name(0).unwrap(), "x");
        assert!(engine.create_execution_context().is_ok());
    }
}
