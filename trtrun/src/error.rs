//! Error types for TensorRT runtime operations

use crate::tensor::Dims;
use std::ffi::NulError;
use std::os::raw::c_char;
use thiserror::Error;

/// Size of the message buffer handed to every fallible FFI call
pub(crate) const ERROR_MSG_LEN: usize = 1024;

/// Zeroed message buffer for one FFI call
pub(crate) fn error_buffer() -> [c_char; ERROR_MSG_LEN] {
    [0; ERROR_MSG_LEN]
}

/// Result type for TensorRT runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when driving the TensorRT runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid argument provided to function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Out of memory
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Runtime error from TensorRT
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// CUDA error
    #[error("CUDA error: {0}")]
    Cuda(String),

    /// Unknown error
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// The runtime could not be created
    #[error("Runtime creation failed: {0}")]
    RuntimeCreation(String),

    /// The serialized engine was rejected
    #[error("Engine deserialization failed: {0}")]
    Deserialization(String),

    /// An execution context could not be allocated
    #[error("Execution context creation failed: {0}")]
    ContextCreation(String),

    /// Tensor name not present in the engine
    #[error("Unknown tensor: {0}")]
    UnknownTensor(String),

    /// Tensor used in the wrong direction
    #[error("Tensor {name} is not an {expected}")]
    WrongIoMode {
        name: String,
        expected: &'static str,
    },

    /// Input shape rejected
    #[error("Invalid shape {dims} for tensor {name}: {reason}")]
    Shape {
        name: String,
        dims: Dims,
        reason: String,
    },

    /// Tensor address rejected
    #[error("Invalid address {address:#x} for tensor {name}")]
    InvalidAddress { name: String, address: usize },

    /// Optimization profile index out of range
    #[error("Optimization profile {index} out of range (engine has {count})")]
    ProfileOutOfRange { index: i32, count: i32 },

    /// Device memory assigned to a context is too small
    #[error("Device memory of {size} bytes is smaller than the required {required}")]
    DeviceMemoryTooSmall { size: usize, required: usize },

    /// Enqueue on a context created without device memory before assigning it
    #[error("Context was created without device memory and none has been assigned")]
    DeviceMemoryRequired,

    /// Enqueue before every dynamic input shape is bound
    #[error("Not all input shapes are specified")]
    ShapesNotSpecified,

    /// Enqueue before a tensor address is bound
    #[error("Address of tensor {0} is not bound")]
    AddressNotBound(String),

    /// Enqueue rejected by the runtime
    #[error("Enqueue failed: {0}")]
    Enqueue(String),

    /// Plugin library could not be loaded
    #[error("Failed to load plugin library {path}: {reason}")]
    PluginLoad { path: String, reason: String },

    /// Plugin handle not loaded through this registry
    #[error("Unknown plugin library handle {0:#x}")]
    UnknownPluginHandle(usize),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// String conversion error
    #[error("String conversion error: {0}")]
    StringConversion(#[from] NulError),

    /// UTF-8 conversion error
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create error from FFI error code and message buffer
    pub(crate) fn from_ffi(code: i32, error_msg: &[c_char]) -> Self {
        let msg = Self::parse_error_msg(error_msg);

        match code {
            trtrun_sys::TRT_ERROR_INVALID_ARGUMENT => Error::InvalidArgument(msg),
            trtrun_sys::TRT_ERROR_OUT_OF_MEMORY => Error::OutOfMemory(msg),
            trtrun_sys::TRT_ERROR_RUNTIME_ERROR => Error::Runtime(msg),
            trtrun_sys::TRT_ERROR_CUDA_ERROR => Error::Cuda(msg),
            _ => Error::Unknown(msg),
        }
    }

    /// Message carried by an FFI-level error, if any
    pub(crate) fn ffi_message(&self) -> String {
        match self {
            Error::InvalidArgument(msg)
            | Error::OutOfMemory(msg)
            | Error::Runtime(msg)
            | Error::Cuda(msg)
            | Error::Unknown(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Parse error message from C string buffer
    fn parse_error_msg(buffer: &[c_char]) -> String {
        // Find null terminator
        let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());

        // c_char is i8 or u8 depending on the target
        let bytes: Vec<u8> = buffer[..len].iter().map(|&c| c as u8).collect();

        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArgument("test".to_string());
        assert_eq!(err.to_string(), "Invalid argument: test");

        let err = Error::Shape {
            name: "images".to_string(),
            dims: Dims::new(vec![1, 3]),
            reason: "rank mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid shape 1x3 for tensor images: rank mismatch"
        );
    }

    #[test]
    fn test_parse_error_msg() {
        let msg = b"test error\0".map(|b| b as c_char);
        let parsed = Error::parse_error_msg(&msg);
        assert_eq!(parsed, "test error");

        let unterminated = b"abc".map(|b| b as c_char);
        assert_eq!(Error::parse_error_msg(&unterminated), "abc");
    }

    #[test]
    fn test_from_ffi() {
        let msg = b"test\0".map(|b| b as c_char);
        let err = Error::from_ffi(trtrun_sys::TRT_ERROR_INVALID_ARGUMENT, &msg);
        match err {
            Error::InvalidArgument(s) => assert_eq!(s, "test"),
            _ => panic!("Wrong error type"),
        }

        let err = Error::from_ffi(trtrun_sys::TRT_ERROR_RUNTIME_ERROR, &msg);
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(err.ffi_message(), "test");

        let err = Error::from_ffi(12345, &msg);
        assert!(matches!(err, Error::Unknown(_)));
    }
}
