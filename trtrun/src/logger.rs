//! Logger interface for the TensorRT runtime
//!
//! Every message, whether raised by the native runtime or by the caller,
//! goes through the same [`Logger`]: it is compared against the logger's
//! minimum severity and then handed to a [`LogHandler`]. The default handler
//! forwards to `tracing` under the `trtrun::native` target.

use crate::error::{Error, Result};
use std::ffi::{c_void, CStr};
use std::fmt;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use trtrun_sys::*;

/// Severity level for log messages, most severe first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Severity {
    /// Internal error (most severe)
    #[serde(alias = "internal")]
    InternalError = TRT_SEVERITY_INTERNAL_ERROR,
    /// Error
    Error = TRT_SEVERITY_ERROR,
    /// Warning
    #[serde(alias = "warn")]
    Warning = TRT_SEVERITY_WARNING,
    /// Info
    Info = TRT_SEVERITY_INFO,
    /// Verbose (most detailed)
    Verbose = TRT_SEVERITY_VERBOSE,
}

impl Severity {
    fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            TRT_SEVERITY_INTERNAL_ERROR => Some(Severity::InternalError),
            TRT_SEVERITY_ERROR => Some(Severity::Error),
            TRT_SEVERITY_WARNING => Some(Severity::Warning),
            TRT_SEVERITY_INFO => Some(Severity::Info),
            TRT_SEVERITY_VERBOSE => Some(Severity::Verbose),
            _ => None,
        }
    }

    /// Lowercase name, as accepted by [`FromStr`] and serde
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::InternalError => "internal_error",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Verbose => "verbose",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal_error" | "internal" => Ok(Severity::InternalError),
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            "verbose" | "debug" | "trace" => Ok(Severity::Verbose),
            other => Err(Error::InvalidArgument(format!(
                "unknown log severity: {other}"
            ))),
        }
    }
}

/// Trait for handling log messages that pass the severity threshold
pub trait LogHandler: Send + Sync {
    /// Called for every message at or above the logger's minimum severity
    fn log(&self, severity: Severity, message: &str);
}

/// Handler that emits `tracing` events under the `trtrun::native` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHandler;

impl LogHandler for TracingHandler {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::InternalError => {
                tracing::error!(target: "trtrun::native", internal = true, "{message}")
            }
            Severity::Error => tracing::error!(target: "trtrun::native", "{message}"),
            Severity::Warning => tracing::warn!(target: "trtrun::native", "{message}"),
            Severity::Info => tracing::info!(target: "trtrun::native", "{message}"),
            Severity::Verbose => tracing::debug!(target: "trtrun::native", "{message}"),
        }
    }
}

/// Handler that prints to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrHandler;

impl LogHandler for StderrHandler {
    fn log(&self, severity: Severity, message: &str) {
        eprintln!("[TensorRT {}] {}", severity, message);
    }
}

/// State reachable from the native callback
struct Shared {
    handler: Box<dyn LogHandler>,
    min_severity: AtomicI32,
}

impl Shared {
    fn dispatch(&self, severity: Severity, message: &str) {
        if severity as i32 > self.min_severity.load(Ordering::Relaxed) {
            return;
        }
        // A panicking handler must not unwind into the caller or across FFI
        let _ = panic::catch_unwind(AssertUnwindSafe(|| self.handler.log(severity, message)));
    }
}

struct Inner {
    native: *mut TrtLogger,
    // Boxed so the address handed to the native logger stays put
    shared: Box<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.native.is_null() {
            unsafe {
                trt_logger_destroy(self.native);
            }
        }
    }
}

/// Logger shared by a runtime and the engines it produces
///
/// Cloning is cheap and every clone shares the same threshold and handler.
/// Runtimes and engines keep a clone, so the native logger lives as long as
/// anything that may call into it.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl Logger {
    /// Default minimum severity of a new logger
    pub const DEFAULT_MIN_SEVERITY: Severity = Severity::Warning;

    /// Create a new logger with a custom handler
    pub fn new<H: LogHandler + 'static>(handler: H) -> Result<Self> {
        let shared = Box::new(Shared {
            handler: Box::new(handler),
            min_severity: AtomicI32::new(Self::DEFAULT_MIN_SEVERITY as i32),
        });
        let user_data = &*shared as *const Shared as *mut c_void;

        let mut logger_ptr: *mut TrtLogger = std::ptr::null_mut();
        let mut error_msg = crate::error::error_buffer();

        let result = unsafe {
            trt_logger_create(
                Some(log_callback),
                user_data,
                &mut logger_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(Logger {
            inner: Arc::new(Inner {
                native: logger_ptr,
                shared,
            }),
        })
    }

    /// Create a logger that forwards to `tracing`
    pub fn tracing() -> Result<Self> {
        Self::new(TracingHandler)
    }

    /// Create a logger that prints to stderr
    pub fn stderr() -> Result<Self> {
        Self::new(StderrHandler)
    }

    /// Suppress messages less severe than `severity` from now on
    pub fn set_min_severity(&self, severity: Severity) {
        self.inner
            .shared
            .min_severity
            .store(severity as i32, Ordering::Relaxed);
    }

    /// Current threshold, shared by every clone
    pub fn min_severity(&self) -> Severity {
        Severity::from_raw(self.inner.shared.min_severity.load(Ordering::Relaxed))
            .unwrap_or(Self::DEFAULT_MIN_SEVERITY)
    }

    /// Log a message through the threshold and handler
    pub fn log(&self, severity: Severity, message: &str) {
        self.inner.shared.dispatch(severity, message);
    }

    /// Log at [`Severity::Error`]
    pub fn error(&self, message: &str) {
        self.log(Severity::Error, message);
    }

    /// Log at [`Severity::Warning`]
    pub fn warning(&self, message: &str) {
        self.log(Severity::Warning, message);
    }

    /// Log at [`Severity::Info`]
    pub fn info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    /// Log at [`Severity::Verbose`]
    pub fn verbose(&self, message: &str) {
        self.log(Severity::Verbose, message);
    }

    /// Get the raw pointer (for internal use)
    pub(crate) fn as_ptr(&self) -> *mut TrtLogger {
        self.inner.native
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_severity", &self.min_severity())
            .finish_non_exhaustive()
    }
}

// The native logger only reads immutable state and the atomic threshold
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

/// C callback that bridges native messages to the shared state
unsafe extern "C" fn log_callback(user_data: *mut c_void, severity: i32, msg: *const c_char) {
    if user_data.is_null() || msg.is_null() {
        return;
    }

    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let shared = &*(user_data as *const Shared);
        let severity = Severity::from_raw(severity).unwrap_or(Severity::Verbose);
        let msg = CStr::from_ptr(msg).to_string_lossy();
        shared.dispatch(severity, &msg);
    }));
}
