//! Loading of plugin libraries into the native plugin registry

use crate::error::{error_buffer, Error, Result};
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use trtrun_sys::*;

/// Opaque handle of a loaded plugin library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(usize);

impl PluginHandle {
    /// Wrap a raw handle value
    pub const fn from_raw(raw: usize) -> Self {
        PluginHandle(raw)
    }

    /// Raw handle value
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// A library loaded through a [`PluginRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLibrary {
    handle: PluginHandle,
    path: PathBuf,
}

impl PluginLibrary {
    /// Handle to pass to [`PluginRegistry::unload_library`]
    pub fn handle(&self) -> PluginHandle {
        self.handle
    }

    /// Path or library name the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    Ok(CString::new(path.as_os_str().as_bytes())?)
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString> {
    let path = path
        .to_str()
        .ok_or_else(|| Error::InvalidArgument("path is not valid UTF-8".to_string()))?;
    Ok(CString::new(path)?)
}

/// Tracks the plugin libraries this process loaded
///
/// Only handles returned by [`load_library`](Self::load_library) on the same
/// registry can be unloaded through it.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    loaded: Mutex<Vec<PluginLibrary>>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a shared library and register the plugin creators it exports
    ///
    /// `path` is handed to the native loader unchanged, so a bare library
    /// name is resolved through the dynamic loader's search path.
    pub fn load_library(&self, path: impl AsRef<Path>) -> Result<PluginLibrary> {
        let path = path.as_ref();
        let load_error = |reason: String| Error::PluginLoad {
            path: path.display().to_string(),
            reason,
        };

        let path_cstr = path_to_cstring(path).map_err(|e| load_error(e.to_string()))?;

        let mut handle: usize = 0;
        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_plugin_load_library(
                path_cstr.as_ptr(),
                &mut handle,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRT_SUCCESS || handle == 0 {
            let err = Error::from_ffi(result, &error_msg);
            return Err(load_error(err.ffi_message()));
        }

        let library = PluginLibrary {
            handle: PluginHandle(handle),
            path: path.to_path_buf(),
        };
        tracing::debug!(path = %path.display(), handle = handle, "loaded plugin library");
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(library.clone());
        Ok(library)
    }

    /// Deregister a library loaded by this registry
    ///
    /// Unknown handles are rejected without reaching the native registry.
    pub fn unload_library(&self, handle: PluginHandle) -> Result<()> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = loaded.iter().position(|lib| lib.handle == handle) else {
            tracing::warn!(handle = handle.0, "unload of unknown plugin handle");
            return Err(Error::UnknownPluginHandle(handle.0));
        };

        let mut error_msg = error_buffer();
        let result = unsafe {
            trt_plugin_deregister_library(handle.0, error_msg.as_mut_ptr(), error_msg.len())
        };

        if result != TRT_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        let library = loaded.swap_remove(position);
        tracing::debug!(path = %library.path.display(), "unloaded plugin library");
        Ok(())
    }

    /// Libraries currently loaded through this registry
    pub fn loaded(&self) -> Vec<PluginLibrary> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
