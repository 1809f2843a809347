//! Opaque CUDA handles passed through to the runtime
//!
//! Device memory, streams and events are owned by the caller's CUDA layer.
//! These wrappers only carry the raw values across the FFI boundary and are
//! never dereferenced on the host.

use std::fmt;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Wrap a raw value obtained from the CUDA runtime
            pub const fn from_raw(raw: usize) -> Self {
                $name(raw)
            }

            /// The null handle
            pub const fn null() -> Self {
                $name(0)
            }

            /// Raw value to hand back to the CUDA runtime
            pub const fn as_raw(self) -> usize {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

opaque_handle!(
    /// Address in device memory
    DevicePtr
);

opaque_handle!(
    /// `cudaStream_t` handle
    CudaStream
);

opaque_handle!(
    /// `cudaEvent_t` handle
    CudaEvent
);

impl DevicePtr {
    /// Pointer `bytes` past this one
    pub fn offset(self, bytes: usize) -> Self {
        DevicePtr(self.0.wrapping_add(bytes))
    }
}

impl<T> From<*mut T> for DevicePtr {
    fn from(ptr: *mut T) -> Self {
        DevicePtr(ptr as usize)
    }
}

impl<T> From<*const T> for DevicePtr {
    fn from(ptr: *const T) -> Self {
        DevicePtr(ptr as usize)
    }
}

impl CudaStream {
    /// The legacy default stream
    pub const DEFAULT: CudaStream = CudaStream(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_transparent() {
        assert_eq!(std::mem::size_of::<DevicePtr>(), std::mem::size_of::<usize>());
        assert_eq!(DevicePtr::from_raw(0x1000).as_raw(), 0x1000);
        assert!(CudaEvent::null().is_null());
        assert!(CudaStream::DEFAULT.is_null());
    }

    #[test]
    fn test_offset_and_debug() {
        let base = DevicePtr::from_raw(0x1000);
        assert_eq!(base.offset(0x20), DevicePtr::from_raw(0x1020));
        assert_eq!(format!("{:?}", base), "DevicePtr(0x1000)");
    }
}
