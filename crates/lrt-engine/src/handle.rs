//! Typed opaque handles.
//!
//! A handle is an address-sized token owned by the engine. The wrappers in
//! this module only keep handles of different resource kinds apart; they
//! carry no lifecycle of their own.

use std::ffi::c_void;
use std::num::NonZeroUsize;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Wrap a raw token. Zero is the null handle and yields `None`.
            pub fn from_raw(raw: usize) -> Option<Self> {
                NonZeroUsize::new(raw).map($name)
            }

            pub fn as_raw(&self) -> usize {
                self.0.get()
            }

            pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
                Self::from_raw(ptr as usize)
            }

            pub fn as_ptr(&self) -> *mut c_void {
                self.0.get() as *mut c_void
            }
        }
    };
}

define_handle!(
    /// Engine runtime context.
    EnvironmentHandle
);
define_handle!(ModelHandle);
define_handle!(
    /// Compilation option aggregate.
    OptionsHandle
);
define_handle!(
    /// CPU, GPU or runtime option block.
    OpaqueHandle
);
define_handle!(CompiledHandle);
define_handle!(
    /// Buffer requirements owned by a compiled model.
    RequirementsHandle
);
define_handle!(BufferHandle);
define_handle!(EventHandle);
define_handle!(ProfilerHandle);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_is_rejected() {
        assert!(ModelHandle::from_raw(0).is_none());
        assert!(BufferHandle::from_ptr(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn test_pointer_roundtrip() {
        let h = EventHandle::from_raw(0x1000).unwrap();
        assert_eq!(h.as_raw(), 0x1000);
        assert_eq!(EventHandle::from_ptr(h.as_ptr()), Some(h));
    }
}
