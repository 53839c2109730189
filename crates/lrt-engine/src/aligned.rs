//! Host allocations that satisfy the engine's buffer alignment.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::status::{EngineResult, Status};

/// Alignment the engine requires for host memory wrapped as a tensor buffer.
pub const BUFFER_ALIGNMENT: usize = 64;

/// Zero-initialised byte allocation aligned to [`BUFFER_ALIGNMENT`].
pub struct AlignedBytes {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// Plain owned bytes.
unsafe impl Send for AlignedBytes {}
unsafe impl Sync for AlignedBytes {}

impl AlignedBytes {
    pub fn new(len: usize) -> EngineResult<Self> {
        let layout = Layout::from_size_align(len.max(1), BUFFER_ALIGNMENT)
            .map_err(|_| Status::ErrorMemoryAllocationFailure)?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Status::ErrorMemoryAllocationFailure)?;
        Ok(AlignedBytes { ptr, len, layout })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Deref for AlignedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBytes {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for AlignedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBytes")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Whether `ptr` meets [`BUFFER_ALIGNMENT`].
pub fn is_aligned(ptr: *const u8) -> bool {
    (ptr as usize) % BUFFER_ALIGNMENT == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_and_zeroing() {
        let bytes = AlignedBytes::new(100).unwrap();
        assert!(is_aligned(bytes.as_ptr()));
        assert_eq!(bytes.len(), 100);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length() {
        let bytes = AlignedBytes::new(0).unwrap();
        assert!(bytes.is_empty());
        assert!(is_aligned(bytes.as_ptr()));
    }

    #[test]
    fn test_write_through_deref() {
        let mut bytes = AlignedBytes::new(8).unwrap();
        bytes[3] = 7;
        assert_eq!(&bytes[..4], &[0, 0, 0, 7]);
    }

    #[test]
    fn test_offset_pointer_is_misaligned() {
        let bytes = AlignedBytes::new(8).unwrap();
        assert!(!is_aligned(bytes[1..].as_ptr()));
    }
}
