use crate::array::ArrayError;
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Zero-initialised heap block with a fixed alignment.
///
/// Backs both instance structs and array storage; the address is handed to
/// native code, so the block never moves.
pub(crate) struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
}

impl AlignedBuffer {
    pub(crate) fn zeroed(len: usize, align: usize) -> Result<Self, ArrayError> {
        let align = align.max(1);
        let Some(layout) = Self::layout(len, align)? else {
            return Ok(Self { ptr: Self::dangling(align), len: 0, align });
        };
        /* SAFETY: layout has non-zero size */
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Ok(Self { ptr, len, align })
    }

    fn layout(len: usize, align: usize) -> Result<Option<Layout>, ArrayError> {
        if len == 0 {
            return Ok(None);
        }
        Layout::from_size_align(len, align).map(Some).map_err(|_| ArrayError::TooLarge { bytes: len })
    }

    fn dangling(align: usize) -> NonNull<u8> {
        NonNull::new(align as *mut u8).unwrap_or(NonNull::dangling())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        /* SAFETY: ptr is valid for len initialised bytes (or dangling with len 0) */
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        /* SAFETY: as above, and &mut self gives exclusive access */
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn try_clone(&self) -> Result<Self, ArrayError> {
        let mut copy = Self::zeroed(self.len, self.align)?;
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(copy)
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if let Ok(Some(layout)) = Self::layout(self.len, self.align) {
            /* SAFETY: ptr was allocated with this layout */
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}
