use std::{ptr::NonNull, sync::Arc};

/// Memory source for skip list nodes.
///
/// Implementations never free individual allocations; memory handed out stays
/// valid until the allocator itself is dropped.
pub trait MemAllocator: Send + Sync {
    /// # Safety
    ///
    /// Callers must not allocate concurrently from the same allocator.
    unsafe fn allocate(&self, bytes: usize) -> NonNull<u8>;

    /// Like `allocate`, but the result is aligned to [`crate::arena::ALIGN`].
    ///
    /// # Safety
    ///
    /// Same contract as [`MemAllocator::allocate`].
    unsafe fn allocate_aligned(&self, bytes: usize) -> NonNull<u8>;

    fn mem_usage(&self) -> usize;
}

impl<A: MemAllocator + ?Sized> MemAllocator for &A {
    unsafe fn allocate(&self, bytes: usize) -> NonNull<u8> {
        unsafe { (**self).allocate(bytes) }
    }

    unsafe fn allocate_aligned(&self, bytes: usize) -> NonNull<u8> {
        unsafe { (**self).allocate_aligned(bytes) }
    }

    fn mem_usage(&self) -> usize {
        (**self).mem_usage()
    }
}

impl<A: MemAllocator + ?Sized> MemAllocator for Arc<A> {
    unsafe fn allocate(&self, bytes: usize) -> NonNull<u8> {
        unsafe { self.as_ref().allocate(bytes) }
    }

    unsafe fn allocate_aligned(&self, bytes: usize) -> NonNull<u8> {
        unsafe { self.as_ref().allocate_aligned(bytes) }
    }

    fn mem_usage(&self) -> usize {
        self.as_ref().mem_usage()
    }
}
