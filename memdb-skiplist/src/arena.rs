use std::{
    alloc::{self, Layout},
    cell::UnsafeCell,
    mem,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering::*},
};

use crate::mem_allocator::MemAllocator;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Alignment of every `allocate_aligned` result, and of every block start.
pub const ALIGN: usize = if mem::size_of::<*const u8>() > 8 {
    mem::size_of::<*const u8>()
} else {
    8
};

const _: () = assert!(ALIGN.is_power_of_two(), "pointer size should be a power of 2");

// bookkeeping charged per block on top of its bytes
const BLOCK_OVERHEAD: usize = mem::size_of::<*mut u8>();

struct ArenaInner {
    blocks: Vec<(NonNull<u8>, Layout)>,
    ptr: NonNull<u8>,
    remaining_size: usize,
    block_size: usize,
}

impl ArenaInner {
    fn alloc(&mut self, bytes: usize, usage: &AtomicUsize) -> NonNull<u8> {
        assert!(bytes > 0, "zero-sized arena allocation");
        if bytes <= self.remaining_size {
            return self.bump(bytes);
        }
        self.alloc_fallback(bytes, usage)
    }

    fn alloc_aligned(&mut self, bytes: usize, usage: &AtomicUsize) -> NonNull<u8> {
        assert!(bytes > 0, "zero-sized arena allocation");

        let current_mod = self.ptr.as_ptr().addr() & (ALIGN - 1);
        let slop = if current_mod == 0 { 0 } else { ALIGN - current_mod };
        let need = slop + bytes;

        let result = if need <= self.remaining_size {
            let aligned = unsafe { self.ptr.add(slop) };
            self.ptr = unsafe { aligned.add(bytes) };
            self.remaining_size -= need;
            aligned
        } else {
            // block starts are ALIGN-aligned
            self.alloc_fallback(bytes, usage)
        };

        debug_assert_eq!(result.as_ptr().addr() & (ALIGN - 1), 0);
        result
    }

    fn bump(&mut self, bytes: usize) -> NonNull<u8> {
        let result = self.ptr;
        self.ptr = unsafe { result.add(bytes) };
        self.remaining_size -= bytes;
        result
    }

    fn alloc_fallback(&mut self, bytes: usize, usage: &AtomicUsize) -> NonNull<u8> {
        if bytes > self.block_size / 4 {
            // Large objects get their own block so the current one keeps serving small ones.
            tracing::trace!(bytes, "arena: dedicated block");
            return self.alloc_new_block(bytes, usage);
        }

        tracing::trace!(block_size = self.block_size, "arena: new block");
        self.ptr = self.alloc_new_block(self.block_size, usage);
        self.remaining_size = self.block_size;
        self.bump(bytes)
    }

    fn alloc_new_block(&mut self, block_bytes: usize, usage: &AtomicUsize) -> NonNull<u8> {
        let layout = Layout::from_size_align(block_bytes, ALIGN)
            .unwrap_or_else(|_| panic!("Layout error, size: {block_bytes}, align: {ALIGN}"));
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));

        self.blocks.push((ptr, layout));
        usage.fetch_add(block_bytes + BLOCK_OVERHEAD, Relaxed);
        ptr
    }
}

/// Bump allocator backing skip list nodes.
///
/// Memory is handed out from blocks that live until the arena is dropped;
/// nothing is ever freed individually, so pointers returned by the arena stay
/// valid for its whole lifetime.
///
/// Allocation is single-writer: `allocate` and `allocate_aligned` must never
/// run concurrently on the same arena. `memory_usage` may be read from any
/// thread at any time.
pub struct Arena {
    inner: UnsafeCell<ArenaInner>,
    memory_usage: AtomicUsize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        assert!(block_size > 0, "arena block size must be greater than 0");
        Self {
            inner: UnsafeCell::new(ArenaInner {
                blocks: Vec::new(),
                ptr: NonNull::dangling(),
                remaining_size: 0,
                block_size,
            }),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Returns `bytes` of memory with no alignment guarantee.
    ///
    /// # Safety
    ///
    /// No other call to `allocate` or `allocate_aligned` may be running on
    /// this arena at the same time.
    pub unsafe fn allocate(&self, bytes: usize) -> NonNull<u8> {
        unsafe { (*self.inner.get()).alloc(bytes, &self.memory_usage) }
    }

    /// Returns `bytes` of memory aligned to [`ALIGN`].
    ///
    /// # Safety
    ///
    /// Same single-writer contract as [`Arena::allocate`].
    pub unsafe fn allocate_aligned(&self, bytes: usize) -> NonNull<u8> {
        unsafe { (*self.inner.get()).alloc_aligned(bytes, &self.memory_usage) }
    }

    /// Total bytes claimed from the system, including per-block overhead.
    /// May lag behind a concurrent allocation.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Relaxed)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for (ptr, layout) in self.inner.get_mut().blocks.drain(..) {
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

impl MemAllocator for Arena {
    unsafe fn allocate(&self, bytes: usize) -> NonNull<u8> {
        unsafe { Arena::allocate(self, bytes) }
    }

    unsafe fn allocate_aligned(&self, bytes: usize) -> NonNull<u8> {
        unsafe { Arena::allocate_aligned(self, bytes) }
    }

    fn mem_usage(&self) -> usize {
        self.memory_usage()
    }
}
