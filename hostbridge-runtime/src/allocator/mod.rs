//! Memory allocator - zeroed raw blocks with a size prefix
//!
//! Design: Every block carries a 16-byte header in front of the pointer
//! handed out, holding the requested size. Freeing needs nothing but the
//! pointer, which is what the foreign `tp_free` contract requires.
//! Live block and byte counters feed the leak checks in tests.

mod header;

#[cfg(test)]
mod tests;

pub use header::BlockHeader;

use crate::logging::{log_allocation, log_deallocation};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Alignment of every block
pub const BLOCK_ALIGN: usize = 16;

static LIVE_BLOCKS: AtomicUsize = AtomicUsize::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

#[inline]
fn layout_for(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.checked_add(BlockHeader::SIZE)?, BLOCK_ALIGN).ok()
}

/// Allocate `size` zeroed bytes, null on failure
pub fn mem_alloc(size: usize) -> *mut u8 {
    let Some(layout) = layout_for(size) else {
        return std::ptr::null_mut();
    };

    unsafe {
        let base = alloc_zeroed(layout);
        if base.is_null() {
            return base;
        }
        (base as *mut BlockHeader).write(BlockHeader::new(size));
        let ptr = base.add(BlockHeader::SIZE);

        LIVE_BLOCKS.fetch_add(1, Ordering::Relaxed);
        LIVE_BYTES.fetch_add(size, Ordering::Relaxed);
        log_allocation(size, ptr);
        ptr
    }
}

/// Free a block returned by [`mem_alloc`]
///
/// # Safety
/// - `ptr` must come from `mem_alloc` and not have been freed
/// - Null is accepted and ignored
pub unsafe fn mem_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    let header = BlockHeader::from_block(ptr);
    let size = (*header).size();
    debug_assert!((*header).is_live(), "double free of runtime block");
    (*header).poison();

    if let Some(layout) = layout_for(size) {
        log_deallocation(ptr);
        LIVE_BLOCKS.fetch_sub(1, Ordering::Relaxed);
        LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
        dealloc(header as *mut u8, layout);
    }
}

/// Size originally requested for a block
///
/// # Safety
/// `ptr` must be a live block from [`mem_alloc`].
pub unsafe fn block_size(ptr: *const u8) -> usize {
    (*BlockHeader::from_block(ptr as *mut u8)).size()
}

/// Allocation statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    pub live_blocks: usize,
    pub live_bytes: usize,
}

pub fn stats() -> AllocStats {
    AllocStats {
        live_blocks: LIVE_BLOCKS.load(Ordering::Relaxed),
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
    }
}
