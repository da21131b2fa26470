//! Kernel heap (C4, spec §4.3): a segregated-fit doubly linked free list.
//!
//! Segments are prefixed by a header carrying the four fields the spec
//! names -- `{size, prev, next, free}` -- 25 meaningful bytes that the
//! compiler pads to a 32-byte, 16-byte-aligned record so every payload that
//! follows a header is correctly aligned for ordinary kernel allocations.
//! `alloc` scans first-fit, splits the remainder when it is large enough to
//! host another header plus a minimum payload, and falls back to `grow`
//! (which maps fresh pages through the C3 paging engine) when no free
//! segment fits. `free` only flips the header's `free` flag; adjacent-free
//! coalescing is the optional extension the spec allows implementations to
//! defer, and this one does.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::errno::{Errno, KernelResult};
use crate::mm::{frame_allocator, page_table, PageFlags, VirtAddr, FRAME_SIZE};
use crate::sync::SpinMutex;

/// All split sizes and the header itself are rounded to this granularity so
/// every payload address is correctly aligned for common kernel types.
const ALIGN: u64 = 16;

/// Heap virtual range: a fixed window above the canonical kernel base,
/// distinct from the HHDM and from per-process mappings.
const HEAP_BASE: u64 = 0xFFFF_9000_0000_0000;
const HEAP_INITIAL_PAGES: u64 = 64; // 256 KiB bootstrap region

#[repr(C)]
struct Header {
    size: u64,
    prev: u64,
    next: u64,
    free: u64,
}

const HEADER_SIZE: u64 = core::mem::size_of::<Header>() as u64;

fn header_at(addr: u64) -> &'static mut Header {
    // SAFETY: every address passed in is either a list node produced by this
    // module's own bookkeeping or the address just preceding a pointer this
    // module itself handed out via `alloc`.
    unsafe { &mut *(addr as *mut Header) }
}

struct HeapState {
    head: u64,
    tail: u64,
    end: u64,
}

impl HeapState {
    const fn new() -> Self {
        Self {
            head: 0,
            tail: 0,
            end: 0,
        }
    }

    fn push_segment(&mut self, addr: u64, size: u64) {
        let h = header_at(addr);
        h.size = size;
        h.prev = self.tail;
        h.next = 0;
        h.free = 1;
        if self.tail != 0 {
            header_at(self.tail).next = addr;
        } else {
            self.head = addr;
        }
        self.tail = addr;
    }

    /// `grow(pages)`: map `pages` fresh 4 KiB pages at the end of the heap
    /// region and append one large free segment covering them.
    fn grow(&mut self, pages: u64) -> KernelResult<()> {
        let root = page_table::kernel_root();
        let virt_start = self.end;
        for i in 0..pages {
            let phys = frame_allocator::alloc_frame()?;
            page_table::map(
                phys,
                VirtAddr::new(virt_start + i * FRAME_SIZE),
                FRAME_SIZE,
                PageFlags::PRESENT | PageFlags::WRITABLE,
                root,
            )?;
        }
        self.end = virt_start + pages * FRAME_SIZE;
        self.push_segment(virt_start, pages * FRAME_SIZE - HEADER_SIZE);
        Ok(())
    }

    fn find_fit(&self, need: u64) -> Option<u64> {
        let mut addr = self.head;
        while addr != 0 {
            let h = header_at(addr);
            if h.free != 0 && h.size >= need {
                return Some(addr);
            }
            addr = h.next;
        }
        None
    }

    fn split_if_worthwhile(&mut self, addr: u64, need: u64) {
        let h = header_at(addr);
        let remainder = h.size - need;
        if remainder < HEADER_SIZE + ALIGN {
            return;
        }
        let new_addr = addr + HEADER_SIZE + need;
        let new_size = remainder - HEADER_SIZE;
        let old_next = h.next;
        h.size = need;
        h.next = new_addr;

        let new_h = header_at(new_addr);
        new_h.size = new_size;
        new_h.prev = addr;
        new_h.next = old_next;
        new_h.free = 1;
        if old_next != 0 {
            header_at(old_next).prev = new_addr;
        } else {
            self.tail = new_addr;
        }
    }

    fn alloc(&mut self, size: u64) -> KernelResult<u64> {
        let need = size.div_ceil(ALIGN) * ALIGN;
        let addr = match self.find_fit(need) {
            Some(a) => a,
            None => {
                let required = need + HEADER_SIZE;
                let grow_pages = required.div_ceil(FRAME_SIZE).max(1);
                self.grow(grow_pages)?;
                self.find_fit(need).ok_or(Errno::ENOMEM)?
            }
        };
        self.split_if_worthwhile(addr, need);
        header_at(addr).free = 0;
        Ok(addr + HEADER_SIZE)
    }

    fn free(&mut self, payload_addr: u64) {
        let addr = payload_addr - HEADER_SIZE;
        header_at(addr).free = 1;
    }
}

// SAFETY: the raw u64 "pointers" in `HeapState` address heap-owned memory
// reachable only through the spinlock-guarded API below.
unsafe impl Send for HeapState {}

static HEAP: SpinMutex<HeapState> = SpinMutex::new(HeapState::new());
static INITIALIZED: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    let mut state = HEAP.lock();
    state.end = HEAP_BASE;
    state
        .grow(HEAP_INITIAL_PAGES)
        .expect("failed to map initial kernel heap region");
    INITIALIZED.store(1, Ordering::Release);
}

pub fn alloc(size: usize) -> KernelResult<*mut u8> {
    let addr = HEAP.lock().alloc(size as u64)?;
    Ok(addr as *mut u8)
}

/// # Safety
/// `ptr` must have been returned by a prior call to [`alloc`] (or the
/// `GlobalAlloc` impl below) and not already freed.
pub unsafe fn free(ptr: *mut u8) {
    HEAP.lock().free(ptr as u64);
}

/// The kernel's `#[global_allocator]`, wired in `lib.rs`.
pub struct KernelHeap;

// SAFETY: `alloc`/`free` never return unmapped or partially-initialized
// memory, and every returned pointer is 16-byte aligned, which satisfies
// any `Layout` with `align <= 16`. Larger alignments are not currently
// requested by any type used in this kernel.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        debug_assert!(layout.align() <= ALIGN as usize);
        alloc(layout.size()).unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: forwarded from the `GlobalAlloc` contract: `ptr` was
        // returned by a prior `alloc` call from this same allocator.
        unsafe { free(ptr) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    // These tests exercise the free-list bookkeeping directly against a
    // plain heap-backed buffer rather than the mapped kernel heap, so they
    // can run on the host test target without a paging engine.
    fn with_backing(bytes: usize, f: impl FnOnce(&mut HeapState, u64)) {
        let mut backing: Vec<u8> = alloc::vec![0u8; bytes];
        let base = backing.as_mut_ptr() as u64;
        let mut state = HeapState::new();
        state.end = base;
        state.push_segment(base, bytes as u64 - HEADER_SIZE);
        f(&mut state, base);
    }

    #[test]
    fn alloc_and_free_within_one_segment() {
        with_backing(4096, |state, _base| {
            let need = 64u64;
            let a = state.alloc(need).unwrap();
            assert_eq!(a % ALIGN, 0);
            state.free(a);
        });
    }

    #[test]
    fn split_produces_two_segments() {
        with_backing(4096, |state, base| {
            let a = state.alloc(64).unwrap();
            assert_eq!(a, base + HEADER_SIZE);
            // There should be a second (free) segment after the split.
            let first = header_at(base);
            assert_ne!(first.next, 0);
        });
    }

    #[test]
    fn exhaustion_without_grow_fails() {
        with_backing(64, |state, _base| {
            // Entire backing buffer minus header is far smaller than this.
            assert!(state.alloc(1_000_000).is_err());
        });
    }
}
