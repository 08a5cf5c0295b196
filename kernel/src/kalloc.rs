// Physical memory allocator, for user processes, kernel stacks, page-table
// pages, and pipe buffers. Allocates whole 4096-byte pages.
//
// Per-hart free lists cut lock contention in the common case; kalloc()
// falls back to stealing from another hart's list only when its own is
// empty. A global reference-count table makes copy-on-write sharing
// possible: kfree() only actually frees a page once its count drops to
// zero.

use core::ptr;

use crate::memlayout::PHYSTOP;
use crate::param::NCPU;
use crate::proc::cpuid;
use crate::riscv::PGSIZE;
use crate::spinlock::{pop_off, push_off, Spinlock};
use crate::string::memset;
use crate::PGROUNDUP;

extern "C" {
    // first address after kernel.
    // defined by kernel.ld.
    static mut end: u8;
}

struct Run {
    next: *mut Run,
}

unsafe impl Send for Run {}

struct FreeList {
    lock: Spinlock,
    freelist: *mut Run,
}

// Physical frames are numbered from KERNBASE upward; the reference count
// table is sized for the full RAM window (PHYSTOP - KERNBASE) / PGSIZE
// frames, which comfortably covers the reference QEMU layout.
const NFRAMES: usize = 32768;

struct RefCnt {
    lock: Spinlock,
    a: [u32; NFRAMES],
}

pub struct KMem {
    kmem: [FreeList; NCPU],
    refcnt: RefCnt,
}

pub static mut KMEM: KMem = KMem::create();

impl KMem {
    const fn create() -> Self {
        const INIT: FreeList = FreeList {
            lock: Spinlock::init_lock("kmem"),
            freelist: ptr::null_mut(),
        };
        Self {
            kmem: [INIT; NCPU],
            refcnt: RefCnt {
                lock: Spinlock::init_lock("refcnt"),
                a: [0; NFRAMES],
            },
        }
    }

    pub fn kinit() {
        unsafe {
            KMEM.freerange((&mut end) as *mut u8, PHYSTOP as *mut u8);
        }
    }

    fn freerange<T: Sized>(self: &mut Self, pa_start: *mut T, pa_end: *mut T) {
        let mut p = PGROUNDUP!(pa_start);
        while p + PGSIZE <= pa_end as usize {
            self.kfree(p as *mut T);
            p += PGSIZE;
        }
    }

    fn frame_index(pa: usize) -> usize {
        (pa - crate::memlayout::KERNBASE) >> crate::riscv::PGSHIFT
    }

    /// Free the page of physical memory pointed at by pa, which normally
    /// should have been returned by a call to kalloc(). If the page's
    /// reference count is above one (shared COW page), just drop the
    /// count. (The exception is during kinit(), before refcounts exist.)
    pub fn kfree<T: Sized>(self: &mut Self, pa: *mut T) {
        let pa_usize = pa as usize;
        unsafe {
            if pa_usize % PGSIZE != 0
                || pa_usize < ((&end) as *const u8) as usize
                || pa_usize >= PHYSTOP
            {
                panic!("kfree");
            }
        }

        if pa_usize >= crate::memlayout::KERNBASE {
            let idx = Self::frame_index(pa_usize);
            self.refcnt.lock.acquire();
            if self.refcnt.a[idx] > 1 {
                self.refcnt.a[idx] -= 1;
                self.refcnt.lock.release();
                return;
            }
            self.refcnt.a[idx] = 0;
            self.refcnt.lock.release();
        }

        // Fill with junk to catch dangling refs.
        memset(pa as *mut u8, 1, PGSIZE);

        let r = pa as *mut Run;

        push_off();
        let id = cpuid();
        pop_off();

        let list = &mut self.kmem[id];
        list.lock.acquire();
        unsafe {
            (*r).next = list.freelist;
        }
        list.freelist = r;
        list.lock.release();
    }

    /// Allocate one 4096-byte page of physical memory. Returns a pointer
    /// that the kernel can use, or null if out of memory. The returned
    /// page starts with a reference count of 1.
    pub fn kalloc<T: Sized>(self: &mut Self) -> *mut T {
        push_off();
        let id = cpuid();
        pop_off();

        let mut r: *mut Run;
        {
            let list = &mut self.kmem[id];
            list.lock.acquire();
            r = list.freelist;
            if !r.is_null() {
                unsafe {
                    list.freelist = (*r).next;
                }
            }
            list.lock.release();
        }

        if r.is_null() {
            for i in 0..NCPU {
                if i == id {
                    continue;
                }
                let list = &mut self.kmem[i];
                list.lock.acquire();
                r = list.freelist;
                if !r.is_null() {
                    unsafe {
                        list.freelist = (*r).next;
                    }
                    list.lock.release();
                    break;
                }
                list.lock.release();
            }
        }

        if !r.is_null() {
            memset(r as *mut u8, 5, PGSIZE); // fill with junk
            self.kref(r as usize);
        }
        r as *mut T
    }

    /// Increment the reference count of the frame at physical address pa.
    pub fn kref(self: &mut Self, pa: usize) {
        if pa >= crate::memlayout::KERNBASE {
            let idx = Self::frame_index(pa);
            self.refcnt.lock.acquire();
            self.refcnt.a[idx] += 1;
            self.refcnt.lock.release();
        }
    }

    /// Current reference count of the frame at physical address pa.
    pub fn krefcnt(self: &mut Self, pa: usize) -> u32 {
        if pa < crate::memlayout::KERNBASE {
            return 1;
        }
        let idx = Self::frame_index(pa);
        self.refcnt.lock.acquire();
        let n = self.refcnt.a[idx];
        self.refcnt.lock.release();
        n
    }

    /// Total free memory in bytes, summed across every hart's free list.
    pub fn nfree(self: &mut Self) -> usize {
        let mut cnt = 0usize;
        for i in 0..NCPU {
            let list = &mut self.kmem[i];
            list.lock.acquire();
            let mut r = list.freelist;
            unsafe {
                while !r.is_null() {
                    cnt += 1;
                    r = (*r).next;
                }
            }
            list.lock.release();
        }
        cnt * PGSIZE
    }
}
