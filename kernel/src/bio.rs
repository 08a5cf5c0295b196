// Buffer cache.
//
// The buffer cache is split into BNUM hash buckets, each with its own
// lock and its own singly-linked list of buffers. Most bget() calls only
// ever touch one bucket's lock, so unrelated blocks on different buckets
// never contend with each other.
//
// Interface:
// * To get a buffer for a particular disk block, call bread.
// * After changing buffer data, call bwrite to write it to disk.
// * When done with the buffer, call brelse.
// * Do not use the buffer after calling brelse.
// * Only one process at a time can use a buffer,
//     so do not keep them longer than necessary.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::buf::Buf;
use crate::param::{BNUM, NBUF};
use crate::spinlock::Spinlock;
use crate::virtio::virtio_disk::virtio_disk_rw;

struct Bucket {
    lock: Spinlock,
    head: Option<NonNull<Buf>>,
}

struct BCache {
    buf: [Buf; NBUF],
    buckets: [Bucket; BNUM],
    // Serializes the search for an eviction victim across buckets so two
    // harts can never pick the same free buffer.
    evict_lock: Spinlock,
}

static CLOCK: AtomicU64 = AtomicU64::new(0);

static mut BCACHE: BCache = BCache {
    buf: [Buf::new(); NBUF],
    buckets: {
        const INIT: Bucket = Bucket {
            lock: Spinlock::init_lock("bcache.bucket"),
            head: None,
        };
        [INIT; BNUM]
    },
    evict_lock: Spinlock::init_lock("bcache.evict"),
};

fn bucket_of(blockno: u32) -> usize {
    (blockno as usize) % BNUM
}

pub fn binit() {
    unsafe {
        // Hand every buffer to a bucket round-robin so the initial free
        // pool is already spread out instead of piled on bucket 0.
        for (i, b) in BCACHE.buf.iter_mut().enumerate() {
            let bucket = &mut BCACHE.buckets[i % BNUM];
            b.next = bucket.head;
            bucket.head = NonNull::new(b as *mut Buf);
        }
    }
}

// Scan a single bucket's list for dev/blockno. Caller holds the bucket lock.
unsafe fn find_in_bucket(bucket: &Bucket, dev: u32, blockno: u32) -> Option<&'static mut Buf> {
    let mut p = bucket.head;
    while let Some(node) = p {
        let b = &mut *node.as_ptr();
        if b.dev == dev && b.blockno == blockno {
            return Some(b);
        }
        p = b.next;
    }
    None
}

// Look through buffer cache for block on device dev.
// If not found, allocate a buffer.
// In either case, return locked buffer.
fn bget(dev: u32, blockno: u32) -> &'static mut Buf {
    let id = bucket_of(blockno);

    unsafe {
        let bucket = &mut BCACHE.buckets[id];
        bucket.lock.acquire();
        if let Some(b) = find_in_bucket(bucket, dev, blockno) {
            b.refcnt += 1;
            bucket.lock.release();
            b.lock.acquire_sleep();
            return b;
        }
        bucket.lock.release();
    }

    // Miss. Serialize eviction so two harts never claim the same victim.
    unsafe {
        BCACHE.evict_lock.acquire();

        // Somebody else may have loaded this block while we waited.
        let bucket = &mut BCACHE.buckets[id];
        bucket.lock.acquire();
        if let Some(b) = find_in_bucket(bucket, dev, blockno) {
            b.refcnt += 1;
            bucket.lock.release();
            BCACHE.evict_lock.release();
            b.lock.acquire_sleep();
            return b;
        }
        bucket.lock.release();

        loop {
            let mut best: Option<(usize, NonNull<Buf>, u64)> = None;
            for i in 0..BNUM {
                let bucket = &mut BCACHE.buckets[i];
                bucket.lock.acquire();
                let mut p = bucket.head;
                while let Some(node) = p {
                    let b = &mut *node.as_ptr();
                    if b.refcnt == 0 {
                        if best.map_or(true, |(_, _, ts)| b.timestamp < ts) {
                            best = Some((i, node, b.timestamp));
                        }
                    }
                    p = b.next;
                }
                bucket.lock.release();
            }

            let (victim_bucket, victim, _) = match best {
                Some(v) => v,
                None => panic!("bget: no buffers"),
            };

            // Re-verify under the victim's own lock: someone may have
            // claimed it between the scan above and now.
            let vb = &mut BCACHE.buckets[victim_bucket];
            vb.lock.acquire();
            let b = &mut *victim.as_ptr();
            if b.refcnt != 0 {
                vb.lock.release();
                continue;
            }

            if victim_bucket != id {
                // Unlink from its current bucket.
                let mut p = vb.head;
                let mut prev: Option<NonNull<Buf>> = None;
                while let Some(node) = p {
                    if node == victim {
                        match prev {
                            Some(mut pn) => pn.as_mut().next = b.next,
                            None => vb.head = b.next,
                        }
                        break;
                    }
                    prev = p;
                    p = (*node.as_ptr()).next;
                }
                vb.lock.release();

                let tb = &mut BCACHE.buckets[id];
                tb.lock.acquire();
                b.next = tb.head;
                tb.head = Some(victim);
                b.dev = dev;
                b.blockno = blockno;
                b.valid = false;
                b.refcnt = 1;
                tb.lock.release();
            } else {
                b.dev = dev;
                b.blockno = blockno;
                b.valid = false;
                b.refcnt = 1;
                vb.lock.release();
            }

            BCACHE.evict_lock.release();
            b.lock.acquire_sleep();
            return b;
        }
    }
}

// Return a locked buf with the contents of the indicated block.
pub fn bread(dev: u32, blockno: u32) -> &'static mut Buf {
    let b = bget(dev, blockno);
    if !b.valid {
        unsafe { virtio_disk_rw(b, false) };
        b.valid = true
    }

    b
}

// Write b's contents to disk.  Must be locked.
pub fn bwrite(b: &mut Buf) {
    if !b.lock.holding_sleep() {
        panic!("bwrite");
    }
    unsafe {
        virtio_disk_rw(b, true);
    }
}

// Release a locked buffer. Stamps it with the current logical clock so
// eviction can tell how long it has sat idle.
pub fn brelse(b: &mut Buf) {
    if !b.lock.holding_sleep() {
        panic!("brelse");
    }

    b.lock.release_sleep();

    let id = bucket_of(b.blockno);
    unsafe {
        let bucket = &mut BCACHE.buckets[id];
        bucket.lock.acquire();
        b.refcnt -= 1;
        if b.refcnt == 0 {
            b.timestamp = CLOCK.fetch_add(1, Ordering::Relaxed);
        }
        bucket.lock.release();
    }
}

pub fn bpin(b: &mut Buf) {
    let id = bucket_of(b.blockno);
    unsafe {
        let bucket = &mut BCACHE.buckets[id];
        bucket.lock.acquire();
        b.refcnt += 1;
        bucket.lock.release();
    }
}

pub fn bunpin(b: *mut Buf) {
    unsafe {
        let b = b.as_mut().unwrap();
        let id = bucket_of(b.blockno);
        let bucket = &mut BCACHE.buckets[id];
        bucket.lock.acquire();
        b.refcnt -= 1;
        bucket.lock.release();
    }
}
