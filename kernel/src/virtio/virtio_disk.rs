//
// driver for qemu's virtio disk device.
// uses qemu's "legacy" mmio interface to virtio.
//
// qemu ... -drive file=fs.img,if=none,format=raw,id=x0 -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//

use crate::buf::Buf;
use crate::fs::BSIZE;
use crate::proc::{sleep, wakeup};
use crate::riscv::{PGSHIFT, PGSIZE, __sync_synchronize};
use crate::spinlock::Spinlock;
use crate::string::memset;
use crate::virtio::*;

// the address of virtio mmio register r.
macro_rules! Read_R {
    ( $r:expr ) => {
        (($crate::memlayout::VIRTIO0 + $r) as *const u32).read_volatile()
    };
}

macro_rules! Write_R {
    ( $r:expr, $val:expr ) => {
        (($crate::memlayout::VIRTIO0 + $r) as *mut u32).write_volatile($val as u32)
    };
}

// disk.pages[] is divided into three regions (descriptors, avail ring,
// used ring), as explained in Section 2.6 of the legacy virtio spec.
// It must be two contiguous, page-aligned pages of physical memory, so
// it lives as a plain static rather than coming from kalloc().
#[repr(C, align(4096))]
struct Pages([u8; 2 * PGSIZE]);

static mut PAGES: Pages = Pages([0; 2 * PGSIZE]);

#[derive(Copy, Clone)]
struct Info {
    b: Option<*mut Buf>,
    status: u8,
}

struct Disk {
    // a set (not a ring) of DMA descriptors, with which the
    // driver tells the device where to read and write individual
    // disk operations. there are NUM descriptors.
    // most commands consist of a "chain" (a linked list) of a couple of
    // these descriptors.
    desc: *mut VirtqDesc,

    // a ring in which the driver writes descriptor numbers
    // that the driver would like the device to process. it only
    // includes the head descriptor of each chain. the ring has
    // NUM elements.
    avail: *mut VirtqAvail,

    // a ring in which the device writes descriptor numbers that
    // the device has finished processing (just the head of each chain).
    // there are NUM used ring entries.
    used: *mut VirtqUsed,

    // our own book-keeping.
    free: [u8; NUM],  // is a descriptor free?
    used_idx: u16,    // we've looked this far in used[2..NUM].

    // track info about in-flight operations,
    // for use when completion interrupt arrives.
    // indexed by first descriptor index of chain.
    info: [Info; NUM],

    // disk command headers.
    // one-for-one with descriptors, for convenience.
    ops: [VirtioBlkReq; NUM],

    vdisk_lock: Spinlock,
}

unsafe impl Sync for Disk {}
unsafe impl Send for Disk {}

impl Disk {
    const fn create() -> Self {
        Self {
            desc: core::ptr::null_mut(),
            avail: core::ptr::null_mut(),
            used: core::ptr::null_mut(),
            free: [0; NUM],
            used_idx: 0,
            info: [Info { b: None, status: 0 }; NUM],
            ops: [VirtioBlkReq {
                desc_type: 0,
                reserved: 0,
                sector: 0,
            }; NUM],
            vdisk_lock: Spinlock::init_lock("virtio_disk"),
        }
    }
}

static mut DISK: Disk = Disk::create();

pub fn virtio_disk_init() {
    unsafe {
        if Read_R!(VIRTIO_MMIO_MAGIC_VALUE) != 0x74726976
            || Read_R!(VIRTIO_MMIO_VERSION) != 1
            || Read_R!(VIRTIO_MMIO_DEVICE_ID) != 2
            || Read_R!(VIRTIO_MMIO_VENDOR_ID) != 0x554d4551
        {
            panic!("could not find virtio disk");
        }

        let mut status: u32 = 0;

        status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
        Write_R!(VIRTIO_MMIO_STATUS, status);

        status |= VIRTIO_CONFIG_S_DRIVER;
        Write_R!(VIRTIO_MMIO_STATUS, status);

        // negotiate features
        let mut features = Read_R!(VIRTIO_MMIO_DEVICE_FEATURES);
        features &= !(1 << VIRTIO_BLK_F_RO);
        features &= !(1 << VIRTIO_BLK_F_SCSI);
        features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
        features &= !(1 << VIRTIO_BLK_F_MQ);
        features &= !(1 << VIRTIO_F_ANY_LAYOUT);
        features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
        features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
        Write_R!(VIRTIO_MMIO_DRIVER_FEATURES, features);

        // tell device that feature negotiation is complete.
        status |= VIRTIO_CONFIG_S_FEATURES_OK;
        Write_R!(VIRTIO_MMIO_STATUS, status);

        // tell device we're completely ready.
        status |= VIRTIO_CONFIG_S_DRIVER_OK;
        Write_R!(VIRTIO_MMIO_STATUS, status);

        Write_R!(VIRTIO_MMIO_GUEST_PAGE_SIZE, PGSIZE);

        // initialize queue 0.
        Write_R!(VIRTIO_MMIO_QUEUE_SEL, 0);
        let max = Read_R!(VIRTIO_MMIO_QUEUE_NUM_MAX);
        if max == 0 {
            panic!("virtio disk has no queue 0");
        }
        if (max as usize) < NUM {
            panic!("virtio disk max queue too short");
        }
        Write_R!(VIRTIO_MMIO_QUEUE_NUM, NUM);
        memset(PAGES.0.as_mut_ptr(), 0, PAGES.0.len());
        Write_R!(VIRTIO_MMIO_QUEUE_PFN, (PAGES.0.as_ptr() as usize) >> PGSHIFT);

        // desc = pages -- NUM * virtq_desc
        // avail = pages + NUM * sizeof(virtq_desc) -- 2 * uint16, then NUM * uint16
        // used = pages + PGSIZE -- 2 * uint16, then NUM * vRingUsedElem

        let base = PAGES.0.as_mut_ptr();
        DISK.desc = base as *mut VirtqDesc;
        DISK.avail = base.add(NUM * core::mem::size_of::<VirtqDesc>()) as *mut VirtqAvail;
        DISK.used = base.add(PGSIZE) as *mut VirtqUsed;

        // all NUM descriptors start out unused.
        for i in 0..NUM {
            DISK.free[i] = 1;
        }

        // plic.rs and trap.rs arrange for interrupts from VIRTIO0_IRQ.
    }
}

// find a free descriptor, mark it non-free, return its index.
fn alloc_desc() -> i32 {
    unsafe {
        for i in 0..NUM {
            if DISK.free[i] != 0 {
                DISK.free[i] = 0;
                return i as i32;
            }
        }
    }
    -1
}

// mark a descriptor as free.
fn free_desc(i: usize) {
    unsafe {
        if i >= NUM {
            panic!("free_desc 1");
        }
        if DISK.free[i] != 0 {
            panic!("free_desc 2");
        }
        (*DISK.desc.add(i)).addr = 0;
        (*DISK.desc.add(i)).len = 0;
        (*DISK.desc.add(i)).flags = 0;
        (*DISK.desc.add(i)).next = 0;
        DISK.free[i] = 1;
        wakeup(&DISK.free[0]);
    }
}

// free a chain of descriptors.
fn free_chain(mut i: usize) {
    loop {
        let (flags, next) = unsafe { ((*DISK.desc.add(i)).flags, (*DISK.desc.add(i)).next) };
        free_desc(i);
        if flags & VRING_DESC_F_NEXT != 0 {
            i = next as usize;
        } else {
            break;
        }
    }
}

// allocate three descriptors (they need not be contiguous).
// disk transfers always use three descriptors.
fn alloc3_desc(idx: &mut [usize; 3]) -> i32 {
    for i in 0..3 {
        let d = alloc_desc();
        if d < 0 {
            for j in 0..i {
                free_desc(idx[j]);
            }
            return -1;
        }
        idx[i] = d as usize;
    }
    0
}

pub fn virtio_disk_rw(b: &mut Buf, write: bool) {
    let sector = (b.blockno as u64) * (BSIZE as u64 / 512);

    unsafe { DISK.vdisk_lock.acquire(); }

    // the spec's Section 5.2 says that legacy block operations use
    // three descriptors: one for type/reserved/sector, one for the
    // data, one for a 1-byte status result.

    let mut idx = [0usize; 3];
    loop {
        if alloc3_desc(&mut idx) == 0 {
            break;
        }
        unsafe { sleep(&DISK.free[0], &mut DISK.vdisk_lock); }
    }

    unsafe {
        let buf0 = &mut DISK.ops[idx[0]] as *mut VirtioBlkReq;
        (*buf0).desc_type = if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN };
        (*buf0).reserved = 0;
        (*buf0).sector = sector;

        (*DISK.desc.add(idx[0])).addr = buf0 as u64;
        (*DISK.desc.add(idx[0])).len = core::mem::size_of::<VirtioBlkReq>() as u32;
        (*DISK.desc.add(idx[0])).flags = VRING_DESC_F_NEXT;
        (*DISK.desc.add(idx[0])).next = idx[1] as u16;

        (*DISK.desc.add(idx[1])).addr = b.data.as_mut_ptr() as u64;
        (*DISK.desc.add(idx[1])).len = BSIZE as u32;
        (*DISK.desc.add(idx[1])).flags = if write { 0 } else { VRING_DESC_F_WRITE };
        (*DISK.desc.add(idx[1])).flags |= VRING_DESC_F_NEXT;
        (*DISK.desc.add(idx[1])).next = idx[2] as u16;

        DISK.info[idx[0]].status = 0xff; // device writes 0 on success
        (*DISK.desc.add(idx[2])).addr = &DISK.info[idx[0]].status as *const u8 as u64;
        (*DISK.desc.add(idx[2])).len = 1;
        (*DISK.desc.add(idx[2])).flags = VRING_DESC_F_WRITE;
        (*DISK.desc.add(idx[2])).next = 0;

        // record struct buf for virtio_disk_intr().
        b.disk = true;
        DISK.info[idx[0]].b = Some(b as *mut Buf);

        // tell the device the first index in our chain of descriptors.
        let avail_idx = (*DISK.avail).idx as usize % NUM;
        (*DISK.avail).ring[avail_idx] = idx[0] as u16;

        __sync_synchronize();

        // tell the device another avail ring entry is available.
        (*DISK.avail).idx = (*DISK.avail).idx.wrapping_add(1); // not % NUM ...

        __sync_synchronize();

        Write_R!(VIRTIO_MMIO_QUEUE_NOTIFY, 0); // value is queue number

        // wait for virtio_disk_intr() to say request has finished.
        while b.disk {
            sleep(b, &mut DISK.vdisk_lock);
        }

        DISK.info[idx[0]].b = None;
    }
    free_chain(idx[0]);

    unsafe { DISK.vdisk_lock.release(); }
}

pub fn virtio_disk_intr() {
    unsafe {
        DISK.vdisk_lock.acquire();

        // the device won't raise another interrupt until we tell it
        // we've seen this one, which the following line does.
        // this may race with the device writing new entries to
        // the "used" ring, in which case we may process the new
        // completion entries in this interrupt, and have nothing to do
        // in the next interrupt, which is harmless.
        Write_R!(VIRTIO_MMIO_INTERRUPT_ACK, Read_R!(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3);

        __sync_synchronize();

        // the device increments disk.used->idx when it adds an entry
        // to the used ring.
        while DISK.used_idx != (*DISK.used).idx {
            __sync_synchronize();
            let id = (*DISK.used).ring[DISK.used_idx as usize % NUM].id as usize;

            if DISK.info[id].status != 0 {
                panic!("virtio_disk_intr status");
            }

            if let Some(b) = DISK.info[id].b {
                (*b).disk = false; // disk is done with buf
                wakeup(&*b);
            }

            DISK.used_idx = DISK.used_idx.wrapping_add(1);
        }

        DISK.vdisk_lock.release();
    }
}
