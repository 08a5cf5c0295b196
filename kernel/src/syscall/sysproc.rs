use core::mem;

use crate::kalloc::KMEM;
use crate::proc::{exit, fork, growproc, kill, myproc, nproc, sleep};
use crate::syscall::syscall::{argaddr, argint};
use crate::trap::{ticks, TICKS_LOCK};
use crate::vm::copyout;

// Mirrors the on-disk-free xv6 "sysinfo" lab struct: total free memory in
// bytes and the number of allocated process-table slots.
#[repr(C)]
struct Sysinfo {
    freemem: u64,
    nproc: u64,
}

pub(crate) fn sys_fork() -> u64 {
    fork() as u64
}

pub(crate) fn sys_exit() -> u64 {
    let n = argint(0);
    exit(n);
}

pub(crate) fn sys_wait() -> u64 {
    let addr = argaddr(0);
    crate::proc::wait(addr) as u64
}

pub(crate) fn sys_sbrk() -> u64 {
    let n = argint(0);
    let addr = myproc().sz;
    if growproc(n) < 0 {
        return u64::MAX;
    }
    addr as u64
}

pub(crate) fn sys_sleep() -> u64 {
    let n = argint(0);
    unsafe {
        TICKS_LOCK.acquire();
        let start = ticks();
        let p = myproc();
        while ticks().wrapping_sub(start) < n as u32 {
            if p.killed() != 0 {
                TICKS_LOCK.release();
                return u64::MAX;
            }
            sleep(&crate::trap::TICKS, &mut TICKS_LOCK);
        }
        TICKS_LOCK.release();
    }
    0
}

pub(crate) fn sys_kill() -> u64 {
    let pid = argint(0);
    kill(pid as u32) as u64
}

pub(crate) fn sys_getpid() -> u64 {
    myproc().pid as u64
}

pub(crate) fn sys_uptime() -> u64 {
    unsafe {
        TICKS_LOCK.acquire();
        let n = ticks();
        TICKS_LOCK.release();
        n as u64
    }
}

// Set the calling process's syscall trace mask. Bit i set means syscall
// number i is logged on return. Inherited across fork.
pub(crate) fn sys_trace() -> u64 {
    let mask = argint(0);
    myproc().tracemask = mask as u32;
    0
}

pub(crate) fn sys_sysinfo() -> u64 {
    let addr = argaddr(0);
    let p = myproc();

    let info = Sysinfo {
        freemem: unsafe { KMEM.nfree() as u64 },
        nproc: nproc() as u64,
    };

    let pagetable = p.pagetable.as_deref_mut().unwrap();
    if copyout(
        pagetable,
        addr,
        &info as *const Sysinfo as *const u8,
        mem::size_of::<Sysinfo>(),
    ) < 0
    {
        return u64::MAX;
    }
    0
}
