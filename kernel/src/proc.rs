use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::file::file::{filedup, fileclose};
use crate::file::{File, INode};
use crate::fs::fs;
use crate::kalloc::KMEM;
use crate::KSTACK;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::{NCPU, NOFILE, NPROC, ROOTDEV};
use crate::proc::Procstate::{RUNNABLE, RUNNING, SLEEPING, UNUSED, USED, ZOMBIE};
use crate::riscv::{intr_get, intr_on, PageTable, PGSIZE, PTE_R, PTE_W, PTE_X, r_tp};
use crate::spinlock::{pop_off, push_off, Spinlock};
use crate::vm::{copyin, copyout, kvmmap, mappages, uvmalloc, uvmcopy, uvmcreate, uvmdealloc, uvmfirst, uvmfree, uvmunmap};

extern "C" {
    // switch.S
    fn swtch(old: *mut Context, new: *mut Context);
}

// Saved registers for kernel context switches.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct Context {
    ra: u64,
    sp: u64,

    // callee-saved
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    const fn zeroed() -> Self {
        Context {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

// Per-CPU state.
#[derive(Copy, Clone)]
pub struct Cpu {
    pub(crate) proc: Option<*mut Proc>, // The process running on this cpu, or None.
    context: Context,        // swtch() here to enter scheduler().
    pub noff: u8,            // Depth of push_off() nesting.
    pub intena: bool,        // Were interrupts enabled before push_off()?
}

impl Cpu {
    const fn default() -> Self {
        Cpu {
            proc: None,
            context: Context::zeroed(),
            noff: 0,
            intena: false,
        }
    }
}

static mut CPUS: [Cpu; NCPU] = [Cpu::default(); NCPU];
static mut PROCS: [Proc; NPROC] = [Proc::default(); NPROC];

static mut INIT_PROC: Option<*mut Proc> = None;

extern {
    static trampoline: u8; // trampoline.S
}

// per-process data for the trap handling code in trampoline.S.
// sits in a page by itself just under the trampoline page in the
// user page table. not specially mapped in the kernel page table.
// uservec in trampoline.S saves user registers in the trapframe,
// then initializes registers from the trapframe's
// kernel_sp, kernel_hartid, kernel_satp, and jumps to kernel_trap.
// usertrapret() and userret in trampoline.S set up
// the trapframe's kernel_*, restore user registers from the
// trapframe, switch to the user page table, and enter user space.
// the trapframe includes callee-saved user registers like s0-s11 because the
// return-to-user path via usertrapret() doesn't return through
// the entire kernel call stack.
#[derive(Copy, Clone)]
#[repr(C)]
pub(crate) struct Trapframe {
    /*   0 */ pub(crate) kernel_satp: u64, // kernel page table
    /*   8 */ pub(crate) kernel_sp: u64,   // top of process's kernel stack
    /*  16 */ pub(crate) kernel_trap: u64, // usertrap()
    /*  24 */ pub(crate) epc: u64,         // saved user program counter
    /*  32 */ pub(crate) kernel_hartid: u64, // saved kernel tp
    /*  40 */ pub(crate) ra: u64,
    /*  48 */ pub(crate) sp: u64,
    /*  56 */ pub(crate) gp: u64,
    /*  64 */ pub(crate) tp: u64,
    /*  72 */ pub(crate) t0: u64,
    /*  80 */ pub(crate) t1: u64,
    /*  88 */ pub(crate) t2: u64,
    /*  96 */ pub(crate) s0: u64,
    /* 104 */ pub(crate) s1: u64,
    /* 112 */ pub(crate) a0: u64,
    /* 120 */ pub(crate) a1: u64,
    /* 128 */ pub(crate) a2: u64,
    /* 136 */ pub(crate) a3: u64,
    /* 144 */ pub(crate) a4: u64,
    /* 152 */ pub(crate) a5: u64,
    /* 160 */ pub(crate) a6: u64,
    /* 168 */ pub(crate) a7: u64,
    /* 176 */ pub(crate) s2: u64,
    /* 184 */ pub(crate) s3: u64,
    /* 192 */ pub(crate) s4: u64,
    /* 200 */ pub(crate) s5: u64,
    /* 208 */ pub(crate) s6: u64,
    /* 216 */ pub(crate) s7: u64,
    /* 224 */ pub(crate) s8: u64,
    /* 232 */ pub(crate) s9: u64,
    /* 240 */ pub(crate) s10: u64,
    /* 248 */ pub(crate) s11: u64,
    /* 256 */ pub(crate) t3: u64,
    /* 264 */ pub(crate) t4: u64,
    /* 272 */ pub(crate) t5: u64,
    /* 280 */ pub(crate) t6: u64,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) enum Procstate { UNUSED, USED, SLEEPING, RUNNABLE, RUNNING, ZOMBIE }

// Per-process state
#[derive(Copy, Clone)]
pub struct Proc {
    lock: Spinlock,

    // p->lock must be held when using these:
    pub(crate) state: Procstate,     // Process state
    chan: usize,                     // 0 if not sleeping, else wait channel
    killed: bool,                    // Have we been killed?
    xstate: i32,                     // Exit status to be returned to parent's wait
    pub pid: u32,                    // Process ID

    // wait_lock must be held when using this:
    parent: Option<*mut Proc>,       // Parent process

    // these are private to the process, so p->lock need not be held.
    pub(crate) kstack: usize,                    // Virtual address of kernel stack
    pub(crate) sz: usize,                        // Size of process memory (bytes)
    pub(crate) pagetable: Option<&'static mut PageTable>, // User page table
    pub(crate) trapframe: Option<&'static mut Trapframe>, // data page for trampoline.S
    context: Context,                            // swtch() here to run process
    pub(crate) ofile: [Option<*mut File>; NOFILE], // Open files
    pub(crate) cwd: Option<*mut INode>,           // Current directory
    pub(crate) name: [u8; 16],                    // Process name (debugging)
    pub(crate) tracemask: u32,                    // Bitmask of syscall numbers to trace
}

unsafe impl Sync for Proc {}
unsafe impl Send for Proc {}
unsafe impl Sync for Cpu {}

impl Proc {
    const fn default() -> Self {
        Proc {
            lock: Spinlock::init_lock("proc"),
            state: UNUSED,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: 0,
            parent: None,
            kstack: 0,
            sz: 0,
            pagetable: None,
            trapframe: None,
            context: Context::zeroed(),
            ofile: [None; NOFILE],
            cwd: None,
            name: [0; 16],
            tracemask: 0,
        }
    }

    /// Has this process been killed? Checked by long-running kernel
    /// loops (pipe/console read, virtio wait) so a killed process
    /// doesn't spin forever.
    pub fn killed(self: &mut Self) -> i32 {
        self.lock.acquire();
        let k = self.killed;
        self.lock.release();
        k as i32
    }

    pub fn setkilled(self: &mut Self) {
        self.lock.acquire();
        self.killed = true;
        self.lock.release();
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);
// helps ensure that wakeups of wait()ing
// parents are not lost. helps obey the
// memory model when using p->parent.
// must be acquired before any p->lock.
static mut WAIT_LOCK: Spinlock = Spinlock::init_lock("wait_lock");

// Must be called with interrupts disabled,
// to prevent race with process being moved
// to a different CPU.
pub fn cpuid() -> usize {
    r_tp() as usize
}

// Return this CPU's cpu struct.
// Interrupts must be disabled.
pub fn mycpu() -> &'static mut Cpu {
    unsafe { &mut CPUS[cpuid()] }
}

// Return the current struct proc *, or panics if none (every kernel
// path that calls this runs in a process's own context).
pub fn myproc() -> &'static mut Proc {
    push_off();
    let c = mycpu();
    let p = c.proc;
    pop_off();
    unsafe { p.expect("myproc: no current process").as_mut().unwrap() }
}

fn allocpid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

// Allocate a page for each process's kernel stack.
// Map it high in memory, followed by an invalid
// guard page.
pub fn proc_mapstacks(kpgtbl: &mut PageTable) {
    for idx in 0..NPROC {
        unsafe {
            let pa: *mut u8 = KMEM.kalloc();
            if pa.is_null() {
                panic!("kalloc");
            }
            let va = KSTACK!(idx);
            kvmmap(kpgtbl, va, pa as usize, PGSIZE, PTE_R | PTE_W)
        }
    }
}

// initialize the proc table.
pub fn procinit() {
    for (i, p) in unsafe { PROCS.iter_mut() }.enumerate() {
        p.kstack = KSTACK!(i);
    }
}

// a user program that calls exec("/init")
// assembled from ../user/initcode.S
// od -t xC ../user/initcode
const INITCODE: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02,
    0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00,
    0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69,
    0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00
];

// Set up first user process.
pub fn userinit() {
    let p = allocproc().expect("userinit: allocproc");
    unsafe { INIT_PROC = Some(p as *mut Proc); }

    // allocate one user page and copy initcode's instructions
    // and data into it.
    uvmfirst(p.pagetable.as_deref_mut().unwrap(), &INITCODE as *const u8, mem::size_of_val(&INITCODE));
    p.sz = PGSIZE;

    // prepare for the very first "return" from kernel to user.
    let tf = p.trapframe.as_deref_mut().unwrap();
    tf.epc = 0;             // user program counter
    tf.sp = PGSIZE as u64;  // user stack pointer

    p.name = *b"initcode\0\0\0\0\0\0\0\0";
    p.cwd = fs::namei(b"/").map(|i| i as *mut INode);

    p.state = RUNNABLE;

    p.lock.release();
}

// A fork child's very first scheduling by scheduler()
// will swtch to forkret.
extern "C" fn forkret() {
    static mut FIRST: bool = true;

    // Still holding p->lock from scheduler.
    myproc().lock.release();

    unsafe {
        if FIRST {
            // File system initialization must be run in the context of a
            // regular process (e.g., because it calls sleep), and thus
            // cannot be run from main().
            FIRST = false;
            fs::fsinit(ROOTDEV);
        }
    }

    crate::trap::usertrapret();
}

// Look in the process table for an UNUSED proc.
// If found, initialize state required to run in the kernel,
// and return with p->lock held.
// If there are no free procs, or a memory allocation fails, return None.
fn allocproc() -> Option<&'static mut Proc> {
    let mut found: Option<&mut Proc> = None;
    unsafe {
        for i in 0..NPROC {
            let p = &mut PROCS[i];
            p.lock.acquire();
            if p.state == UNUSED {
                found = Some(p);
                break;
            }
            p.lock.release();
        }
    }

    let p = found?;
    p.pid = allocpid();
    p.state = USED;

    // Allocate a trapframe page.
    let trapframe_ptr: *mut Trapframe = unsafe { KMEM.kalloc() };
    if trapframe_ptr.is_null() {
        freeproc(p);
        p.lock.release();
        return None;
    }
    p.trapframe = Some(unsafe { trapframe_ptr.as_mut().unwrap() });

    // An empty user page table.
    p.pagetable = proc_pagetable(p);
    if p.pagetable.is_none() {
        freeproc(p);
        p.lock.release();
        return None;
    }

    // Set up new context to start executing at forkret,
    // which returns to user space.
    p.context = Context::zeroed();
    p.context.ra = forkret as usize as u64;
    p.context.sp = (p.kstack + PGSIZE) as u64;

    Some(p)
}

// free a proc structure and the data hanging from it,
// including user pages.
// p->lock must be held.
fn freeproc(p: &mut Proc) {
    if let Some(tf) = p.trapframe.take() {
        unsafe { KMEM.kfree(tf as *mut Trapframe) };
    }

    if let Some(pt) = p.pagetable.take() {
        proc_freepagetable(pt, p.sz);
    }

    p.sz = 0;
    p.pid = 0;
    p.parent = None;
    p.name = [0; 16];
    p.chan = 0;
    p.killed = false;
    p.xstate = 0;
    p.tracemask = 0;
    p.state = UNUSED;
}

// Create a user page table for a given process, with no user memory,
// but with trampoline and trapframe pages.
fn proc_pagetable(p: &mut Proc) -> Option<&'static mut PageTable> {
    // An empty page table.
    let pagetable = uvmcreate()?;

    // map the trampoline code (for system call return)
    // at the highest user virtual address.
    // only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    let trapoline_addr = (unsafe { &trampoline } as *const u8).expose_addr();
    if mappages(pagetable, TRAMPOLINE, trapoline_addr, PGSIZE, PTE_R | PTE_X) != 0 {
        uvmfree(pagetable, 0);
        return None;
    }

    // map the trapframe page just below the trampoline page, for
    // trampoline.S.
    let trapframe_addr = (p.trapframe.as_deref().unwrap() as *const Trapframe).expose_addr();
    if mappages(pagetable, TRAPFRAME, trapframe_addr, PGSIZE, PTE_R | PTE_W) != 0 {
        uvmunmap(pagetable, TRAMPOLINE, 1, false);
        uvmfree(pagetable, 0);
        return None;
    }

    Some(pagetable)
}

// Free a process's page table, and free the
// physical memory it refers to.
fn proc_freepagetable(pagetable: &mut PageTable, sz: usize) {
    uvmunmap(pagetable, TRAMPOLINE, 1, false);
    uvmunmap(pagetable, TRAPFRAME, 1, false);
    uvmfree(pagetable, sz);
}

// Grow or shrink user memory by n bytes.
// Returns 0 on success, -1 on failure.
pub fn growproc(n: i32) -> i32 {
    let p = myproc();
    let mut sz = p.sz;

    if n > 0 {
        let newsz = uvmalloc(p.pagetable.as_deref_mut().unwrap(), sz, sz + n as usize, PTE_W);
        if newsz == 0 {
            return -1;
        }
        sz = newsz;
    } else if n < 0 {
        sz = uvmdealloc(p.pagetable.as_deref_mut().unwrap(), sz, (sz as isize + n as isize) as usize);
    }

    p.sz = sz;
    0
}

// Create a new process, copying the parent.
// Sets up child kernel stack to return as if from fork() system call.
pub fn fork() -> i32 {
    let p = myproc();

    let np = match allocproc() {
        Some(np) => np,
        None => return -1,
    };

    // Copy user memory from parent to child (shared, copy-on-write).
    if uvmcopy(p.pagetable.as_deref_mut().unwrap(), np.pagetable.as_deref_mut().unwrap(), p.sz) < 0 {
        freeproc(np);
        np.lock.release();
        return -1;
    }
    np.sz = p.sz;

    // copy saved user registers.
    *np.trapframe.as_deref_mut().unwrap() = *p.trapframe.as_deref().unwrap();

    // Cause fork to return 0 in the child.
    np.trapframe.as_deref_mut().unwrap().a0 = 0;

    // increment reference counts on open file descriptors.
    for i in 0..NOFILE {
        if let Some(f) = p.ofile[i] {
            filedup(f);
            np.ofile[i] = Some(f);
        }
    }
    np.cwd = p.cwd.map(|c| unsafe { (*c).idup() as *mut INode });

    np.name = p.name;
    np.tracemask = p.tracemask;

    let pid = np.pid;

    np.lock.release();

    unsafe {
        WAIT_LOCK.acquire();
        np.parent = Some(p as *mut Proc);
        WAIT_LOCK.release();
    }

    np.lock.acquire();
    np.state = RUNNABLE;
    np.lock.release();

    pid as i32
}

// Pass p's abandoned children to init.
// Caller must hold wait_lock.
fn reparent(p: &mut Proc) {
    unsafe {
        for i in 0..NPROC {
            let pp = &mut PROCS[i];
            if let Some(parent) = pp.parent {
                if parent == p as *mut Proc {
                    pp.parent = INIT_PROC;
                    wakeup(INIT_PROC.unwrap().as_ref().unwrap());
                }
            }
        }
    }
}

// Exit the current process. Does not return.
// An exited process remains in the zombie state
// until its parent calls wait().
pub fn exit(status: i32) -> ! {
    let p = myproc();

    unsafe {
        if Some(p as *mut Proc) == INIT_PROC {
            panic!("init exiting");
        }
    }

    // Close all open files.
    for i in 0..NOFILE {
        if let Some(f) = p.ofile[i].take() {
            fileclose(unsafe { f.as_mut().unwrap() });
        }
    }

    crate::log::begin_op();
    unsafe { (*p.cwd.unwrap()).iput(); }
    crate::log::end_op();
    p.cwd = None;

    unsafe { WAIT_LOCK.acquire(); }

    // Give any children to init.
    reparent(p);

    // Parent might be sleeping in wait().
    unsafe {
        if let Some(parent) = p.parent {
            wakeup(parent.as_ref().unwrap());
        }
    }

    p.lock.acquire();

    p.xstate = status;
    p.state = ZOMBIE;

    unsafe { WAIT_LOCK.release(); }

    // Jump into the scheduler, never to return.
    sched();

    unreachable!("zombie exited");
}

// Wait for a child process to exit and return its pid.
// Return -1 if this process has no children.
pub fn wait(addr: usize) -> i32 {
    let p = myproc();

    unsafe { WAIT_LOCK.acquire(); }

    loop {
        let mut havekids = false;

        unsafe {
            for i in 0..NPROC {
                let np = &mut PROCS[i];
                if np.parent != Some(p as *mut Proc) {
                    continue;
                }

                // make sure the child isn't still in exit() or swtch().
                np.lock.acquire();

                havekids = true;
                if np.state == ZOMBIE {
                    let pid = np.pid;
                    if addr != 0
                        && copyout(
                            p.pagetable.as_deref_mut().unwrap(),
                            addr,
                            (&np.xstate as *const i32) as *const u8,
                            mem::size_of::<i32>(),
                        ) < 0
                    {
                        np.lock.release();
                        WAIT_LOCK.release();
                        return -1;
                    }
                    freeproc(np);
                    np.lock.release();
                    WAIT_LOCK.release();
                    return pid as i32;
                }

                np.lock.release();
            }
        }

        // No point waiting if we don't have any children.
        if !havekids || p.killed() != 0 {
            unsafe { WAIT_LOCK.release(); }
            return -1;
        }

        // Wait for a child to exit.
        sleep(p, unsafe { &mut WAIT_LOCK });
    }
}

// Per-CPU process scheduler.
// Each CPU calls scheduler() after setting itself up.
// Scheduler never returns. It loops, doing:
//  - choose a process to run.
//  - swtch to start running that process.
//  - eventually that process transfers control
//    via swtch back to the scheduler.
pub fn scheduler() -> ! {
    let c = mycpu();
    c.proc = None;

    loop {
        // Avoid deadlock by ensuring that devices can interrupt.
        intr_on();

        let mut found = false;
        unsafe {
            for i in 0..NPROC {
                let p = &mut PROCS[i];
                p.lock.acquire();
                if p.state == RUNNABLE {
                    // Switch to chosen process. It is the process's job
                    // to release its lock and then reacquire it before
                    // jumping back to us.
                    p.state = RUNNING;
                    c.proc = Some(p as *mut Proc);

                    swtch(&mut c.context as *mut Context, &mut p.context as *mut Context);

                    // Process is done running for now. It should have
                    // changed its p->state before coming back.
                    c.proc = None;
                    found = true;
                }
                p.lock.release();
            }
        }

        if !found {
            // Nothing to run; wait for an interrupt to avoid burning
            // power with a busy loop.
            unsafe { core::arch::asm!("wfi") }
        }
    }
}

// Switch to scheduler. Must hold only p->lock and have changed
// proc->state. Saves and restores intena because intena is a
// property of this kernel thread, not this CPU.
fn sched() {
    let p = myproc();

    if !p.lock.holding() {
        panic!("sched p->lock");
    }
    if mycpu().noff != 1 {
        panic!("sched locks");
    }
    if p.state == RUNNING {
        panic!("sched running");
    }
    if intr_get() {
        panic!("sched interruptible");
    }

    let intena = mycpu().intena;
    unsafe {
        swtch(&mut p.context as *mut Context, &mut mycpu().context as *mut Context);
    }
    mycpu().intena = intena;
}

// Give up the CPU for one scheduling round.
pub fn proc_yield() {
    let p = myproc();
    p.lock.acquire();
    p.state = RUNNABLE;
    sched();
    p.lock.release();
}

// Atomically release lock and sleep on chan.
// Reacquires lock when awakened.
pub fn sleep<T>(chan: &T, lk: &mut Spinlock) {
    let p = myproc();
    let chan_addr = chan as *const T as usize;

    // Must acquire p->lock in order to change p->state and then call
    // sched. Once we hold p->lock we can be guaranteed that we won't
    // miss any wakeup (wakeup locks p->lock), so it's okay to release
    // lk.
    if !core::ptr::eq(lk as *const Spinlock, &p.lock as *const Spinlock) {
        p.lock.acquire();
        lk.release();
    }

    p.chan = chan_addr;
    p.state = SLEEPING;

    sched();

    // Tidy up.
    p.chan = 0;

    if !core::ptr::eq(lk as *const Spinlock, &p.lock as *const Spinlock) {
        p.lock.release();
        lk.acquire();
    }
}

// Wake up all processes sleeping on chan.
// Must be called without any p->lock held.
pub fn wakeup<T>(chan: &T) {
    let chan_addr = chan as *const T as usize;
    unsafe {
        for i in 0..NPROC {
            let p = &mut PROCS[i];
            let me = myproc() as *const Proc;
            if p as *const Proc != me {
                p.lock.acquire();
                if p.state == SLEEPING && p.chan == chan_addr {
                    p.state = RUNNABLE;
                }
                p.lock.release();
            }
        }
    }
}

// Kill the process with the given pid.
// The victim won't exit until it tries to return to user space
// (see usertrap() in trap.rs).
pub fn kill(pid: u32) -> i32 {
    unsafe {
        for i in 0..NPROC {
            let p = &mut PROCS[i];
            p.lock.acquire();
            if p.pid == pid {
                p.killed = true;
                if p.state == SLEEPING {
                    // Wake process from sleep().
                    p.state = RUNNABLE;
                }
                p.lock.release();
                return 0;
            }
            p.lock.release();
        }
    }
    -1
}

// Copy to either a user address, or kernel address,
// depending on usr_dst.
pub fn either_copyout<T>(user_dst: bool, dst: *mut u8, src: &T, len: usize) -> i32 {
    let p = myproc();
    if user_dst {
        if copyout(p.pagetable.as_deref_mut().unwrap(), dst.expose_addr(), (src as *const T) as *const u8, len) < 0 {
            -1
        } else {
            0
        }
    } else {
        crate::string::memmove(dst, (src as *const T) as *const u8, len);
        0
    }
}

// Copy from either a user address, or kernel address,
// depending on usr_src.
pub fn either_copyin(dst: *mut u8, user_src: bool, src: *const u8, len: usize) -> i32 {
    let p = myproc();
    if user_src {
        if copyin(p.pagetable.as_deref_mut().unwrap(), dst, src.expose_addr(), len) < 0 {
            -1
        } else {
            0
        }
    } else {
        crate::string::memmove(dst, src, len);
        0
    }
}

// Count process-table slots not UNUSED, for sys_sysinfo.
pub fn nproc() -> usize {
    let mut n = 0;
    unsafe {
        for i in 0..NPROC {
            if PROCS[i].state != UNUSED {
                n += 1;
            }
        }
    }
    n
}

// Print a process listing to the console, for debugging.
// Runs when a user types ^P on the console.
// No lock is held to avoid wedging a stuck machine further.
pub fn procdump() {
    crate::printf!("\n");
    unsafe {
        for i in 0..NPROC {
            let p = &PROCS[i];
            if p.state == UNUSED {
                continue;
            }
            let state = match p.state {
                UNUSED => "unused",
                USED => "used",
                SLEEPING => "sleep ",
                RUNNABLE => "runble",
                RUNNING => "run   ",
                ZOMBIE => "zombie",
            };
            let nlen = p.name.iter().position(|&c| c == 0).unwrap_or(p.name.len());
            crate::printf!(
                "{} {} {}\n",
                p.pid,
                state,
                core::str::from_utf8(&p.name[..nlen]).unwrap_or("?")
            );
        }
    }
}
