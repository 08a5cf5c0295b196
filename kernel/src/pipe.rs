use crate::file::file::{fileclose, filealloc};
use crate::file::{File, FDType};
use crate::kalloc::KMEM;
use crate::proc::{either_copyin, either_copyout, myproc, sleep, wakeup};
use crate::spinlock::Spinlock;

const PIPESIZE: usize = 512;
pub struct Pipe {
    lock: Spinlock,
    data: [u8; PIPESIZE],
    nread: u32, // number of bytes read
    nwrite: u32, // number of bytes written
    readopen: bool, // read fd is still open
    writeopen: bool, // write fd is still open
}

impl Pipe {
    const fn new() -> Self {
        Pipe {
            lock: Spinlock::init_lock("pipe"),
            data: [0; PIPESIZE],
            nread: 0,
            nwrite: 0,
            readopen: true,
            writeopen: true,
        }
    }

    pub(crate) fn close(self: &mut Self, writable: bool) {
        self.lock.acquire();
        if writable {
            self.writeopen = false;
            wakeup(&self.nread);
        } else {
            self.readopen = false;
            wakeup(&self.nwrite);
        }
        if !self.readopen && !self.writeopen {
            self.lock.release();
            unsafe { KMEM.kfree(self as *mut Pipe); }
        } else {
            self.lock.release();
        }
    }

    pub(crate) fn write(self: &mut Self, addr: usize, n: usize) -> i32 {
        let mut i = 0usize;
        let pr = myproc();

        self.lock.acquire();
        while i < n {
            if !self.readopen || pr.killed() != 0 {
                self.lock.release();
                return -1;
            }
            if self.nwrite == self.nread + PIPESIZE as u32 {
                // full; wake any reader and wait for space.
                wakeup(&self.nread);
                sleep(&self.nwrite, &mut self.lock);
            } else {
                let mut ch: u8 = 0;
                if either_copyin(&mut ch as *mut u8, true, (addr + i) as *const u8, 1) == -1 {
                    break;
                }
                let idx = (self.nwrite as usize) % PIPESIZE;
                self.data[idx] = ch;
                self.nwrite += 1;
                i += 1;
            }
        }
        wakeup(&self.nread);
        self.lock.release();

        i as i32
    }

    pub(crate) fn read(self: &mut Self, addr: usize, n: usize) -> i32 {
        let pr = myproc();
        let mut read_n = 0i32;

        self.lock.acquire();
        while self.nread == self.nwrite && self.writeopen {
            if pr.killed() != 0 {
                self.lock.release();
                return -1;
            }
            sleep(&self.nread, &mut self.lock);
        }

        for i in 0..n {
            if self.nread == self.nwrite {
                break;
            }
            let ch = self.data[(self.nread as usize) % PIPESIZE];
            self.nread += 1;
            if either_copyout(true, (addr + i) as *mut u8, &ch, 1) == -1 {
                break;
            }
            read_n += 1;
        }
        wakeup(&self.nwrite);
        self.lock.release();

        read_n
    }
}

// Allocate a pipe and a pair of files wired up as its read and
// write ends. Returns (read_file, write_file).
pub fn pipealloc() -> Option<(*mut File, *mut File)> {
    let f0 = filealloc()?;
    let f1 = match filealloc() {
        Some(f1) => f1,
        None => {
            fileclose(f0);
            return None;
        }
    };

    let pi: *mut Pipe = unsafe { KMEM.kalloc() };
    if pi.is_null() {
        fileclose(f0);
        fileclose(f1);
        return None;
    }

    unsafe {
        pi.write(Pipe::new());
    }

    f0.file_type = FDType::FD_PIPE;
    f0.readable = true;
    f0.writable = false;
    f0.pipe = Some(pi);

    f1.file_type = FDType::FD_PIPE;
    f1.readable = false;
    f1.writable = true;
    f1.pipe = Some(pi);

    Some((f0 as *mut File, f1 as *mut File))
}
