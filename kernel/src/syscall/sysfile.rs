// File-system related system calls.

use core::mem;

use crate::exec::exec;
use crate::file::fcntl::{O_CREATE, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
use crate::file::file::{fileclose, filealloc, fileread, filestat, filewrite};
use crate::file::{File, INode};
use crate::file::FDType::{FD_DEVICE, FD_INODE};
use crate::fs::{Dirent, DIRSIZ};
use crate::fs::fs::{dirlink, dirlookup, ialloc, namei, nameiparent};
use crate::kalloc::KMEM;
use crate::log::{begin_op, end_op};
use crate::param::{MAXARG, MAXPATH, NDEV, NOFILE};
use crate::pipe::pipealloc;
use crate::proc::myproc;
use crate::riscv::PGSIZE;
use crate::stat::FileType;
use crate::stat::FileType::{T_DEVICE, T_DIR, T_FILE};
use crate::syscall::syscall::{argaddr, argint, argstr, fetchaddr, fetchstr};
use crate::vm::copyout;

// Fetch the nth word-sized syscall argument as a file descriptor,
// and return both the descriptor number and its File.
fn argfd(n: u8) -> Option<(usize, &'static mut File)> {
    let fd = argint(n) as usize;
    let p = myproc();
    if fd >= NOFILE {
        return None;
    }
    let f = p.ofile[fd]?;
    Some((fd, unsafe { f.as_mut().unwrap() }))
}

// Allocate a file descriptor for the given file.
// Takes over file reference from caller on success.
fn fdalloc(f: *mut File) -> Option<usize> {
    let p = myproc();

    for fd in 0..NOFILE {
        if p.ofile[fd].is_none() {
            p.ofile[fd] = Some(f);
            return Some(fd);
        }
    }

    None
}

pub(crate) fn sys_dup() -> u64 {
    let (_, f) = match argfd(0) {
        Some(x) => x,
        None => return u64::MAX,
    };
    match fdalloc(f as *mut File) {
        Some(fd) => {
            crate::file::file::filedup(f as *mut File);
            fd as u64
        }
        None => u64::MAX,
    }
}

pub(crate) fn sys_read() -> u64 {
    let (_, f) = match argfd(0) {
        Some(x) => x,
        None => return u64::MAX,
    };
    let addr = argaddr(1);
    let n = argint(2);
    fileread(f, addr, n as usize) as u64
}

pub(crate) fn sys_write() -> u64 {
    let (_, f) = match argfd(0) {
        Some(x) => x,
        None => return u64::MAX,
    };
    let addr = argaddr(1);
    let n = argint(2);
    filewrite(f, addr, n as usize) as u64
}

pub(crate) fn sys_close() -> u64 {
    let (fd, f) = match argfd(0) {
        Some(x) => x,
        None => return u64::MAX,
    };
    myproc().ofile[fd] = None;
    fileclose(f);
    0
}

pub(crate) fn sys_fstat() -> u64 {
    let (_, f) = match argfd(0) {
        Some(x) => x,
        None => return u64::MAX,
    };
    let addr = argaddr(1);
    let p = myproc();
    filestat(f, addr, p.pagetable.as_mut().unwrap()) as u64
}

// Create the path new as a link to the same inode as old.
pub(crate) fn sys_link() -> u64 {
    let mut new: [u8; MAXPATH] = [0; MAXPATH];
    let mut old: [u8; MAXPATH] = [0; MAXPATH];

    if argstr(0, old.as_mut_ptr(), MAXPATH) < 0 || argstr(1, new.as_mut_ptr(), MAXPATH) < 0 {
        return u64::MAX;
    }

    begin_op();

    let ip = match namei(&old) {
        Some(ip) => ip,
        None => {
            end_op();
            return u64::MAX;
        }
    };

    ip.ilock();
    if ip.file_type == T_DIR {
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }
    ip.nlink += 1;
    ip.iupdate();
    ip.iunlock();

    let (dp, name) = nameiparent(&new);
    let ok = match dp {
        Some(dp) => {
            dp.ilock();
            let linked = dp.dev == ip.dev && dirlink(dp, name, ip.inum as u16).is_some();
            dp.iunlockput();
            linked
        }
        None => false,
    };

    if !ok {
        ip.ilock();
        ip.nlink -= 1;
        ip.iupdate();
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }

    ip.iput();
    end_op();
    0
}

// Is the directory dp empty except for "." and ".." ?
fn isdirempty(dp: &mut INode) -> bool {
    let sz = mem::size_of::<Dirent>();
    let mut de = Dirent { inum: 0, name: [0; DIRSIZ] };
    let mut off = 2 * sz as u32;
    while off < dp.size {
        if dp.readi(false, &mut de as *mut Dirent, off, sz) != sz {
            panic!("isdirempty: readi");
        }
        if de.inum != 0 {
            return false;
        }
        off += sz as u32;
    }
    true
}

pub(crate) fn sys_unlink() -> u64 {
    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    if argstr(0, path.as_mut_ptr(), MAXPATH) < 0 {
        return u64::MAX;
    }

    begin_op();

    let (dp, name) = nameiparent(&path);
    let dp = match dp {
        Some(dp) => dp,
        None => {
            end_op();
            return u64::MAX;
        }
    };

    dp.ilock();

    if name == b"." || name == b".." {
        dp.iunlockput();
        end_op();
        return u64::MAX;
    }

    let mut off = 0u32;
    let ip = match dirlookup(dp, name, &mut off) {
        Some(ip) => ip,
        None => {
            dp.iunlockput();
            end_op();
            return u64::MAX;
        }
    };
    ip.ilock();

    if ip.nlink < 1 {
        panic!("unlink: nlink < 1");
    }
    if ip.file_type == T_DIR && !isdirempty(ip) {
        ip.iunlockput();
        dp.iunlockput();
        end_op();
        return u64::MAX;
    }

    let de = Dirent { inum: 0, name: [0; DIRSIZ] };
    if dp.writei(false, &de as *const Dirent as *mut Dirent, off, mem::size_of::<Dirent>())
        != mem::size_of::<Dirent>() as isize
    {
        panic!("unlink: writei");
    }
    if ip.file_type == T_DIR {
        dp.nlink -= 1;
        dp.iupdate();
    }
    dp.iunlockput();

    ip.nlink -= 1;
    ip.iupdate();
    ip.iunlockput();

    end_op();
    0
}

fn create<'a>(path: &[u8], file_type: FileType, major: i16, minor: i16) -> Option<&'a mut INode> {
    let (dp, name) = nameiparent(path);
    let dp = dp?;
    dp.ilock();

    if let Some(ip) = dirlookup(dp, name, &mut 0) {
        dp.iunlockput();
        ip.ilock();
        if file_type == T_FILE && (ip.file_type == T_FILE || ip.file_type == T_DEVICE) {
            return Some(ip);
        }
        ip.iunlockput();
        return None;
    }

    let ip = match ialloc(dp.dev, file_type) {
        Some(ip) => ip,
        None => {
            dp.iunlockput();
            return None;
        }
    };

    ip.ilock();
    ip.major = major;
    ip.minor = minor;
    ip.nlink = 1;
    ip.iupdate();

    if file_type == T_DIR {
        // Create . and .. entries, no ip->nlink++ for "." to avoid a cyclic ref count.
        if dirlink(ip, b".", ip.inum as u16).is_none()
            || dirlink(ip, b"..", dp.inum as u16).is_none()
        {
            ip.nlink = 0;
            ip.iupdate();
            ip.iunlockput();
            dp.iunlockput();
            return None;
        }
    }

    if dirlink(dp, name, ip.inum as u16).is_none() {
        ip.nlink = 0;
        ip.iupdate();
        ip.iunlockput();
        dp.iunlockput();
        return None;
    }

    if file_type == T_DIR {
        // now that success is guaranteed:
        dp.nlink += 1; // for ".."
        dp.iupdate();
    }

    dp.iunlockput();
    Some(ip)
}

pub(crate) fn sys_open() -> u64 {
    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    let omode = argint(1);
    if argstr(0, path.as_mut_ptr(), MAXPATH) < 0 {
        return u64::MAX;
    }

    begin_op();

    let ip: &mut INode;
    if omode & O_CREATE != 0 {
        match create(&path, T_FILE, 0, 0) {
            Some(i) => ip = i,
            None => {
                end_op();
                return u64::MAX;
            }
        }
    } else {
        match namei(&path) {
            Some(i) => {
                ip = i;
                ip.ilock();
                if ip.file_type == T_DIR && omode != O_RDONLY {
                    ip.iunlockput();
                    end_op();
                    return u64::MAX;
                }
            }
            None => {
                end_op();
                return u64::MAX;
            }
        }
    }

    if ip.file_type == T_DEVICE && (ip.major < 0 || ip.major as usize >= NDEV) {
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }

    let f = match filealloc() {
        Some(f) => f,
        None => {
            ip.iunlockput();
            end_op();
            return u64::MAX;
        }
    };

    let fd = match fdalloc(f as *mut File) {
        Some(fd) => fd,
        None => {
            fileclose(f);
            ip.iunlockput();
            end_op();
            return u64::MAX;
        }
    };

    if ip.file_type == T_DEVICE {
        f.file_type = FD_DEVICE;
        f.major = ip.major;
    } else {
        f.file_type = FD_INODE;
        f.off = 0;
    }
    f.ip = Some(ip as *mut INode);
    f.readable = omode & O_WRONLY == 0;
    f.writable = (omode & O_WRONLY) != 0 || (omode & O_RDWR) != 0;

    if (omode & O_TRUNC) != 0 && ip.file_type == T_FILE {
        ip.itrunc();
    }

    ip.iunlock();
    end_op();

    fd as u64
}

pub(crate) fn sys_mkdir() -> u64 {
    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    begin_op();
    if argstr(0, path.as_mut_ptr(), MAXPATH) < 0 {
        end_op();
        return u64::MAX;
    }
    match create(&path, T_DIR, 0, 0) {
        Some(ip) => {
            ip.iunlockput();
            end_op();
            0
        }
        None => {
            end_op();
            u64::MAX
        }
    }
}

pub(crate) fn sys_mknod() -> u64 {
    begin_op();
    let major = argint(1) as i16;
    let minor = argint(2) as i16;

    let mut path = [0u8; MAXPATH];
    if argstr(0, path.as_mut_ptr(), MAXPATH) < 0 {
        end_op();
        return u64::MAX;
    }

    match create(&path, T_DEVICE, major, minor) {
        Some(ip) => {
            ip.iunlockput();
            end_op();
            0
        }
        None => {
            end_op();
            u64::MAX
        }
    }
}

pub(crate) fn sys_chdir() -> u64 {
    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    let p = myproc();

    if argstr(0, path.as_mut_ptr(), MAXPATH) < 0 {
        return u64::MAX;
    }

    begin_op();
    let ip = match namei(&path) {
        Some(ip) => ip,
        None => {
            end_op();
            return u64::MAX;
        }
    };
    ip.ilock();
    if ip.file_type != T_DIR {
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }
    ip.iunlock();
    unsafe {
        p.cwd.unwrap().as_mut().unwrap().iput();
    }
    end_op();

    p.cwd = Some(ip as *mut INode);
    0
}

pub(crate) fn sys_exec() -> u64 {
    let mut uarg: usize = 0;
    let uargv = argaddr(1);

    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    if argstr(0, path.as_mut_ptr(), MAXPATH) < 0 {
        return u64::MAX;
    }

    let mut argv: [Option<*mut u8>; MAXARG] = [None; MAXARG];
    let mut i = 0;
    let mut bad = false;
    loop {
        if i >= argv.len() {
            bad = true;
            break;
        }

        if fetchaddr(uargv + mem::size_of::<usize>() * i, &mut uarg) < 0 {
            bad = true;
            break;
        }

        if uarg == 0 {
            argv[i] = None;
            break;
        }

        let ptr: *mut u8 = unsafe { KMEM.kalloc() };
        if ptr.is_null() {
            bad = true;
            break;
        }
        argv[i] = Some(ptr);

        if fetchstr(uarg, argv[i].unwrap(), PGSIZE) < 0 {
            bad = true;
            break;
        }

        i += 1;
    }

    let mut ret = -1;
    if !bad {
        ret = exec(&path, &argv);
    }

    for slot in argv.iter() {
        match slot {
            Some(p) => unsafe { KMEM.kfree(*p) },
            None => break,
        }
    }

    ret as u64
}

pub(crate) fn sys_pipe() -> u64 {
    let fdarray = argaddr(0);
    let p = myproc();

    let (rf, wf) = match pipealloc() {
        Some(pair) => pair,
        None => return u64::MAX,
    };

    let fd0 = match fdalloc(rf) {
        Some(fd) => fd,
        None => {
            unsafe {
                fileclose(&mut *rf);
                fileclose(&mut *wf);
            }
            return u64::MAX;
        }
    };
    let fd1 = match fdalloc(wf) {
        Some(fd) => fd,
        None => {
            p.ofile[fd0] = None;
            unsafe {
                fileclose(&mut *rf);
                fileclose(&mut *wf);
            }
            return u64::MAX;
        }
    };

    let fds: [u32; 2] = [fd0 as u32, fd1 as u32];
    if copyout(
        p.pagetable.as_mut().unwrap(),
        fdarray,
        fds.as_ptr() as *const u8,
        mem::size_of::<[u32; 2]>(),
    ) < 0
    {
        p.ofile[fd0] = None;
        p.ofile[fd1] = None;
        unsafe {
            fileclose(&mut *rf);
            fileclose(&mut *wf);
        }
        return u64::MAX;
    }

    0
}
