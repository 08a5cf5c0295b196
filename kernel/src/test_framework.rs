// Test harness for the no_std kernel binary. cargo test cannot link libtest
// against a freestanding target, so tests run as a special boot mode instead:
// kmain calls test_main() (generated by #[reexport_test_harness_main]) on
// hart 0 and then shuts qemu down through the sifive_test finisher device,
// reporting pass/fail as the process exit code.

use core::panic::PanicInfo;
use crate::memlayout::VIRT_TEST;
use crate::printf;

#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x5555,
    Failed = 0x3333,
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        printf!("{}...\t", core::any::type_name::<T>());
        self();
        printf!("[ok]\n");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    printf!("running {} tests\n", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    printf!("[failed]\n");
    printf!("{}\n", info);
    exit_qemu(QemuExitCode::Failed);
}

// Write the pass/fail code to the finisher device and let qemu tear the
// machine down. Never returns.
pub fn exit_qemu(code: QemuExitCode) -> ! {
    unsafe {
        core::ptr::write_volatile(VIRT_TEST as *mut u32, code as u32);
    }
    loop {
        unsafe { core::arch::asm!("wfi") }
    }
}
