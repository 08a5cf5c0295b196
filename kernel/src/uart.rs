// low-level driver routines for 16550a UART.

use crate::console::CONSOLE_INSTANCE;
use crate::proc::{sleep, wakeup};
use crate::spinlock::{pop_off, push_off, Spinlock};

// the UART control registers are memory-mapped
// at address UART0. this macro returns the
// address of one of the registers.
#[macro_export]
macro_rules! Reg {
    ( $reg:expr ) => {
        $crate::memlayout::UART0 + $reg
    };
}

// the UART control registers.
// some have different meanings for
// read vs write.
// see http://byterunner.com/16550.html
pub const RHR: usize = 0; // receive holding register (for input bytes)
pub const THR: usize = 0; // transmit holding register (for output bytes)
pub const IER: usize = 1; // interrupt enable register
pub const IER_RX_ENABLE: u8 = 1 << 0;
pub const IER_TX_ENABLE: u8 = 1 << 1;
pub const FCR: usize = 2; // FIFO control register
pub const FCR_FIFO_ENABLE: u8 = 1 << 0;
pub const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
pub const LCR: usize = 3; // line control register
pub const LCR_EIGHT_BITS: u8 = 3 << 0;
pub const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
pub const LSR: usize = 5; // line status register
pub const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
pub const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

const UART_TX_BUF_SIZE: usize = 32;

#[macro_export]
macro_rules! ReadReg {
    ( $reg:expr ) => {
        ($crate::Reg!($reg) as *mut u8).read_volatile()
    };
}

#[macro_export]
macro_rules! WriteReg {
    ( $reg:expr, $val:expr ) => {
        ($crate::Reg!($reg) as *mut u8).write_volatile($val)
    };
}

pub struct Uart {
    tx_lock: Spinlock,
    tx_buf: [u8; UART_TX_BUF_SIZE],
    tx_w: u64, // write next to tx_buf[tx_w % UART_TX_BUF_SIZE]
    tx_r: u64, // read next from tx_buf[tx_r % UART_TX_BUF_SIZE]
}

pub static mut UART_INSTANCE: Uart = Uart::create();

impl Uart {
    const fn create() -> Self {
        Self {
            tx_lock: Spinlock::init_lock("uart"),
            tx_buf: [0; UART_TX_BUF_SIZE],
            tx_w: 0,
            tx_r: 0,
        }
    }

    pub fn init() {
        unsafe {
            // disable interrupts.
            WriteReg!(IER, 0x00);

            // special mode to set baud rate.
            WriteReg!(LCR, LCR_BAUD_LATCH);

            // LSB for baud rate of 38.4K.
            WriteReg!(0, 0x03);
            // MSB for baud rate of 38.4K.
            WriteReg!(1, 0x00);

            // leave set-baud mode, and set word length to 8 bits, no parity.
            WriteReg!(LCR, LCR_EIGHT_BITS);

            // reset and enable FIFOs.
            WriteReg!(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

            // enable transmit and receive interrupts.
            WriteReg!(IER, IER_TX_ENABLE | IER_RX_ENABLE);
        }
    }

    /// add a character to the output buffer and tell the
    /// UART to start sending if it isn't already.
    /// blocks if the output buffer is full.
    /// because it may block, it can't be called
    /// from interrupts; it's only suitable for use by write().
    pub fn putc(self: &mut Self, c: u8) {
        self.tx_lock.acquire();
        while self.tx_w == self.tx_r + UART_TX_BUF_SIZE as u64 {
            // buffer is full; wait for uartstart() to open up space.
            sleep(&self.tx_r, &mut self.tx_lock);
        }
        self.tx_buf[self.tx_w as usize % UART_TX_BUF_SIZE] = c;
        self.tx_w += 1;
        self.start();
        self.tx_lock.release();
    }

    /// alternate version of putc() that doesn't use interrupts,
    /// for use by kernel printf() and to echo characters.
    /// it spins waiting for the uart's output register to be empty.
    pub fn putc_sync(self: &mut Self, c: u8) {
        push_off();
        unsafe {
            while (ReadReg!(LSR) & LSR_TX_IDLE) == 0 {}
            WriteReg!(THR, c);
        }
        pop_off();
    }

    /// if the UART is idle, and a character is waiting in the
    /// transmit buffer, send it. caller must hold tx_lock.
    fn start(self: &mut Self) {
        loop {
            if self.tx_w == self.tx_r {
                // transmit buffer is empty.
                return;
            }

            unsafe {
                if (ReadReg!(LSR) & LSR_TX_IDLE) == 0 {
                    // UART transmit holding register is full; it will
                    // interrupt when it's ready for a new byte.
                    return;
                }
            }

            let c = self.tx_buf[self.tx_r as usize % UART_TX_BUF_SIZE];
            self.tx_r += 1;

            // a putc() call may be waiting for space in the buffer.
            wakeup(&self.tx_r);

            unsafe { WriteReg!(THR, c); }
        }
    }

    /// read one input character from the UART.
    /// return None if none is waiting.
    fn getc(self: &Self) -> Option<u8> {
        unsafe {
            if ReadReg!(LSR) & LSR_RX_READY != 0 {
                Some(ReadReg!(RHR))
            } else {
                None
            }
        }
    }

    /// handle a uart interrupt, raised because input has arrived,
    /// or the uart is ready for more output, or both.
    /// called from devintr().
    pub fn intr(self: &mut Self) {
        loop {
            match self.getc() {
                Some(c) => unsafe { CONSOLE_INSTANCE.consoleintr(c) },
                None => break,
            }
        }

        self.tx_lock.acquire();
        self.start();
        self.tx_lock.release();
    }
}
