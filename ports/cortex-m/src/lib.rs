//! Kestrel port for ARM Cortex-M.
//!
//! - context switches are pended with PendSV, the lowest-priority system
//!   exception, so they run after every other handler has returned
//! - SysTick drives the kernel tick through [`Kernel::tick_isr`]
//! - the idle loop sleeps with `wfi`
//!
//! The PendSV handler itself is board code (it must save and restore
//! `r4`-`r11` in assembly). Its shape is:
//!
//! ```text
//! PendSV:
//!     mrs   r0, psp
//!     stmdb r0!, {r4-r11}
//!     bl    kestrel_switch        @ KERNEL.switch_context(ContextPtr(r0))
//!     ldmia r0!, {r4-r11}
//!     msr   psp, r0
//!     bx    lr
//! ```
//!
//! Interrupt handlers finish with [`Kernel::on_interrupt_return`], which
//! applies deferred work and pends PendSV when a switch is needed.
//!
//! [`Kernel::tick_isr`]: kestrel_sched::Kernel::tick_isr
//! [`Kernel::on_interrupt_return`]: kestrel_sched::Kernel::on_interrupt_return

#![cfg_attr(not(test), no_std)]

use core::cell::Cell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use critical_section::Mutex;
use kestrel_sched::{ContextPtr, KResult, KernelError, Port, StackRegion, ThreadEntry};

/// Words in the initial frame: eight saved by software, eight by hardware.
pub const FRAME_WORDS: usize = 16;

/// Thumb state bit in xPSR
const XPSR_THUMB: u32 = 1 << 24;

/// Called with a thread's return value when its entry function returns.
static EXIT_HOOK: Mutex<Cell<Option<fn(usize)>>> = Mutex::new(Cell::new(None));

/// Cortex-M implementation of [`Port`].
pub struct CortexM {
    _private: (),
}

impl CortexM {
    /// Creates the port. `on_exit` receives the value returned by a
    /// thread's entry function; it normally calls `Kernel::exit`.
    ///
    /// # Safety
    ///
    /// Every [`StackRegion`] later handed to [`Port::init_stack`] must be
    /// writable RAM owned exclusively by the thread being created.
    pub unsafe fn new(on_exit: fn(usize)) -> Self {
        critical_section::with(|cs| EXIT_HOOK.borrow(cs).set(Some(on_exit)));
        Self { _private: () }
    }
}

impl Port for CortexM {
    fn pend_context_switch(&self) {
        SCB::set_pendsv();
    }

    fn init_stack(&self, stack: StackRegion, entry: ThreadEntry) -> ContextPtr {
        let Some(sp) = frame_base(stack) else {
            log::warn!("stack at {:#x} too small for the initial frame", stack.base);
            return ContextPtr::NULL;
        };
        let frame = initial_frame(entry, thread_return as usize);
        for (i, word) in frame.iter().enumerate() {
            // SAFETY: `frame_base` keeps the frame inside the region, and the
            // caller of `CortexM::new` guarantees the region is owned RAM.
            unsafe { core::ptr::write_volatile((sp as *mut u32).add(i), *word) };
        }
        ContextPtr(sp)
    }

    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }
}

/// Lowest address of the initial frame: the 8-byte aligned top of `stack`
/// minus the frame, or `None` if it does not fit.
pub fn frame_base(stack: StackRegion) -> Option<usize> {
    let top = stack.base.checked_add(stack.size)? & !7;
    let sp = top.checked_sub(FRAME_WORDS * 4)?;
    (sp >= stack.base).then_some(sp)
}

/// Initial register image, lowest address first: `r4`-`r11`, then the
/// exception frame `r0`-`r3`, `r12`, `lr`, `pc`, `xpsr`.
pub fn initial_frame(entry: ThreadEntry, exit: usize) -> [u32; FRAME_WORDS] {
    let mut frame = [0u32; FRAME_WORDS];
    frame[8] = entry.arg as u32;
    frame[13] = exit as u32 | 1;
    frame[14] = entry.function as usize as u32 & !1;
    frame[15] = XPSR_THUMB;
    frame
}

/// Return address of every thread: forwards the result to the exit hook and
/// sleeps until the kernel switches away.
extern "C" fn thread_return(code: usize) -> ! {
    let hook = critical_section::with(|cs| EXIT_HOOK.borrow(cs).get());
    if let Some(hook) = hook {
        hook(code);
    }
    loop {
        cortex_m::asm::wfi();
    }
}

/// Programs SysTick to interrupt `tick_rate_hz` times per second from the
/// core clock.
pub fn configure_systick(syst: &mut SYST, core_clock_hz: u32, tick_rate_hz: u32) -> KResult<()> {
    if tick_rate_hz == 0 {
        return Err(KernelError::InvalidArgument);
    }
    let reload = (core_clock_hz / tick_rate_hz)
        .checked_sub(1)
        .filter(|&r| r > 0 && r <= 0x00FF_FFFF)
        .ok_or(KernelError::InvalidArgument)?;

    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(reload);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();
    Ok(())
}
