//! Fatal-error collaborator.
//!
//! The scheduler treats a broken internal invariant as unrecoverable: it
//! reports the violation through [`raise`], which invokes the single
//! registered handler and never returns. Boards install their own handler
//! (reset, halt, dump state) with [`set_handler`]; the default one logs and
//! panics.

use core::cell::Cell;

use critical_section::Mutex;
use thiserror::Error;

/// Handler invoked for fatal internal errors
pub type FatalHandler = fn(&FatalError) -> !;

/// Internal invariant violations detected by the scheduler
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    /// A thread was inserted into a queue while already linked into one
    #[error("thread slot {thread} is already linked into a queue")]
    DoubleEnqueue { thread: u16 },
    /// A queue link referred to a free or reused thread slot
    #[error("queue link refers to dead thread slot {thread}")]
    StaleLink { thread: u16 },
    /// The ready queue set was empty when a thread had to be selected
    #[error("no runnable thread (idle thread missing)")]
    NoRunnableThread,
    /// The ready bitmap and the per-level queues disagree
    #[error("ready bitmap out of sync at level {level}")]
    ReadyBitmapMismatch { level: u8 },
    /// A mutex and its owner disagree about ownership
    #[error("ownership records of object slot {object} are corrupted")]
    OwnershipCorrupted { object: u16 },
}

fn default_handler(error: &FatalError) -> ! {
    log::error!("fatal kernel error: {}", error);
    panic!("fatal kernel error: {error}")
}

static HANDLER: Mutex<Cell<FatalHandler>> = Mutex::new(Cell::new(default_handler));

/// Install the board's fatal-error handler
pub fn set_handler(handler: FatalHandler) {
    critical_section::with(|cs| HANDLER.borrow(cs).set(handler));
}

/// Restore the default (log and panic) handler
pub fn reset_handler() {
    set_handler(default_handler);
}

/// Report a fatal internal error. Does not return.
pub fn raise(error: FatalError) -> ! {
    let handler = critical_section::with(|cs| HANDLER.borrow(cs).get());
    handler(&error)
}
