//! Integration tests for the shared kernel types

use kestrel_core::fatal::{self, FatalError};
use kestrel_core::{priority, KernelConfig, KernelError, Priority, Tick, TickClock, Timeout};

#[test]
fn priority_macro_and_levels() {
    const HIGH: Priority = priority!(7);
    assert_eq!(HIGH.raw(), 7);
    assert_eq!(HIGH.level(), 7);
    assert!(HIGH.is_valid_for(8));
    assert!(!HIGH.is_valid_for(7));
    assert_eq!(HIGH.to_string(), "Priority(7)");
}

#[test]
fn priorities_sort_most_urgent_last() {
    let mut levels = [priority!(3), Priority::IDLE, priority!(9), Priority::MIN];
    levels.sort();
    assert_eq!(levels, [Priority::IDLE, Priority::MIN, priority!(3), priority!(9)]);
}

#[test]
fn timeout_from_configured_tick_rate() {
    let config = KernelConfig::builder()
        .tick_rate_hz(250)
        .initial_tick(Tick::new(u64::MAX))
        .build()
        .expect("valid configuration");

    let mut clock = TickClock::new(config.initial_tick);
    let timeout = Timeout::After(config.millis_to_ticks(8));
    let deadline = timeout.deadline(clock.now()).expect("finite timeout");
    assert_eq!(deadline, Tick::new(1));

    assert!(!clock.advance().has_reached(deadline));
    assert!(clock.advance().has_reached(deadline));
}

#[test]
fn error_messages() {
    assert_eq!(KernelError::NotOwner.to_string(), "calling thread does not own the mutex");
    assert_eq!(KernelError::Timeout.to_string(), "operation timed out");
    assert_eq!(
        FatalError::ReadyBitmapMismatch { level: 4 }.to_string(),
        "ready bitmap out of sync at level 4"
    );
}

fn board_handler(error: &FatalError) -> ! {
    panic!("board halted: {error}")
}

#[test]
fn installed_fatal_handler_is_invoked() {
    fatal::set_handler(board_handler);
    let result = std::panic::catch_unwind(|| fatal::raise(FatalError::StaleLink { thread: 2 }));
    fatal::reset_handler();

    let payload = result.expect_err("raise never returns");
    let message = payload
        .downcast_ref::<String>()
        .expect("formatted panic message");
    assert_eq!(message, "board halted: queue link refers to dead thread slot 2");
}
