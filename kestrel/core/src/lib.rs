#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

//! # Kestrel Core
//!
//! Architecture-independent building blocks shared by the Kestrel scheduler
//! and the ports that drive it:
//!
//! - [`priority`] - thread priority levels
//! - [`time`] - the tick clock, deadlines and timeouts
//! - [`error`] - the kernel error taxonomy returned by every entry point
//! - [`config`] - runtime kernel configuration with a builder
//! - [`fatal`] - the single fatal-error collaborator for invariant violations
//! - [`trace`] - binary trace record identifiers and the trace hook type

pub mod config;
pub mod error;
pub mod fatal;
pub mod priority;
pub mod time;
pub mod trace;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use error::{KResult, KernelError};
pub use fatal::FatalError;
pub use priority::Priority;
pub use time::{Tick, TickClock, Timeout};
pub use trace::TraceHook;

/// Kestrel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
