//! Kernel configuration.
//!
//! Table capacities are compile-time (const generics on the scheduler); the
//! values here are the tunables that may differ between boards using the
//! same build.

use crate::error::{KResult, KernelError};
use crate::time::Tick;
use crate::trace::TraceHook;

/// Configuration for the kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Ticks a round-robin thread may run before it is rotated behind its
    /// same-priority peers
    pub round_robin_quantum: u32,
    /// Maximum length of a priority inheritance chain
    pub max_inheritance_depth: u8,
    /// Frequency of the tick interrupt, used to convert durations
    pub tick_rate_hz: u32,
    /// Value of the tick clock at startup
    pub initial_tick: Tick,
    /// Stack region handed to the port for the idle thread
    pub idle_stack: (usize, usize),
    /// Binary trace hook
    pub trace_hook: Option<TraceHook>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            round_robin_quantum: 10,
            max_inheritance_depth: 8,
            tick_rate_hz: 1000,
            initial_tick: Tick::ZERO,
            idle_stack: (0, 0),
            trace_hook: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Converts milliseconds to ticks at the configured tick rate, rounding up.
    pub fn millis_to_ticks(&self, millis: u32) -> u32 {
        let ticks = (millis as u64 * self.tick_rate_hz as u64).div_ceil(1000);
        ticks.min(u32::MAX as u64) as u32
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the round-robin quantum in ticks.
    pub fn round_robin_quantum(mut self, ticks: u32) -> Self {
        self.config.round_robin_quantum = ticks;
        self
    }

    /// Sets the maximum priority inheritance chain depth.
    pub fn max_inheritance_depth(mut self, depth: u8) -> Self {
        self.config.max_inheritance_depth = depth;
        self
    }

    /// Sets the tick interrupt frequency.
    pub fn tick_rate_hz(mut self, hz: u32) -> Self {
        self.config.tick_rate_hz = hz;
        self
    }

    /// Sets the tick clock value at startup.
    pub fn initial_tick(mut self, tick: Tick) -> Self {
        self.config.initial_tick = tick;
        self
    }

    /// Sets the idle thread's stack region (base address, size in bytes).
    pub fn idle_stack(mut self, base: usize, size: usize) -> Self {
        self.config.idle_stack = (base, size);
        self
    }

    /// Sets the trace hook for scheduler records.
    pub fn trace_hook(mut self, hook: TraceHook) -> Self {
        self.config.trace_hook = Some(hook);
        self
    }

    /// Builds the configuration.
    ///
    /// Fails with [`KernelError::InvalidArgument`] when the quantum, the
    /// inheritance depth or the tick rate is zero.
    pub fn build(self) -> KResult<KernelConfig> {
        let config = self.config;
        if config.round_robin_quantum == 0
            || config.max_inheritance_depth == 0
            || config.tick_rate_hz == 0
        {
            return Err(KernelError::InvalidArgument);
        }
        Ok(config)
    }
}
