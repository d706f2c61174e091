//! Convergence waiting and cancellation.
//!
//! This module provides:
//! - The convergence monitor polling a release until it deploys
//! - An injectable clock
//! - The shutdown token observed by long waits

mod clock;
mod monitor;
mod shutdown;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, TokioClock};
pub use monitor::ConvergenceMonitor;
pub use shutdown::{wait_for_signal, Shutdown, ShutdownTrigger};
