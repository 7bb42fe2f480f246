//! Reference CPU backend for the samediff graph engine.

pub mod cpu;

pub use cpu::CpuExecutor;

use std::sync::Arc;

/// Registers the CPU executor under the name `"cpu"` and returns a handle.
pub fn register_cpu_executor() -> Arc<CpuExecutor> {
    let executor = Arc::new(CpuExecutor::new());
    samediff::exec::register_executor("cpu", executor.clone());
    log::debug!("registered cpu executor");
    executor
}
