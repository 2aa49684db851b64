//! Side-effecting support: configuration, run artifacts, child processes.

pub mod config;
pub mod process;
pub mod run_log;
