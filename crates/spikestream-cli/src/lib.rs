//! SpikeStream CLI crate
//!
//! Commands (see [commands]):
//! - run: load a JSON network store, spawn one worker per group, step it and
//!   report firing counts; optionally force firings, inject noise and commit
//!   learned weights.
//! - inspect: describe groups, connection groups and global parameters, and
//!   optionally verify that every group loads.
//! - snapshot: export, import and show weight snapshots (VWGT or JSON).
//! - completions: shell completion scripts.
//!
//! The binary (src/main.rs) wires up logging and argument parsing and calls
//! [`SpikestreamCli::execute`]. The command modules are exposed as a library
//! so they can be driven from tests without spawning a process.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::SpikestreamCli;
