//! Hodei worker agent.
//!
//! Connects to the orchestrator over a DEALER socket, performs the
//! Register/Registered handshake, heartbeats on the agreed interval, keeps a
//! local content-addressed artifact cache, and runs one job at a time
//! through the shell runner.

pub mod cancel;
pub mod runner;
pub mod worker;

pub use cancel::{CancelRequest, CancellationToken};
pub use worker::{Worker, WorkerConfig};
