//! Job scheduling for the integrad CI daemon.
//!
//! Dispatches durable jobs to a pool of workers in number order and
//! persists their build output in batches.

pub mod fault;
pub mod log_writer;
pub mod queue;
pub mod worker;

pub use fault::Fault;
pub use log_writer::{LogInput, LogWriter, LogWriterSettings};
pub use queue::{DispatchedJob, JobOutput, JobQueue};
pub use worker::{WorkerPool, WorkerSettings};
