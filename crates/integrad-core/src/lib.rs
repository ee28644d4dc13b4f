//! Core domain types and traits for the integrad CI daemon.
//!
//! This crate contains:
//! - Job identifiers, records and status transitions
//! - The line-delimited JSON command protocol
//! - The build runner trait and the job logger handed to it

pub mod error;
pub mod id;
pub mod job;
pub mod protocol;
pub mod runner;

pub use error::{Error, Result};
pub use id::JobNumber;
pub use job::{Job, JobArgs, JobStatus};
