//! Build runners for the integrad CI daemon.
//!
//! Provides the runner that fetches a job's source with git, reads its
//! `deploy.kdl` and runs the build, deploy and post steps on the host.

mod fs;
mod git;
mod process;
pub mod shell;

pub use integrad_core::runner::{BuildRunner, JobLogger, LogSink};
pub use shell::ShellRunner;
