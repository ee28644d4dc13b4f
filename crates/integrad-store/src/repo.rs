//! Typed repositories over the store.

pub mod jobs;
pub mod logs;

pub use jobs::JobRepo;
pub use logs::LogRepo;
