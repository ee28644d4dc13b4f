//! Job records and status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, JobNumber};

/// Free-form job parameters such as `source` and `git`.
pub type JobArgs = BTreeMap<String, String>;

/// Lifecycle of a job: `Queued -> Active -> {Succeeded | Failed}`.
///
/// Stored and sent as its discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum JobStatus {
    /// Waiting for the dispatch cursor to reach it.
    Queued = 0,
    /// Handed to a worker.
    Active = 1,
    /// The build runner returned without error.
    Succeeded = 2,
    /// The build runner returned an error.
    Failed = 3,
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobStatus::Queued),
            1 => Ok(JobStatus::Active),
            2 => Ok(JobStatus::Succeeded),
            3 => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Active => "Active",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Active)
                | (JobStatus::Active, JobStatus::Succeeded)
                | (JobStatus::Active, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A unit of deploy work as persisted in the job bucket and sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    pub number: JobNumber,
    pub args: JobArgs,
    pub status: JobStatus,
    /// Time of the last status transition.
    pub updated: DateTime<Utc>,
}

impl Job {
    /// A freshly allocated job.
    pub fn queued(number: JobNumber, args: JobArgs) -> Self {
        Self {
            number,
            args,
            status: JobStatus::Queued,
            updated: Utc::now(),
        }
    }

    /// Move to `status`, stamping the transition time.
    /// Returns false and leaves the job untouched if the move would go backwards.
    pub fn transition(&mut self, status: JobStatus) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        self.updated = Utc::now();
        true
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}
