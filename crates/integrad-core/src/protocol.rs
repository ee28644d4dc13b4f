//! The command protocol spoken over the daemon socket.
//!
//! One request per connection: the client writes a single JSON line
//! `{"Command": <verb>, "Args": {...}}` and the server answers with a single
//! JSON line before closing. `shutdown` is answered with an empty line.

use serde::{Deserialize, Serialize};

use crate::{Error, Job, JobArgs, JobNumber, Result};

/// A command exactly as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientCommand {
    pub command: String,
    #[serde(default)]
    pub args: JobArgs,
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Queue a new job with the given arguments.
    Deploy(JobArgs),
    /// Queue a new job with the arguments of an existing one.
    Restart { job: JobNumber },
    /// One job, or every job newest first.
    Status { job: Option<JobNumber> },
    /// A job and its captured log records.
    Logs { job: JobNumber },
    /// Stop accepting commands and drain.
    Shutdown,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Deploy(_) => "deploy",
            Command::Restart { .. } => "restart",
            Command::Status { .. } => "status",
            Command::Logs { .. } => "logs",
            Command::Shutdown => "shutdown",
        }
    }
}

impl TryFrom<ClientCommand> for Command {
    type Error = Error;

    fn try_from(raw: ClientCommand) -> Result<Self> {
        match raw.command.as_str() {
            "deploy" => Ok(Command::Deploy(raw.args)),
            "restart" => Ok(Command::Restart {
                job: required_job(&raw.args)?,
            }),
            "status" => Ok(Command::Status {
                job: raw.args.get("job").map(|j| j.parse()).transpose()?,
            }),
            "logs" => Ok(Command::Logs {
                job: required_job(&raw.args)?,
            }),
            "shutdown" => Ok(Command::Shutdown),
            other => Err(Error::InvalidInput(format!("unknown command: {other}"))),
        }
    }
}

impl From<Command> for ClientCommand {
    fn from(command: Command) -> Self {
        let verb = command.verb().to_string();
        let args = match command {
            Command::Deploy(args) => args,
            Command::Restart { job } | Command::Logs { job } => job_args(job),
            Command::Status { job: Some(job) } => job_args(job),
            Command::Status { job: None } | Command::Shutdown => JobArgs::new(),
        };
        ClientCommand {
            command: verb,
            args,
        }
    }
}

fn required_job(args: &JobArgs) -> Result<JobNumber> {
    args.get("job")
        .ok_or_else(|| Error::InvalidInput("missing argument: job".to_string()))?
        .parse()
}

fn job_args(job: JobNumber) -> JobArgs {
    JobArgs::from([("job".to_string(), job.to_string())])
}

/// Reply to `deploy` and `restart`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeployResponse {
    pub job: Job,
}

/// Reply to `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusResponse {
    pub statuses: Vec<Job>,
}

/// Reply to `logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogsResponse {
    pub job: Job,
    pub logs: Vec<String>,
}

/// Reply to any command that could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub error: String,
}
