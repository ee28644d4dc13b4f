//! Command handlers.
//!
//! Each handler returns the typed response for its verb; [`handle`] turns it
//! into the JSON line written back to the client.

use integrad_core::protocol::{Command, DeployResponse, LogsResponse, StatusResponse};
use integrad_core::{JobArgs, JobNumber};
use integrad_store::Order;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::error::CommandError;

/// Run a command and encode its response. `shutdown` is handled by the server.
pub async fn handle(state: &AppState, command: Command) -> Result<String, CommandError> {
    match command {
        Command::Deploy(args) => encode(&deploy(state, args).await?),
        Command::Restart { job } => encode(&restart(state, job).await?),
        Command::Status { job } => encode(&status(state, job).await?),
        Command::Logs { job } => encode(&logs(state, job).await?),
        Command::Shutdown => Err(CommandError::Internal(
            "shutdown is handled by the server loop".to_string(),
        )),
    }
}

fn encode<T: Serialize>(response: &T) -> Result<String, CommandError> {
    serde_json::to_string(response).map_err(|e| CommandError::Internal(e.to_string()))
}

pub async fn deploy(state: &AppState, args: JobArgs) -> Result<DeployResponse, CommandError> {
    let job = state.queue.add_job(args).await?;
    Ok(DeployResponse { job })
}

/// Queue a new job with the arguments of an existing one.
pub async fn restart(state: &AppState, number: JobNumber) -> Result<DeployResponse, CommandError> {
    let previous = state.jobs.require(number).await?;
    let job = state.queue.add_job(previous.args).await?;
    info!(job = %job.number, restarted = %number, "Restarted job");
    Ok(DeployResponse { job })
}

/// One job, or every job newest first.
pub async fn status(
    state: &AppState,
    number: Option<JobNumber>,
) -> Result<StatusResponse, CommandError> {
    let statuses = match number {
        Some(number) => vec![state.jobs.require(number).await?],
        None => state.jobs.list(Order::Descending).await?,
    };
    Ok(StatusResponse { statuses })
}

pub async fn logs(state: &AppState, number: JobNumber) -> Result<LogsResponse, CommandError> {
    let job = state.jobs.require(number).await?;
    let logs = state.logs.read(number).await?;
    Ok(LogsResponse { job, logs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrad_core::JobStatus;
    use integrad_scheduler::{Fault, JobQueue};
    use integrad_store::{RetryPolicy, Store};
    use std::sync::Arc;

    async fn state() -> AppState {
        let store = Store::open_in_memory().await.unwrap();
        let queue = JobQueue::open(store.clone(), "jobs", RetryPolicy::default(), Fault::new())
            .await
            .unwrap();
        AppState::new(store, Arc::new(queue))
    }

    fn args(git: &str) -> JobArgs {
        JobArgs::from([
            ("source".to_string(), "/srv/app".to_string()),
            ("git".to_string(), git.to_string()),
        ])
    }

    #[tokio::test]
    async fn test_restart_copies_args_under_new_number() {
        let state = state().await;
        let first = deploy(&state, args("v1")).await.unwrap().job;
        deploy(&state, args("v2")).await.unwrap();

        let restarted = restart(&state, first.number).await.unwrap().job;
        assert_eq!(restarted.number, JobNumber::new(3));
        assert_eq!(restarted.args, first.args);
        assert_eq!(restarted.status, JobStatus::Queued);

        assert!(matches!(
            restart(&state, JobNumber::new(42)).await,
            Err(CommandError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_lists_newest_first() {
        let state = state().await;
        for git in ["a", "b", "c"] {
            deploy(&state, args(git)).await.unwrap();
        }

        let all = status(&state, None).await.unwrap().statuses;
        let numbers: Vec<u64> = all.iter().map(|j| j.number.get()).collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let one = status(&state, Some(JobNumber::new(2))).await.unwrap().statuses;
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].arg("git"), Some("b"));
    }

    #[tokio::test]
    async fn test_logs_of_job_without_output() {
        let state = state().await;
        let job = deploy(&state, args("main")).await.unwrap().job;

        let line = handle(&state, Command::Logs { job: job.number }).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["Job"]["Number"], 1);
        assert_eq!(value["Logs"], serde_json::json!([]));

        assert!(matches!(
            logs(&state, JobNumber::new(5)).await,
            Err(CommandError::NotFound(_))
        ));
    }
}
