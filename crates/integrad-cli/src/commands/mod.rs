//! CLI command implementations.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use integrad_config::DaemonConfig;
use integrad_core::{Job, JobArgs, JobNumber};
use integrad_executor::ShellRunner;
use integrad_server::{Client, Server};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn server(config: DaemonConfig) -> Result<()> {
    info!(
        socket = %config.socket.display(),
        database = %config.database.display(),
        workers = config.workers,
        "Starting integrad daemon"
    );
    let runner = ShellRunner::from_config(&config);
    Server::new(config, Arc::new(runner)).run().await?;
    info!("integrad daemon exited");
    Ok(())
}

pub async fn deploy(client: &Client, source: &Path, git: String) -> Result<()> {
    let source = std::path::absolute(source)?;
    let args = JobArgs::from([
        ("source".to_string(), source.display().to_string()),
        ("git".to_string(), git),
    ]);
    let job = client.deploy(args).await?;
    println!("Created job #{}.", job.number);
    Ok(())
}

pub async fn restart(client: &Client, job: JobNumber) -> Result<()> {
    let job = client.restart(job).await?;
    println!("Created job #{}.", job.number);
    Ok(())
}

pub async fn status(client: &Client, job: Option<JobNumber>) -> Result<()> {
    let jobs = client.status(job).await?;
    match (job, jobs.first()) {
        (Some(_), Some(job)) => println!("{}", status_line(job)),
        _ => print!("{}", status_table(&jobs)),
    }
    Ok(())
}

pub async fn logs(client: &Client, job: JobNumber) -> Result<()> {
    let response = client.logs(job).await?;
    print!("Logs for Job #{}\n\n{}", response.job.number, response.logs.concat());
    Ok(())
}

pub async fn shutdown(client: &Client) -> Result<()> {
    client.shutdown().await?;
    println!("Daemon stopped.");
    Ok(())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %I:%M:%S")
        .to_string()
}

fn status_line(job: &Job) -> String {
    format!(
        "Job status for Job #{}: {} as of {}",
        job.number,
        job.status,
        format_time(job.updated)
    )
}

fn status_table(jobs: &[Job]) -> String {
    let mut out = format!("{:>6} {:>10} {:>20}\n", "JOB", "STATUS", "UPDATED");
    for job in jobs {
        out.push_str(&format!(
            "{:>6} {:>10} {:>20}\n",
            format!("#{}", job.number),
            job.status.name(),
            format_time(job.updated)
        ));
    }
    out
}
