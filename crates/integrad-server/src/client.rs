//! Client side of the command protocol.

use futures::{SinkExt, StreamExt};
use integrad_core::protocol::{
    ClientCommand, Command, DeployResponse, ErrorResponse, LogsResponse, StatusResponse,
};
use integrad_core::{Job, JobArgs, JobNumber};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("connection error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed without a response")]
    EmptyResponse,

    /// The daemon answered with an error.
    #[error("{0}")]
    Server(String),
}

/// Talks to a running daemon over its unix socket. One connection per call.
#[derive(Debug, Clone)]
pub struct Client {
    socket: PathBuf,
}

impl Client {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub async fn deploy(&self, args: JobArgs) -> Result<Job, ClientError> {
        let response: DeployResponse = self.send(Command::Deploy(args)).await?;
        Ok(response.job)
    }

    pub async fn restart(&self, job: JobNumber) -> Result<Job, ClientError> {
        let response: DeployResponse = self.send(Command::Restart { job }).await?;
        Ok(response.job)
    }

    pub async fn status(&self, job: Option<JobNumber>) -> Result<Vec<Job>, ClientError> {
        let response: StatusResponse = self.send(Command::Status { job }).await?;
        Ok(response.statuses)
    }

    pub async fn logs(&self, job: JobNumber) -> Result<LogsResponse, ClientError> {
        self.send(Command::Logs { job }).await
    }

    /// Ask the daemon to stop. Returns once it has drained.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.call(Command::Shutdown).await.map(|_| ())
    }

    /// Send a command and decode the typed response.
    pub async fn send<T: DeserializeOwned>(&self, command: Command) -> Result<T, ClientError> {
        let line = self.call(command).await?;
        decode_response(&line)
    }

    async fn call(&self, command: Command) -> Result<String, ClientError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|source| ClientError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        let mut conn = Framed::new(stream, LinesCodec::new());

        let request = serde_json::to_string(&ClientCommand::from(command))?;
        conn.send(request).await?;

        match conn.next().await {
            Some(line) => Ok(line?),
            None => Err(ClientError::EmptyResponse),
        }
    }
}

/// Decode a response line, turning `{"Error": ...}` into [`ClientError::Server`].
pub fn decode_response<T: DeserializeOwned>(line: &str) -> Result<T, ClientError> {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(line) {
        return Err(ClientError::Server(err.error));
    }
    Ok(serde_json::from_str(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrad_core::JobStatus;

    #[test]
    fn test_decode_error_response() {
        let result = decode_response::<StatusResponse>(r#"{"Error":"not found: job #3"}"#);
        match result {
            Err(ClientError::Server(msg)) => assert_eq!(msg, "not found: job #3"),
            other => panic!("Expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_status_response() {
        let line = r#"{"Statuses":[{"Number":2,"Args":{"git":"main"},"Status":3,"Updated":"2024-05-01T10:00:00Z"}]}"#;
        let response: StatusResponse = decode_response(line).unwrap();
        assert_eq!(response.statuses.len(), 1);
        assert_eq!(response.statuses[0].number, JobNumber::new(2));
        assert_eq!(response.statuses[0].status, JobStatus::Failed);

        assert!(matches!(
            decode_response::<StatusResponse>("not json"),
            Err(ClientError::Decode(_))
        ));
    }
}
