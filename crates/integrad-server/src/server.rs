//! The daemon: unix socket listener, command loop and orderly shutdown.

use futures::{SinkExt, StreamExt};
use integrad_config::DaemonConfig;
use integrad_core::protocol::{ClientCommand, Command};
use integrad_core::runner::BuildRunner;
use integrad_scheduler::{Fault, JobQueue, LogWriterSettings, WorkerPool, WorkerSettings};
use integrad_store::{LogRepo, Store};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CommandError, ServerError};
use crate::handlers;
use crate::shutdown::install_shutdown_handler;
use crate::state::{AppState, JOB_BUCKET, LOG_BUCKET};

type Connection = Framed<UnixStream, LinesCodec>;

pub struct Server {
    config: DaemonConfig,
    runner: Arc<dyn BuildRunner>,
}

impl Server {
    pub fn new(config: DaemonConfig, runner: Arc<dyn BuildRunner>) -> Self {
        Self { config, runner }
    }

    /// Serve until a `shutdown` command, SIGINT/SIGTERM or a fatal fault.
    pub async fn run(self) -> Result<(), ServerError> {
        let signals = install_shutdown_handler()?;
        self.run_until(signals).await
    }

    /// Serve until a `shutdown` command, `stop` is cancelled or a fatal fault.
    ///
    /// Every exit path drains: accepting stops, the queued backlog runs and
    /// every result and log is stored before this returns. A fault makes
    /// it return an error once drained.
    pub async fn run_until(self, stop: CancellationToken) -> Result<(), ServerError> {
        let socket = self.config.socket.clone();
        let listener = bind_socket(&socket).await?;

        let result = self.serve(listener, stop).await;
        if let Err(err) = tokio::fs::remove_file(&socket).await {
            warn!(socket = %socket.display(), error = %err, "Failed to remove socket");
        }
        result
    }

    async fn serve(self, listener: UnixListener, stop: CancellationToken) -> Result<(), ServerError> {
        let config = &self.config;
        let store = Store::open(&config.database).await?;
        let fault = Fault::new();
        let retry = config.retry_policy();

        let queue =
            Arc::new(JobQueue::open(store.clone(), JOB_BUCKET, retry, fault.clone()).await?);
        let settings = WorkerSettings {
            log: LogWriterSettings {
                flush_interval: config.flush_interval,
                capacity: config.log_buffer,
            },
            retry,
        };
        let pool = WorkerPool::start(
            config.workers,
            queue.clone(),
            LogRepo::new(store.clone(), LOG_BUCKET),
            self.runner.clone(),
            settings,
            fault.clone(),
        );
        let state = AppState::new(store.clone(), queue.clone());

        let (conn_tx, mut conn_rx) = mpsc::channel(16);
        let accept = tokio::spawn(accept_loop(listener, conn_tx));
        info!(socket = %config.socket.display(), "Listening for commands");

        // Connection of a `shutdown` command, answered once drained.
        let mut pending = None;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    info!("Stop requested");
                    break;
                }
                _ = fault.raised() => break,
                stream = conn_rx.recv() => {
                    let Some(stream) = stream else {
                        warn!("Accept loop stopped");
                        break;
                    };
                    let conn = Framed::new(
                        stream,
                        LinesCodec::new_with_max_length(config.max_command_bytes),
                    );
                    if let Some(conn) = handle_connection(&state, conn, &stop).await {
                        pending = Some(conn);
                        break;
                    }
                }
            }
        }

        info!("Shutting down");
        accept.abort();
        drop(conn_rx);
        queue.close().await;
        pool.join().await;
        store.close().await;

        if let Some(mut conn) = pending {
            if let Err(err) = conn.send(String::new()).await {
                warn!(error = %err, "Failed to acknowledge shutdown");
            }
        }

        match fault.reason() {
            Some(reason) => {
                error!(reason, "Stopped after fatal fault");
                Err(ServerError::Fault(reason.to_string()))
            }
            None => {
                info!("Server stopped");
                Ok(())
            }
        }
    }
}

/// Refuse to start over a live daemon, clear a stale socket file and bind.
async fn bind_socket(path: &Path) -> Result<UnixListener, ServerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::try_exists(path).await? {
        if UnixStream::connect(path).await.is_ok() {
            return Err(ServerError::AlreadyRunning(path.to_path_buf()));
        }
        warn!(socket = %path.display(), "Removing stale socket");
        tokio::fs::remove_file(path).await?;
    }

    let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666)).await?;
    Ok(listener)
}

async fn accept_loop(listener: UnixListener, conns: mpsc::Sender<UnixStream>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                if conns.send(stream).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Read one command, answer it and close. A `shutdown` command hands its
/// connection back unanswered.
async fn handle_connection(
    state: &AppState,
    mut conn: Connection,
    stop: &CancellationToken,
) -> Option<Connection> {
    let read = tokio::select! {
        biased;
        _ = stop.cancelled() => return None,
        read = conn.next() => read,
    };

    let line = match read {
        Some(Ok(line)) => line,
        Some(Err(err)) => {
            warn!(error = %err, "Failed to read command");
            let err = CommandError::BadRequest(format!("unreadable command: {err}"));
            respond(&mut conn, err.to_line()).await;
            return None;
        }
        None => {
            debug!("Connection closed without a command");
            return None;
        }
    };

    let command = serde_json::from_str::<ClientCommand>(&line)
        .map_err(CommandError::from)
        .and_then(|raw| Command::try_from(raw).map_err(CommandError::from));

    let response = match command {
        Ok(Command::Shutdown) => {
            info!("Shutdown requested by client");
            return Some(conn);
        }
        Ok(command) => {
            info!(command = command.verb(), "Handling command");
            handlers::handle(state, command).await
        }
        Err(err) => Err(err),
    };

    let line = response.unwrap_or_else(|err| {
        warn!(error = %err, "Command failed");
        err.to_line()
    });
    respond(&mut conn, line).await;
    None
}

async fn respond(conn: &mut Connection, line: String) {
    if let Err(err) = conn.send(line).await {
        warn!(error = %err, "Failed to send response");
    }
}
