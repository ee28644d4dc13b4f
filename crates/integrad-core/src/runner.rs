//! Build runner trait and the job logger handed to it.
//!
//! Runners perform the actual work of a job (fetching source, running build
//! and post steps, moving artifacts). Everything they report goes through a
//! [`JobLogger`], which feeds the job's persisted log.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{Job, Result};

/// Destination for raw log chunks produced while a job runs.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Append one chunk. May wait for buffer space, never for storage.
    async fn write(&self, chunk: String);
}

/// Timestamped line logger over a [`LogSink`].
#[derive(Clone)]
pub struct JobLogger {
    sink: Arc<dyn LogSink>,
}

impl JobLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Write one line prefixed with the local time, e.g. `2024/05/01 13:37:00 Fetch successful.`
    pub async fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let stamp = chrono::Local::now().format("%Y/%m/%d %H:%M:%S");
        let mut line = format!("{stamp} {message}");
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.sink.write(line).await;
    }

    /// Write a chunk verbatim.
    pub async fn write(&self, chunk: impl Into<String>) {
        self.sink.write(chunk.into()).await;
    }
}

/// Trait for build runners.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run a job to completion. An error marks the job failed.
    async fn run(&self, job: &Job, logger: &JobLogger) -> Result<()>;
}

/// Indent every line of `text` by `prefix`.
pub fn indent(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            out.push_str(line);
        } else {
            out.push_str(prefix);
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl LogSink for Collect {
        async fn write(&self, chunk: String) {
            self.0.lock().unwrap().push(chunk);
        }
    }

    #[tokio::test]
    async fn test_logger_stamps_lines() {
        let sink = Arc::new(Collect::default());
        let logger = JobLogger::new(sink.clone());

        logger.log("Fetch successful.").await;
        logger.write("raw").await;

        let chunks = sink.0.lock().unwrap().clone();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with(" Fetch successful.\n"));
        // "YYYY/MM/DD HH:MM:SS " prefix
        assert_eq!(&chunks[0][4..5], "/");
        assert_eq!(&chunks[0][19..20], " ");
        assert_eq!(chunks[1], "raw");
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a\nb\n", "    "), "    a\n    b\n");
        assert_eq!(indent("a\n\nb", "  "), "  a\n\n  b");
        assert_eq!(indent("", "    "), "");
    }
}
