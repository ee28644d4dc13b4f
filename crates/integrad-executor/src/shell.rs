//! Host shell build runner.

use async_trait::async_trait;
use integrad_config::{DaemonConfig, DeployConfig, VariableContextBuilder};
use integrad_core::runner::{BuildRunner, JobLogger, indent};
use integrad_core::{Error, Job, JobNumber, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::fs::copy_tree;
use crate::git;
use crate::process::{OUTPUT_INDENT, run_shell};

/// Runs jobs directly on the host: git checkout, then the steps of the
/// project's `deploy.kdl` through a shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    work_dir: PathBuf,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.shell.clone(), config.work_dir.clone())
    }

    /// Checkout and scratch directories of a job.
    pub fn dirs(&self, job: JobNumber) -> BuildDirs {
        BuildDirs {
            source: self.work_dir.join(format!("source-{job}")),
            build: self.work_dir.join(format!("build-{job}")),
        }
    }

    async fn fetch(
        &self,
        source: &str,
        version: &str,
        dirs: &BuildDirs,
        logger: &JobLogger,
    ) -> Result<()> {
        logger.log(format!("Fetching commit {version}...")).await;

        let fetched = match dirs.create().await {
            Ok(()) => git::fetch(source, version, &dirs.source).await,
            Err(err) => Err(err.to_string()),
        };
        match fetched {
            Ok(()) => {
                logger.log("Fetch successful.").await;
                Ok(())
            }
            Err(output) => {
                logger
                    .log(format!("Fetch failed:\n{}", indent(output.trim_end(), OUTPUT_INDENT)))
                    .await;
                Err(Error::ExecutionFailed(format!("could not fetch {version}")))
            }
        }
    }

    /// Run the steps of `deploy.kdl` from an already fetched source directory.
    pub async fn deploy(
        &self,
        number: JobNumber,
        version: &str,
        dirs: &BuildDirs,
        logger: &JobLogger,
    ) -> Result<()> {
        let config = match DeployConfig::load(&dirs.source) {
            Ok(config) => config,
            Err(err) => {
                logger
                    .log(format!(
                        "Error loading configuration:\n{}",
                        indent(&err.to_string(), OUTPUT_INDENT)
                    ))
                    .await;
                return Err(Error::InvalidInput(err.to_string()));
            }
        };

        let mut vars = VariableContextBuilder::new()
            .with_build(&dirs.source, &dirs.build)
            .with_job(number)
            .with_git_version(version)
            .with_process_env()
            .build();
        let env = vars.interpolate_map(&config.env);
        vars.env.extend(env);
        let config = config.interpolate(&vars);

        let total = config.build.len();
        for (i, cmd) in config.build.iter().enumerate() {
            logger
                .log(format!("Running build command {}/{}: {}", i + 1, total, cmd))
                .await;
            self.run_command(cmd, &dirs.source, &config, logger).await?;
        }

        for step in &config.deploy {
            let source = dirs.build.join(&step.source);
            let dest = Path::new(&step.dest);
            logger
                .log(format!(
                    "Deploying '{}' to '{}'",
                    source.display(),
                    dest.display()
                ))
                .await;
            if let Err(err) = copy_tree(&source, dest).await {
                logger.log(format!("Error while copying files: {err}")).await;
                return Err(Error::ExecutionFailed(err.to_string()));
            }
        }

        let total = config.post.len();
        for (i, cmd) in config.post.iter().enumerate() {
            logger
                .log(format!(
                    "Running post-build command {}/{}: {}",
                    i + 1,
                    total,
                    cmd
                ))
                .await;
            self.run_command(cmd, &dirs.build, &config, logger).await?;
        }

        logger.log("Deploy succeeded.").await;
        Ok(())
    }

    async fn run_command(
        &self,
        cmd: &str,
        cwd: &Path,
        config: &DeployConfig,
        logger: &JobLogger,
    ) -> Result<()> {
        match run_shell(&self.shell, cmd, cwd, &config.env, logger).await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                logger
                    .log(format!("Error while running command: {status}"))
                    .await;
                Err(Error::ExecutionFailed(format!("`{cmd}` {status}")))
            }
            Err(err) => {
                logger
                    .log(format!("Error while running command: {err}"))
                    .await;
                Err(Error::ExecutionFailed(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl BuildRunner for ShellRunner {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn run(&self, job: &Job, logger: &JobLogger) -> Result<()> {
        let Some(source) = job.arg("source") else {
            logger.log("Source must be provided").await;
            return Err(Error::InvalidInput("source must be provided".to_string()));
        };
        let Some(version) = job.arg("git") else {
            logger.log("VCS version must be provided").await;
            return Err(Error::InvalidInput(
                "VCS version must be provided".to_string(),
            ));
        };

        info!(job = %job.number, source, version, "Running shell build");
        let dirs = self.dirs(job.number);
        let result = match self.fetch(source, version, &dirs, logger).await {
            Ok(()) => self.deploy(job.number, version, &dirs, logger).await,
            Err(err) => Err(err),
        };
        dirs.remove().await;
        result
    }
}

/// Per-job working directories under the runner's work dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDirs {
    /// Where the source is checked out and build commands run.
    pub source: PathBuf,
    /// Scratch space where post commands run; relative deploy sources resolve here.
    pub build: PathBuf,
}

impl BuildDirs {
    pub async fn create(&self) -> std::io::Result<()> {
        for dir in [&self.source, &self.build] {
            if tokio::fs::try_exists(dir).await? {
                tokio::fs::remove_dir_all(dir).await?;
            }
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub async fn remove(&self) {
        for dir in [&self.source, &self.build] {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(dir = %dir.display(), error = %err, "Failed to remove work dir"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use integrad_core::JobArgs;
    use integrad_core::runner::LogSink;
    use std::process::Command;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    #[async_trait]
    impl LogSink for Collect {
        async fn write(&self, chunk: String) {
            self.0.lock().unwrap().push(chunk);
        }
    }

    impl Collect {
        fn text(&self) -> String {
            self.0.lock().unwrap().concat()
        }
    }

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("integrad-shell-{}", uuid::Uuid::new_v4()))
    }

    fn job(args: &[(&str, &str)]) -> Job {
        let args: JobArgs = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Job::queued(JobNumber::new(7), args)
    }

    #[tokio::test]
    async fn test_requires_vcs_version() {
        let sink = Arc::new(Collect::default());
        let logger = JobLogger::new(sink.clone());
        let runner = ShellRunner::new("sh", scratch());

        let result = runner.run(&job(&[("source", "/srv/repo")]), &logger).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(sink.text().contains("VCS version must be provided"));
    }

    #[test]
    fn test_dirs_are_per_job() {
        let runner = ShellRunner::new("sh", "/tmp/integrad");
        let dirs = runner.dirs(JobNumber::new(12));
        assert_eq!(dirs.source, PathBuf::from("/tmp/integrad/source-12"));
        assert_eq!(dirs.build, PathBuf::from("/tmp/integrad/build-12"));
    }

    #[tokio::test]
    async fn test_deploy_runs_all_steps() {
        let root = scratch();
        let runner = ShellRunner::new("sh", root.join("work"));
        let dirs = runner.dirs(JobNumber::new(7));
        dirs.create().await.unwrap();
        let installed = root.join("installed");

        let deploy_kdl = format!(
            r#"
            env {{ FLAVOR "release-${{git.version}}" }}
            build "mkdir -p dist && echo $FLAVOR > dist/flavor.txt"
            build "echo job ${{job.number}}"
            deploy "${{build.source}}/dist" to="{}"
            post "cat {}/flavor.txt"
            "#,
            installed.display(),
            installed.display()
        );
        tokio::fs::write(dirs.source.join("deploy.kdl"), deploy_kdl)
            .await
            .unwrap();

        let sink = Arc::new(Collect::default());
        let logger = JobLogger::new(sink.clone());
        runner
            .deploy(JobNumber::new(7), "v1", &dirs, &logger)
            .await
            .unwrap();

        assert_eq!(
            tokio::fs::read_to_string(installed.join("flavor.txt"))
                .await
                .unwrap(),
            "release-v1\n"
        );
        let log = sink.text();
        assert!(log.contains("Running build command 1/2: mkdir -p dist"));
        assert!(log.contains("Running build command 2/2: echo job 7\n"));
        assert!(log.contains("    job 7\n"));
        assert!(log.contains(&format!("' to '{}'", installed.display())));
        assert!(log.contains("Running post-build command 1/1: cat"));
        assert!(log.contains("    release-v1\n"));
        assert!(log.ends_with("Deploy succeeded.\n"));

        dirs.remove().await;
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_failing_build_command_stops_deploy() {
        let root = scratch();
        let runner = ShellRunner::new("sh", &root);
        let dirs = runner.dirs(JobNumber::new(8));
        dirs.create().await.unwrap();
        tokio::fs::write(
            dirs.source.join("deploy.kdl"),
            "build \"echo broken; exit 2\"\npost \"echo never\"",
        )
        .await
        .unwrap();

        let sink = Arc::new(Collect::default());
        let logger = JobLogger::new(sink.clone());
        let result = runner.deploy(JobNumber::new(8), "main", &dirs, &logger).await;

        assert!(matches!(result, Err(Error::ExecutionFailed(_))));
        let log = sink.text();
        assert!(log.contains("    broken\n"));
        assert!(log.contains("Error while running command"));
        assert!(!log.contains("never"));
        assert!(!log.contains("Deploy succeeded."));

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_missing_deploy_file_is_reported() {
        let root = scratch();
        let runner = ShellRunner::new("sh", &root);
        let dirs = runner.dirs(JobNumber::new(9));
        dirs.create().await.unwrap();

        let sink = Arc::new(Collect::default());
        let logger = JobLogger::new(sink.clone());
        let result = runner.deploy(JobNumber::new(9), "main", &dirs, &logger).await;

        assert!(result.is_err());
        assert!(sink.text().contains("Error loading configuration:\n    IO error"));
        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    /// Requires a `git` binary on the host.
    #[tokio::test]
    #[ignore]
    async fn test_run_from_git_repository() {
        let root = scratch();
        let repo = root.join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(
            repo.join("deploy.kdl"),
            "build \"echo from-git\"\n",
        )
        .unwrap();
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(&repo)
                .status()
                .unwrap();
            assert!(status.success(), "git {:?} failed", args);
        };
        git(&["init", "-q", "-b", "main"]);
        git(&["-c", "user.email=ci@example.com", "-c", "user.name=ci", "add", "."]);
        git(&[
            "-c",
            "user.email=ci@example.com",
            "-c",
            "user.name=ci",
            "commit",
            "-q",
            "-m",
            "init",
        ]);

        let runner = ShellRunner::new("sh", root.join("work"));
        let sink = Arc::new(Collect::default());
        let logger = JobLogger::new(sink.clone());
        let repo_path = repo.display().to_string();
        runner
            .run(&job(&[("source", &repo_path), ("git", "main")]), &logger)
            .await
            .unwrap();

        let log = sink.text();
        assert!(log.contains("Fetching commit main..."));
        assert!(log.contains("Fetch successful."));
        assert!(log.contains("    from-git\n"));
        assert!(!runner.dirs(JobNumber::new(7)).source.exists());

        let _ = std::fs::remove_dir_all(&root);
    }
}
