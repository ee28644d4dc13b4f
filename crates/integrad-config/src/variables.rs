//! Variable interpolation for `deploy.kdl` values.
//!
//! Supports variables like:
//! - `${build.source}` - Checkout directory of the job's source
//! - `${build.dir}` - Scratch build directory of the job
//! - `${job.number}` - Job number
//! - `${git.version}` - Branch or commit being deployed
//! - `${env.VAR_NAME}` - Environment variable
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${timestamp}` - Unix timestamp
//!
//! Unknown variables are left in place untouched.

use integrad_core::JobNumber;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

/// Everything a deploy file may refer to.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub build_source: String,
    pub build_dir: String,
    pub job_number: Option<JobNumber>,
    pub git_version: String,
    pub env: BTreeMap<String, String>,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current process environment into `env`.
    pub fn populate_env(&mut self) {
        self.env.extend(std::env::vars());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["build", "source"] => Some(self.build_source.clone()),
            ["build", "dir"] => Some(self.build_dir.clone()),
            ["job", "number"] => self.job_number.map(|n| n.to_string()),
            ["git", "version"] => Some(self.git_version.clone()),
            ["env", name] => self.env.get(*name).cloned(),
            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }

    /// Interpolate all `${name}` and `${namespace.name}` occurrences in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_build(mut self, source: &Path, dir: &Path) -> Self {
        self.ctx.build_source = source.display().to_string();
        self.ctx.build_dir = dir.display().to_string();
        self
    }

    pub fn with_job(mut self, number: JobNumber) -> Self {
        self.ctx.job_number = Some(number);
        self
    }

    pub fn with_git_version(mut self, version: impl Into<String>) -> Self {
        self.ctx.git_version = version.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    /// Include the whole process environment.
    pub fn with_process_env(mut self) -> Self {
        self.ctx.populate_env();
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
