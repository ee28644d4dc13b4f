//! Deploy definition parsing (`deploy.kdl` at the root of a project's source).

use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeMap;
use std::path::Path;

use crate::kdl_ext::{get_first_string_arg, get_string_prop, require_string_arg};
use crate::{ConfigError, ConfigResult, VariableContext};

/// File name looked up in the checked-out source tree.
pub const DEPLOY_FILE: &str = "deploy.kdl";

/// What to run and copy for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployConfig {
    /// Extra environment for build and post commands.
    pub env: BTreeMap<String, String>,
    /// Shell commands run in the source directory, in order.
    pub build: Vec<String>,
    /// Artifacts copied once every build command succeeded.
    pub deploy: Vec<DeployStep>,
    /// Shell commands run in the build directory after deploying.
    pub post: Vec<String>,
}

/// A single `deploy "<source>" to="<dest>"` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStep {
    pub source: String,
    pub dest: String,
}

impl DeployConfig {
    /// Read `deploy.kdl` from `dir`.
    pub fn load(dir: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(dir.join(DEPLOY_FILE))?;
        parse_deploy_config(&text)
    }

    /// Substitute `${...}` variables in every value.
    pub fn interpolate(&self, ctx: &VariableContext) -> DeployConfig {
        DeployConfig {
            env: ctx.interpolate_map(&self.env),
            build: ctx.interpolate_vec(&self.build),
            deploy: self
                .deploy
                .iter()
                .map(|step| DeployStep {
                    source: ctx.interpolate(&step.source),
                    dest: ctx.interpolate(&step.dest),
                })
                .collect(),
            post: ctx.interpolate_vec(&self.post),
        }
    }
}

/// Parse a deploy definition from KDL text.
pub fn parse_deploy_config(kdl: &str) -> ConfigResult<DeployConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = DeployConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "env" => parse_env(node, &mut config.env)?,
            "build" => config.build.push(require_string_arg(node)?),
            "deploy" => config.deploy.push(parse_deploy_step(node)?),
            "post" => config.post.push(require_string_arg(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_env(node: &KdlNode, env: &mut BTreeMap<String, String>) -> ConfigResult<()> {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = get_first_string_arg(child).ok_or_else(|| ConfigError::InvalidValue {
                field: format!("env.{key}"),
                message: "expected a string value".to_string(),
            })?;
            if env.insert(key.clone(), value).is_some() {
                return Err(ConfigError::Duplicate(format!("env.{key}")));
            }
        }
    }
    Ok(())
}

fn parse_deploy_step(node: &KdlNode) -> ConfigResult<DeployStep> {
    let source = require_string_arg(node)?;
    let dest = get_string_prop(node, "to")
        .ok_or_else(|| ConfigError::MissingField(format!("deploy \"{source}\": to")))?;
    Ok(DeployStep { source, dest })
}
