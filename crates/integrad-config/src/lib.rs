//! KDL configuration parsing for the integrad CI daemon.
//!
//! This crate handles parsing of:
//! - System configuration (integrad.kdl) and its resolution into a `DaemonConfig`
//! - Deploy definitions (deploy.kdl) found in project sources
//! - Variable interpolation

pub mod deploy;
pub mod error;
mod kdl_ext;
pub mod system;
pub mod variables;

pub use deploy::{DEPLOY_FILE, DeployConfig, DeployStep, parse_deploy_config};
pub use error::{ConfigError, ConfigResult};
pub use system::{DaemonConfig, SystemConfig, parse_system_config};
pub use variables::{VariableContext, VariableContextBuilder};
