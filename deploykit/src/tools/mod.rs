//! External tool integration.
//!
//! Subprocess-backed implementations of the collaborator traits. Every child
//! process runs with an explicit [`ExecEnv`]: a fixed search path and only
//! the variables the caller chose, never the parent environment.

mod docker;
mod env;
mod kubectl;
mod process;

pub use docker::DockerCli;
pub use env::{ExecEnv, KubeAccess};
pub use kubectl::{summarize_list, Kubectl};
pub use process::{ToolCommand, ToolOutput};
