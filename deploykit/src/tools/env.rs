//! Explicit environments for external tools.
//!
//! Child processes never inherit the parent environment. Each invocation gets
//! a search path plus exactly the variables its caller put in the `ExecEnv`.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// The environment a child process runs with.
#[derive(Clone)]
pub struct ExecEnv {
    search_path: String,
    vars: Vec<(String, SecretString)>,
}

impl ExecEnv {
    /// Creates an environment containing only `PATH`.
    #[must_use]
    pub fn new(search_path: impl Into<String>) -> Self {
        Self {
            search_path: search_path.into(),
            vars: Vec::new(),
        }
    }

    /// Adds a plain variable.
    #[must_use]
    pub fn with_var(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_secret(name, SecretString::new(value.into()))
    }

    /// Adds a secret variable; its value is never printed.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, value: SecretString) -> Self {
        let name = name.into();
        self.vars.retain(|(existing, _)| *existing != name);
        self.vars.push((name, value));
        self
    }

    /// Copies a variable from the current process when it is set.
    #[must_use]
    pub fn with_inherited(self, name: &str) -> Self {
        match std::env::var(name) {
            Ok(value) => self.with_var(name, value),
            Err(_) => self,
        }
    }

    /// Returns the search path.
    #[must_use]
    pub fn search_path(&self) -> &str {
        &self.search_path
    }

    /// Returns the variable names, in insertion order.
    #[must_use]
    pub fn var_names(&self) -> Vec<&str> {
        self.vars.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns true if `name` is set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.iter().any(|(existing, _)| existing == name)
    }

    /// Replaces the command's environment with this one.
    pub fn apply(&self, command: &mut Command) {
        command.env_clear();
        command.env("PATH", &self.search_path);
        for (name, value) in &self.vars {
            command.env(name, value.expose_secret());
        }
    }
}

impl fmt::Debug for ExecEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecEnv")
            .field("search_path", &self.search_path)
            .field("vars", &self.var_names())
            .finish()
    }
}

/// How to reach one cluster's control plane.
#[derive(Debug, Clone)]
pub struct KubeAccess {
    kubeconfig: PathBuf,
    env: ExecEnv,
}

impl KubeAccess {
    /// Binds a kubeconfig to an environment; `KUBECONFIG` is set explicitly.
    #[must_use]
    pub fn new(kubeconfig: impl Into<PathBuf>, env: ExecEnv) -> Self {
        let kubeconfig = kubeconfig.into();
        let env = env.with_var("KUBECONFIG", kubeconfig.to_string_lossy().into_owned());
        Self { kubeconfig, env }
    }

    /// Returns the kubeconfig path.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// Returns the environment used for control-plane calls.
    #[must_use]
    pub fn env(&self) -> &ExecEnv {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_env_replaces_duplicates() {
        let env = ExecEnv::new("/usr/bin")
            .with_var("A", "1")
            .with_var("B", "2")
            .with_var("A", "3");
        assert_eq!(env.var_names(), vec!["B", "A"]);
        assert!(env.contains("A"));
        assert!(!env.contains("PATH"));
    }

    #[test]
    fn test_exec_env_debug_hides_values() {
        let env = ExecEnv::new("/usr/bin").with_secret("EXO_API_SECRET", SecretString::new("s3cr3t".into()));
        let debug = format!("{env:?}");
        assert!(debug.contains("EXO_API_SECRET"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn test_kube_access_sets_kubeconfig() {
        let access = KubeAccess::new("/tmp/run/kubeconfig.yaml", ExecEnv::new("/usr/bin"));
        assert!(access.env().contains("KUBECONFIG"));
        assert_eq!(access.kubeconfig(), Path::new("/tmp/run/kubeconfig.yaml"));
    }

    #[tokio::test]
    async fn test_apply_clears_parent_environment() {
        let env = ExecEnv::new("/usr/bin:/bin").with_var("ONLY_ME", "yes");
        let mut command = Command::new("env");
        env.apply(&mut command);
        let Ok(output) = command.output().await else {
            return;
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("ONLY_ME=yes"));
        assert!(!stdout.contains("HOME="));
    }
}
