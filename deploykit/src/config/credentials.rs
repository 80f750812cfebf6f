//! Credentials injected from the environment at the process boundary.

use crate::errors::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Environment variable holding the registry access token.
pub const REGISTRY_TOKEN_VAR: &str = "DOCKER_HUB_TOKEN";
/// Environment variable holding the cloud API key.
pub const CLOUD_KEY_VAR: &str = "EXO_API_KEY";
/// Environment variable holding the cloud API secret.
pub const CLOUD_SECRET_VAR: &str = "EXO_API_SECRET";

/// Credentials for pulling and pushing images.
#[derive(Clone)]
pub struct RegistryCredentials {
    /// Registry server, e.g. `docker.io`.
    pub server: String,
    /// Registry user.
    pub username: String,
    /// Registry token or password.
    pub password: SecretString,
    /// Contact email stored in the pull secret.
    pub email: String,
}

impl RegistryCredentials {
    /// Creates registry credentials.
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: username.into(),
            password: SecretString::new(password.into()),
            email: email.into(),
        }
    }

    /// Returns true if both credentials refer to the same account and token.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.server == other.server
            && self.username == other.username
            && self.email == other.email
            && self.password.expose_secret() == other.password.expose_secret()
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("email", &self.email)
            .finish()
    }
}

/// API key pair for the cloud provider.
#[derive(Clone)]
pub struct CloudCredentials {
    /// API key.
    pub key: SecretString,
    /// API secret.
    pub secret: SecretString,
}

impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Every secret the deployment needs.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Registry token.
    pub registry_token: SecretString,
    /// Cloud API key pair.
    pub cloud: CloudCredentials,
}

impl Credentials {
    /// Reads credentials from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads credentials through `lookup`, reporting every missing variable at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut read = |name: &str| -> SecretString {
            match lookup(name).filter(|v| !v.is_empty()) {
                Some(value) => SecretString::new(value),
                None => {
                    missing.push(name.to_string());
                    SecretString::new(String::new())
                }
            }
        };

        let registry_token = read(REGISTRY_TOKEN_VAR);
        let key = read(CLOUD_KEY_VAR);
        let secret = read(CLOUD_SECRET_VAR);

        if !missing.is_empty() {
            return Err(ConfigError::MissingEnv { names: missing });
        }

        Ok(Self {
            registry_token,
            cloud: CloudCredentials { key, secret },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_all_present() {
        let env: HashMap<&str, &str> = [
            (REGISTRY_TOKEN_VAR, "dckr_pat_x"),
            (CLOUD_KEY_VAR, "EXOabc"),
            (CLOUD_SECRET_VAR, "s3cr3t"),
        ]
        .into_iter()
        .collect();

        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(creds.registry_token.expose_secret(), "dckr_pat_x");
        assert_eq!(creds.cloud.key.expose_secret(), "EXOabc");
    }

    #[test]
    fn test_from_lookup_reports_all_missing() {
        let err = Credentials::from_lookup(|k| {
            (k == CLOUD_KEY_VAR).then(|| "EXOabc".to_string())
        })
        .unwrap_err();

        match err {
            ConfigError::MissingEnv { names } => {
                assert_eq!(names, vec![REGISTRY_TOKEN_VAR, CLOUD_SECRET_VAR]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = RegistryCredentials::new("docker.io", "acme", "hunter2", "ops@acme.dev");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_same_as() {
        let a = RegistryCredentials::new("docker.io", "acme", "t1", "ops@acme.dev");
        let b = RegistryCredentials::new("docker.io", "acme", "t1", "ops@acme.dev");
        let c = RegistryCredentials::new("docker.io", "acme", "t2", "ops@acme.dev");
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
