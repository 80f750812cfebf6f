//! Image pull secret construction.

use super::Manifest;
use crate::config::RegistryCredentials;
use crate::errors::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::ExposeSecret;
use serde_json::json;

/// Secret type understood by the kubelet for registry credentials.
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Builds a `kubernetes.io/dockerconfigjson` secret for `credentials`.
///
/// The result is deterministic for a given input, so applying it repeatedly
/// leaves the cluster object unchanged.
pub fn pull_secret_manifest(
    namespace: &str,
    name: &str,
    credentials: &RegistryCredentials,
) -> Result<Manifest> {
    let password = credentials.password.expose_secret();
    let auth = STANDARD.encode(format!("{}:{password}", credentials.username));
    let config = json!({
        "auths": {
            credentials.server.as_str(): {
                "username": credentials.username,
                "password": password,
                "email": credentials.email,
                "auth": auth,
            }
        }
    });
    let encoded = STANDARD.encode(serde_json::to_vec(&config)?);

    Manifest::from_value(json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": DOCKER_CONFIG_JSON_TYPE,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app.kubernetes.io/managed-by": "deploykit" }
        },
        "data": { ".dockerconfigjson": encoded }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn decode_config(manifest: &Manifest) -> Value {
        let encoded = manifest.body()["data"][".dockerconfigjson"].as_str().unwrap();
        serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_pull_secret_shape() {
        let creds = RegistryCredentials::new("docker.io", "acme", "tok3n", "ops@acme.dev");
        let manifest = pull_secret_manifest("acme", "registry-creds", &creds).unwrap();

        assert_eq!(manifest.kind(), "Secret");
        assert_eq!(manifest.name(), "registry-creds");
        assert_eq!(manifest.namespace(), Some("acme"));
        assert_eq!(manifest.body()["type"], DOCKER_CONFIG_JSON_TYPE);

        let config = decode_config(&manifest);
        let entry = &config["auths"]["docker.io"];
        assert_eq!(entry["username"], "acme");
        assert_eq!(entry["password"], "tok3n");
        assert_eq!(
            STANDARD.decode(entry["auth"].as_str().unwrap()).unwrap(),
            b"acme:tok3n"
        );
    }

    #[test]
    fn test_pull_secret_is_deterministic() {
        let creds = RegistryCredentials::new("docker.io", "acme", "tok3n", "");
        let a = pull_secret_manifest("acme", "registry-creds", &creds).unwrap();
        let b = pull_secret_manifest("acme", "registry-creds", &creds).unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }
}
