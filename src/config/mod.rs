//! Session configuration
//!
//! `SessionConfig` is built programmatically or deserialized from an
//! embedding application's config file. All fields except `image` carry
//! defaults.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the runtime executable.
pub const RUNTIME_ENV_VAR: &str = "SANDBOX_RUNTIME";

/// Configuration for a single container session. Immutable once the
/// session is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Container image reference to run commands in.
    pub image: String,

    /// Working directory for executed commands.
    #[serde(default = "default_cwd")]
    pub cwd: String,

    /// Environment variables set explicitly in the container. These win
    /// over forwarded variables on name collision.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Host environment variable names to forward into the container.
    /// A name is forwarded only when it is set on the host.
    #[serde(default)]
    pub forward_env: Vec<String>,

    /// Per-command timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Runtime executable (docker, podman, ...). Defaults from the
    /// `SANDBOX_RUNTIME` environment variable, else whatever `docker`
    /// resolves to on PATH.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Extra arguments for container creation. The default removes the
    /// container once it exits.
    #[serde(default = "default_run_args")]
    pub run_args: Vec<String>,

    /// Max container lifetime, in `sleep` duration syntax. The container
    /// self-expires after this even if cleanup never reaches it.
    #[serde(default = "default_container_timeout")]
    pub container_timeout: String,

    /// Timeout in seconds for container creation; pulling the image may
    /// dominate start latency.
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout: u64,

    /// Attach to this existing container instead of starting a new one.
    #[serde(default)]
    pub container_id: Option<String>,
}

fn default_cwd() -> String {
    "/".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_executable() -> String {
    resolve_executable(|key| std::env::var(key).ok())
}

fn default_run_args() -> Vec<String> {
    vec!["--rm".to_string()]
}

fn default_container_timeout() -> String {
    "2h".to_string()
}

fn default_pull_timeout() -> u64 {
    120
}

/// Resolve the runtime executable: environment override first, then a
/// PATH lookup for `docker`, then the bare name as a last resort.
pub fn resolve_executable(lookup: impl Fn(&str) -> Option<String>) -> String {
    if let Some(exe) = lookup(RUNTIME_ENV_VAR).filter(|v| !v.is_empty()) {
        return exe;
    }
    which::which("docker")
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "docker".to_string())
}

impl SessionConfig {
    /// Minimal config for `image` with everything else defaulted.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() && self.container_id.is_none() {
            anyhow::bail!("image is required unless attaching to an existing container");
        }

        if self.timeout == 0 {
            anyhow::bail!("command timeout cannot be 0");
        }

        if self.pull_timeout == 0 {
            anyhow::bail!("pull timeout cannot be 0");
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            cwd: default_cwd(),
            env: HashMap::new(),
            forward_env: Vec::new(),
            timeout: default_timeout(),
            executable: default_executable(),
            run_args: default_run_args(),
            container_timeout: default_container_timeout(),
            pull_timeout: default_pull_timeout(),
            container_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new("alpine");
        assert_eq!(config.cwd, "/");
        assert_eq!(config.timeout, 30);
        assert_eq!(config.run_args, vec!["--rm".to_string()]);
        assert_eq!(config.container_timeout, "2h");
        assert_eq!(config.pull_timeout, 120);
        assert!(config.env.is_empty());
        assert!(config.container_id.is_none());
    }

    #[test]
    fn test_validation() {
        assert!(SessionConfig::new("alpine").validate().is_ok());

        let config = SessionConfig::default();
        assert!(config.validate().is_err());

        let config = SessionConfig {
            container_id: Some("abc123".to_string()),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = SessionConfig {
            timeout: 0,
            ..SessionConfig::new("alpine")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_executable_override() {
        let exe = resolve_executable(|key| {
            assert_eq!(key, RUNTIME_ENV_VAR);
            Some("/opt/podman/bin/podman".to_string())
        });
        assert_eq!(exe, "/opt/podman/bin/podman");
    }

    #[test]
    fn test_executable_empty_override_ignored() {
        let exe = resolve_executable(|_| Some(String::new()));
        assert!(exe.ends_with("docker"));
    }
}
