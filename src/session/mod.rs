//! Container session lifecycle and command execution
//!
//! A [`ContainerSession`] owns exactly one container handle. It either
//! starts a fresh container (kept alive by a long `sleep` so it outlives
//! any individual command) or attaches to one that is already running,
//! then executes shell commands inside it by shelling out to the runtime
//! CLI, and finally tears the container down.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::SessionError;

/// Fixed deadline for each attach-phase inspect call.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ceiling in seconds for the graceful `stop` attempted during cleanup,
/// after which the teardown pipeline falls back to `rm -f`.
const STOP_TIMEOUT_SECS: u64 = 60;

/// Host environment lookup used to resolve forwarded variables.
/// Injectable so env merging is testable without touching process state.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Result of one command executed in the container.
///
/// `output` holds the command's stdout and stderr as one lossily decoded
/// text stream: all of stdout first, then all of stderr, not interleaved
/// in emission order. A non-zero `exit_code` means the command ran and
/// failed; it is reported as data, never as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub output: String,
    pub exit_code: i32,
}

/// Per-call overrides for [`ContainerSession::execute_with`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory; defaults to the configured cwd.
    pub cwd: Option<String>,
    /// Deadline in seconds; defaults to the configured timeout.
    pub timeout: Option<u64>,
}

/// A session bound to a single container.
///
/// The container identifier is set exactly once, by [`start`] or
/// [`attach`], and never cleared afterward. Dropping the session fires
/// [`cleanup`] as a safety net on every exit path, but calling it
/// explicitly before the session goes away is the normal flow: the
/// teardown runs detached, so nothing waits for it if the host process
/// exits right after.
///
/// [`start`]: ContainerSession::start
/// [`attach`]: ContainerSession::attach
/// [`cleanup`]: ContainerSession::cleanup
pub struct ContainerSession {
    config: SessionConfig,
    container_id: Option<String>,
    env_lookup: EnvLookup,
}

impl ContainerSession {
    /// Create an unstarted session. No runtime call is made until
    /// [`start`](Self::start) or [`attach`](Self::attach).
    pub fn new(config: SessionConfig) -> Self {
        Self::with_env_lookup(config, Arc::new(|key| std::env::var(key).ok()))
    }

    /// Create an unstarted session with a custom host environment lookup.
    pub fn with_env_lookup(config: SessionConfig, env_lookup: EnvLookup) -> Self {
        Self {
            config,
            container_id: None,
            env_lookup,
        }
    }

    /// Build a session and bring it up: attach when the config names an
    /// existing container, start a fresh one otherwise.
    pub async fn connect(config: SessionConfig) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;

        let mut session = Self::new(config);
        match session.config.container_id.clone() {
            Some(id) => {
                session.attach(&id).await?;
            }
            None => {
                session.start().await?;
            }
        }
        Ok(session)
    }

    /// The container identifier, once set.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// The resolved configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a new detached container and return its identifier.
    ///
    /// The container runs `sleep <container_timeout>` so it stays alive
    /// independent of any executed command and self-expires even if
    /// cleanup never reaches it. The whole call is bounded by the
    /// configured pull timeout since creation may have to pull the image.
    pub async fn start(&mut self) -> Result<String, SessionError> {
        if let Some(id) = &self.container_id {
            return Err(SessionError::AlreadyStarted { id: id.clone() });
        }

        let name = format!("sandbox-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let args = self.build_run_args(&name);

        debug!(executable = %self.config.executable, args = ?args, "Starting container");

        let output = timeout(
            Duration::from_secs(self.config.pull_timeout),
            Command::new(&self.config.executable)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| SessionError::StartTimedOut {
            seconds: self.config.pull_timeout,
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SessionError::StartFailed { stderr });
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(container_name = %name, container_id = %container_id, "Container started");

        self.container_id = Some(container_id.clone());
        Ok(container_id)
    }

    /// Attach to an existing, running container by id or name and return
    /// its canonical (full) identifier.
    ///
    /// Two independent inspect calls: a running-state probe, then an
    /// id/name probe. The container can stop between them; that race is
    /// accepted, attach is best-effort. On any failure the session's
    /// identifier stays unset.
    pub async fn attach(&mut self, container_id: &str) -> Result<String, SessionError> {
        if let Some(id) = &self.container_id {
            return Err(SessionError::AlreadyStarted { id: id.clone() });
        }

        debug!(container_id = %container_id, "Checking container state");

        let state = self
            .inspect(container_id, "{{.State.Running}}")
            .await?
            .map_err(|stderr| SessionError::AttachFailed {
                id: container_id.to_string(),
                reason: format!("not found or runtime error: {stderr}"),
            })?;

        if state.trim() != "true" {
            return Err(SessionError::NotRunning {
                id: container_id.to_string(),
            });
        }

        let info = self
            .inspect(container_id, "{{.Id}} {{.Name}}")
            .await?
            .map_err(|stderr| SessionError::AttachFailed {
                id: container_id.to_string(),
                reason: format!("inspect failed: {stderr}"),
            })?;

        let mut tokens = info.split_whitespace();
        let (full_id, name) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(id), Some(name), None) => (id.to_string(), name.trim_start_matches('/')),
            _ => {
                return Err(SessionError::AttachFailed {
                    id: container_id.to_string(),
                    reason: format!("unexpected inspect output: {info:?}"),
                })
            }
        };

        info!(container_name = %name, container_id = %full_id, "Attached to running container");

        self.container_id = Some(full_id.clone());
        Ok(full_id)
    }

    /// One inspect call with the fixed deadline. `Ok(Err(stderr))` means
    /// the runtime ran and refused; outer errors mean it could not be
    /// driven at all.
    async fn inspect(&self, id: &str, format: &str) -> Result<Result<String, String>, SessionError> {
        let output = timeout(
            INSPECT_TIMEOUT,
            Command::new(&self.config.executable)
                .args(["inspect", "-f", format, id])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| SessionError::AttachFailed {
            id: id.to_string(),
            reason: format!("inspect timed out after {}s", INSPECT_TIMEOUT.as_secs()),
        })??;

        if output.status.success() {
            Ok(Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(Err(String::from_utf8_lossy(&output.stderr).trim().to_string()))
        }
    }

    /// Execute a command with the configured cwd and timeout.
    pub async fn execute(&self, command: &str) -> Result<ExecResult, SessionError> {
        self.execute_with(command, ExecOptions::default()).await
    }

    /// Execute a command in the container through a login, non-interactive
    /// shell, so profile setup applies.
    ///
    /// Blocks up to the resolved timeout. On deadline the host-side child
    /// is killed and [`SessionError::ExecTimedOut`] is returned; the
    /// process inside the container is not reaped (known limitation) and
    /// the session stays usable for further calls.
    pub async fn execute_with(
        &self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<ExecResult, SessionError> {
        let container_id = self.container_id.as_deref().ok_or(SessionError::NotStarted)?;

        let cwd = opts.cwd.as_deref().unwrap_or(&self.config.cwd);
        let timeout_secs = opts.timeout.unwrap_or(self.config.timeout);
        let args = self.build_exec_args(container_id, cwd, command);

        debug!(container_id = %container_id, cwd = %cwd, command = %command, "Executing command");

        let output = timeout(
            Duration::from_secs(timeout_secs),
            Command::new(&self.config.executable)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            warn!(container_id = %container_id, timeout_secs, "Command timed out");
            SessionError::ExecTimedOut {
                seconds: timeout_secs,
            }
        })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecResult {
            output: text,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Schedule best-effort container teardown and return immediately.
    ///
    /// Launches a detached host shell pipeline that tries a graceful stop
    /// and falls back to force-removal. The outcome is unobserved and
    /// failures never reach the caller; the container's own sleep-based
    /// lifetime is the backstop if the pipeline is lost. No-op when the
    /// session was never started; safe to call more than once.
    pub fn cleanup(&self) {
        let Some(id) = self.container_id.as_deref() else {
            return;
        };

        let exe = &self.config.executable;
        let pipeline =
            format!("(timeout {STOP_TIMEOUT_SECS} {exe} stop {id} || {exe} rm -f {id}) >/dev/null 2>&1 &");

        debug!(container_id = %id, "Scheduling container teardown");

        if let Err(e) = std::process::Command::new("sh")
            .arg("-c")
            .arg(&pipeline)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            warn!(container_id = %id, error = %e, "Failed to launch container teardown");
        }
    }

    fn build_run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-w".to_string(),
            self.config.cwd.clone(),
        ];
        args.extend(self.config.run_args.iter().cloned());
        args.push(self.config.image.clone());
        args.push("sleep".to_string());
        args.push(self.config.container_timeout.clone());
        args
    }

    fn build_exec_args(&self, container_id: &str, cwd: &str, command: &str) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "-w".to_string(), cwd.to_string()];

        // Forwarded variables first, explicit config after: the runtime's
        // last-wins handling of repeated -e flags makes explicit entries
        // override forwarded ones on collision.
        for key in &self.config.forward_env {
            if let Some(value) = (self.env_lookup)(key) {
                args.push("-e".to_string());
                args.push(format!("{key}={value}"));
            }
        }
        for (key, value) in &self.config.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(container_id.to_string());
        args.push("bash".to_string());
        args.push("-lc".to_string());
        args.push(command.to_string());
        args
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for ContainerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("config", &self.config)
            .field("container_id", &self.container_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session_with_lookup(
        config: SessionConfig,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> ContainerSession {
        ContainerSession::with_env_lookup(config, Arc::new(lookup))
    }

    #[test]
    fn test_run_args_layout() {
        let config = SessionConfig {
            cwd: "/work".to_string(),
            run_args: vec!["--rm".to_string(), "--network".to_string(), "none".to_string()],
            container_timeout: "30m".to_string(),
            ..SessionConfig::new("alpine:3.19")
        };
        let session = ContainerSession::new(config);
        let args = session.build_run_args("sandbox-abcd1234");

        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--name",
                "sandbox-abcd1234",
                "-w",
                "/work",
                "--rm",
                "--network",
                "none",
                "alpine:3.19",
                "sleep",
                "30m",
            ]
        );
    }

    #[test]
    fn test_exec_args_forwarded_env_present() {
        let config = SessionConfig {
            forward_env: vec!["API_KEY".to_string()],
            ..SessionConfig::new("alpine")
        };
        let session = session_with_lookup(config, |key| {
            (key == "API_KEY").then(|| "secret".to_string())
        });

        let args = session.build_exec_args("cid", "/", "true");
        assert!(args.contains(&"API_KEY=secret".to_string()));
    }

    #[test]
    fn test_exec_args_absent_var_omitted() {
        let config = SessionConfig {
            forward_env: vec!["NOT_SET".to_string()],
            ..SessionConfig::new("alpine")
        };
        let session = session_with_lookup(config, |_| None);

        let args = session.build_exec_args("cid", "/", "true");
        assert!(!args.iter().any(|a| a.starts_with("NOT_SET=")));
        // no empty-value injection either
        assert!(!args.contains(&"NOT_SET=".to_string()));
    }

    #[test]
    fn test_exec_args_explicit_env_after_forwarded() {
        let mut env = std::collections::HashMap::new();
        env.insert("API_KEY".to_string(), "explicit".to_string());
        let config = SessionConfig {
            env,
            forward_env: vec!["API_KEY".to_string()],
            ..SessionConfig::new("alpine")
        };
        let session = session_with_lookup(config, |_| Some("forwarded".to_string()));

        let args = session.build_exec_args("cid", "/", "true");
        let forwarded = args.iter().position(|a| a == "API_KEY=forwarded").unwrap();
        let explicit = args.iter().position(|a| a == "API_KEY=explicit").unwrap();
        // explicit entries come later, so the runtime's last-wins rule
        // lets them override the forwarded value
        assert!(explicit > forwarded);
    }

    #[test]
    fn test_exec_args_shell_invocation() {
        let session = ContainerSession::new(SessionConfig::new("alpine"));
        let args = session.build_exec_args("cid", "/tmp", "echo hi");
        assert_eq!(
            &args[args.len() - 4..],
            &["cid", "bash", "-lc", "echo hi"]
        );
        assert_eq!(&args[..3], &["exec", "-w", "/tmp"]);
    }

    #[tokio::test]
    async fn test_execute_requires_start() {
        // executable that cannot exist: if execute tried to invoke the
        // runtime the error would be Runtime, not NotStarted
        let config = SessionConfig {
            executable: "/nonexistent/runtime".to_string(),
            ..SessionConfig::new("alpine")
        };
        let session = ContainerSession::new(config);
        let err = session.execute("echo x").await.unwrap_err();
        assert!(matches!(err, SessionError::NotStarted));
    }

    #[test]
    fn test_cleanup_unstarted_is_noop() {
        let session = ContainerSession::new(SessionConfig::new("alpine"));
        session.cleanup();
        session.cleanup();
        assert!(session.container_id().is_none());
    }
}
