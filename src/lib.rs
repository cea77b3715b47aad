//! Command-execution sandbox backed by a container runtime CLI.
//!
//! This crate is a thin adapter: it starts (or attaches to) a container
//! by shelling out to `docker`/`podman`, runs commands inside it through
//! `exec`, and tears the container down afterward. All the heavy lifting
//! happens in the external runtime; everything here is process invocation
//! and output parsing.
//!
//! ```no_run
//! use sandbox_session::{ContainerSession, SessionConfig};
//!
//! # async fn demo() -> Result<(), sandbox_session::SessionError> {
//! let config = SessionConfig {
//!     cwd: "/tmp".to_string(),
//!     ..SessionConfig::new("alpine:3.19")
//! };
//! let session = ContainerSession::connect(config).await?;
//! let result = session.execute("echo hello").await?;
//! assert_eq!(result.exit_code, 0);
//! session.cleanup();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{ContainerSession, EnvLookup, ExecOptions, ExecResult};
