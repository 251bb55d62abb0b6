//! Client-side intercept lifecycle: parses a port spec, creates an
//! intercept against a Session Manager, waits for it to go `ACTIVE`,
//! then drives its local port forwards, SFTP mount, and (optionally) a
//! supervised subprocess. See `siphon_client::orchestrator` for the
//! driver that ties these pieces together and SPEC_FULL.md §4.5/§5 for
//! the phase and concurrency model this follows.

pub mod backoff;
pub mod client;
pub mod config;
pub mod envfile;
pub mod error;
pub mod forward;
pub mod mount;
pub mod orchestrator;
pub mod portspec;
pub mod sftp;

pub use client::ManagerClient;
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use orchestrator::{ActiveIntercept, InterceptRequest, Orchestrator, RunCommand};
