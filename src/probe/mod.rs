//! Single bounded attempts against the target
//!
//! # Module Organization
//!
//! - `outcome` - `ProbeOutcome` and `ErrorDetail`, the result of every probe
//! - `tcp` - raw TCP reachability check
//! - `mysql` - short-lived authenticated session running one diagnostic query
//!
//! A probe never returns an error: transport, authentication and query
//! faults are folded into a failed [`ProbeOutcome`].

pub mod mysql;
pub mod outcome;
pub mod tcp;

pub use mysql::{DiagnosticQuery, Timing, probe_database};
pub use outcome::{ErrorDetail, ProbeOutcome};
pub use tcp::probe_tcp;

use std::{fmt, future::Future, time::Duration};

/// TCP connect timeout
pub const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Database session connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum rows returned by the users sample
pub const SAMPLE_LIMIT: u32 = 5;

/// Login used to open database sessions
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Where and as whom to probe, read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub database: Option<String>,
}

impl ProbeTarget {
    /// Same host and login, session scoped to `database`
    #[must_use]
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: Some(database.to_string()),
            ..self.clone()
        }
    }

    /// Same host and login, no default database
    #[must_use]
    pub fn without_database(&self) -> Self {
        Self {
            database: None,
            ..self.clone()
        }
    }
}

/// Timeouts applied to every probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub tcp_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            tcp_timeout: TCP_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// The seam between the orchestrator and the network
///
/// Implementations must fold every fault into the returned outcome.
pub trait Prober: Send + Sync {
    fn tcp(&self, host: &str, port: u16) -> impl Future<Output = ProbeOutcome> + Send;

    fn database(
        &self,
        target: &ProbeTarget,
        query: &DiagnosticQuery,
        timing: Timing,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Prober backed by real sockets and MySQL sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveProber {
    settings: ProbeSettings,
}

impl LiveProber {
    #[must_use]
    pub const fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> ProbeSettings {
        self.settings
    }
}

impl Prober for LiveProber {
    async fn tcp(&self, host: &str, port: u16) -> ProbeOutcome {
        probe_tcp(host, port, self.settings.tcp_timeout).await
    }

    async fn database(
        &self,
        target: &ProbeTarget,
        query: &DiagnosticQuery,
        timing: Timing,
    ) -> ProbeOutcome {
        probe_database(target, query, timing, self.settings.connect_timeout).await
    }
}
