#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use dbprobe::{
    probe::{Credentials, LiveProber, ProbeSettings, ProbeTarget},
    scenarios::{Orchestrator, UsersSample},
};
use std::{env, time::Duration};

pub const MARIADB_HOST: &str = "127.0.0.1";
pub const MARIADB_PORT: u16 = 3306;
pub const MARIADB_USER: &str = "dbprobe";
pub const MARIADB_PASSWORD: &str = "secret";
pub const MARIADB_DATABASE: &str = "testdb";

pub fn skip_if_no_mariadb() -> bool {
    env::var("SKIP_MARIADB_TESTS").is_ok()
}

/// Target pointing at the test container, no default schema
pub fn mariadb_target() -> ProbeTarget {
    target(MARIADB_HOST, MARIADB_PORT)
}

pub fn target(host: &str, port: u16) -> ProbeTarget {
    ProbeTarget {
        host: host.to_string(),
        port,
        credentials: Credentials {
            user: MARIADB_USER.to_string(),
            password: MARIADB_PASSWORD.to_string(),
        },
        database: None,
    }
}

/// Short timeouts so unreachable targets fail fast in tests
pub fn quick_prober() -> LiveProber {
    LiveProber::new(ProbeSettings {
        tcp_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(5),
    })
}

pub fn orchestrator(target: ProbeTarget, databases: &[&str]) -> Orchestrator<LiveProber> {
    Orchestrator::new(
        quick_prober(),
        target,
        databases.iter().map(ToString::to_string).collect(),
        UsersSample {
            database: MARIADB_DATABASE.to_string(),
            ..UsersSample::default()
        },
    )
}

/// A local port with nothing listening on it
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .expect("failed to bind random local port");
    let port = listener
        .local_addr()
        .expect("failed to read local addr")
        .port();
    drop(listener);
    port
}
