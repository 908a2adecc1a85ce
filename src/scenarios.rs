//! Probe orchestration
//!
//! A scenario is a fixed, ordered list of stages. Stages run one at a time,
//! each contributes exactly one entry to [`AggregateResult::outcomes`], and a
//! stage that never ran is absent rather than recorded as failed. Only the
//! strict full suite stops early: a failed TCP stage ends it.

use crate::probe::{DiagnosticQuery, ProbeOutcome, ProbeTarget, Prober, SAMPLE_LIMIT, Timing};
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Instant};
use tracing::{info, warn};

pub const STAGE_TCP: &str = "tcp";
pub const STAGE_MYSQL: &str = "mysql";
pub const STAGE_MYSQL_BASIC: &str = "mysql_basic";
pub const STAGE_DATABASES: &str = "databases";
pub const STAGE_USERS: &str = "users";

/// Continuation policy of the full suite after a failed TCP stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FullSuitePolicy {
    /// Stop the suite, keep only the TCP outcome
    Strict,
    /// Record the TCP failure and run every remaining stage
    #[default]
    Lenient,
}

impl FromStr for FullSuitePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            _ => Err(format!("Invalid full-suite policy: {s}")),
        }
    }
}

impl fmt::Display for FullSuitePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Lenient => f.write_str("lenient"),
        }
    }
}

/// The named scenarios, one per route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    TcpOnly,
    DbBasic,
    DbSweep,
    UsersSample,
    FullSuite(FullSuitePolicy),
    DbDirectSuite,
}

impl Scenario {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TcpOnly => "tcp-only",
            Self::DbBasic => "db-basic",
            Self::DbSweep => "db-sweep",
            Self::UsersSample => "users-sample",
            Self::FullSuite(FullSuitePolicy::Strict) => "full-suite-strict",
            Self::FullSuite(FullSuitePolicy::Lenient) => "full-suite-lenient",
            Self::DbDirectSuite => "db-direct-suite",
        }
    }
}

/// Table sampled by the users scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsersSample {
    pub database: String,
    pub table: String,
    pub columns: Vec<String>,
    pub limit: u32,
}

impl Default for UsersSample {
    fn default() -> Self {
        Self {
            database: "dbusers".to_string(),
            table: "users".to_string(),
            columns: ["id", "user", "name", "level_access"]
                .map(String::from)
                .to_vec(),
            limit: SAMPLE_LIMIT,
        }
    }
}

/// Successful and failed stage counts
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl Summary {
    fn record(&mut self, outcome: &ProbeOutcome) {
        self.total += 1;
        if outcome.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// One stage entry: a single probe, or a sweep keyed by database name
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum StageOutcome {
    Probe(ProbeOutcome),
    Sweep(IndexMap<String, ProbeOutcome>),
}

impl StageOutcome {
    /// The single probe outcome, `None` for a sweep
    #[must_use]
    pub const fn as_probe(&self) -> Option<&ProbeOutcome> {
        match self {
            Self::Probe(outcome) => Some(outcome),
            Self::Sweep(_) => None,
        }
    }

    fn tally(&self, summary: &mut Summary) {
        match self {
            Self::Probe(outcome) => summary.record(outcome),
            Self::Sweep(members) => members.values().for_each(|o| summary.record(o)),
        }
    }
}

/// Everything a scenario produced, in execution order
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub scenario: String,
    pub timestamp: String,
    pub total_duration_ms: u64,
    pub outcomes: IndexMap<String, StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<Summary>,
    /// Set when a gate stopped the scenario before its last stage
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl AggregateResult {
    /// Whether the scenario ran to completion
    #[must_use]
    pub const fn completed(&self) -> bool {
        self.error.is_none()
    }

    /// Outcome of a single-probe stage
    #[must_use]
    pub fn probe(&self, stage: &str) -> Option<&ProbeOutcome> {
        self.outcomes.get(stage).and_then(StageOutcome::as_probe)
    }
}

/// Collects stage outcomes while a scenario runs
struct Aggregate {
    scenario: Scenario,
    timestamp: String,
    start: Instant,
    outcomes: IndexMap<String, StageOutcome>,
}

impl Aggregate {
    fn begin(scenario: Scenario) -> Self {
        info!(scenario = scenario.name(), "scenario started");
        Self {
            scenario,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            start: Instant::now(),
            outcomes: IndexMap::new(),
        }
    }

    fn insert(&mut self, stage: &str, outcome: StageOutcome) {
        self.outcomes.insert(stage.to_string(), outcome);
    }

    fn finish(self, with_summary: bool, error: Option<String>) -> AggregateResult {
        let summary = with_summary.then(|| {
            let mut summary = Summary::default();
            self.outcomes.values().for_each(|o| o.tally(&mut summary));
            summary
        });

        let result = AggregateResult {
            scenario: self.scenario.name().to_string(),
            timestamp: self.timestamp,
            total_duration_ms: crate::probe::outcome::millis(self.start.elapsed()),
            outcomes: self.outcomes,
            summary,
            error,
        };

        info!(
            scenario = %result.scenario,
            duration_ms = result.total_duration_ms,
            completed = result.completed(),
            "scenario finished"
        );
        result
    }
}

/// Runs scenarios against one fixed target
#[derive(Debug)]
pub struct Orchestrator<P> {
    prober: P,
    target: ProbeTarget,
    databases: Vec<String>,
    users: UsersSample,
}

impl<P: Prober> Orchestrator<P> {
    /// Repeated database names are dropped, keeping the first occurrence,
    /// so each sweep member owns exactly one outcome key
    #[must_use]
    pub fn new(
        prober: P,
        target: ProbeTarget,
        databases: Vec<String>,
        users: UsersSample,
    ) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(databases.len());
        for database in databases {
            if unique.contains(&database) {
                warn!(database = %database, "duplicate database ignored");
            } else {
                unique.push(database);
            }
        }

        Self {
            prober,
            target,
            databases: unique,
            users,
        }
    }

    #[must_use]
    pub const fn target(&self) -> &ProbeTarget {
        &self.target
    }

    #[must_use]
    pub fn databases(&self) -> &[String] {
        &self.databases
    }

    #[must_use]
    pub const fn users(&self) -> &UsersSample {
        &self.users
    }

    /// Run a scenario by name
    pub async fn run(&self, scenario: Scenario) -> AggregateResult {
        match scenario {
            Scenario::TcpOnly => self.tcp_only().await,
            Scenario::DbBasic => self.db_basic().await,
            Scenario::DbSweep => self.db_sweep().await,
            Scenario::UsersSample => self.users_sample().await,
            Scenario::FullSuite(policy) => self.full_suite(policy).await,
            Scenario::DbDirectSuite => self.db_direct_suite().await,
        }
    }

    async fn tcp(&self) -> ProbeOutcome {
        self.prober.tcp(&self.target.host, self.target.port).await
    }

    async fn liveness(&self, timestamp: bool, timing: Timing) -> ProbeOutcome {
        self.prober
            .database(
                &self.target.without_database(),
                &DiagnosticQuery::Liveness { timestamp },
                timing,
            )
            .await
    }

    /// One catalog probe per database, in declared order, none skipped
    async fn sweep(&self) -> IndexMap<String, ProbeOutcome> {
        let mut results = IndexMap::with_capacity(self.databases.len());
        for database in &self.databases {
            let outcome = self
                .prober
                .database(
                    &self.target.with_database(database),
                    &DiagnosticQuery::Catalog {
                        schema: database.clone(),
                    },
                    Timing::Session,
                )
                .await;
            if let Some(message) = outcome.error_message() {
                warn!(database = %database, "sweep member failed: {message}");
            }
            results.insert(database.clone(), outcome);
        }
        results
    }

    pub async fn tcp_only(&self) -> AggregateResult {
        let mut aggregate = Aggregate::begin(Scenario::TcpOnly);
        aggregate.insert(STAGE_TCP, StageOutcome::Probe(self.tcp().await));
        aggregate.finish(false, None)
    }

    pub async fn db_basic(&self) -> AggregateResult {
        let mut aggregate = Aggregate::begin(Scenario::DbBasic);
        let outcome = self.liveness(true, Timing::Query).await;
        aggregate.insert(STAGE_MYSQL, StageOutcome::Probe(outcome));
        aggregate.finish(false, None)
    }

    pub async fn db_sweep(&self) -> AggregateResult {
        let mut aggregate = Aggregate::begin(Scenario::DbSweep);
        for (database, outcome) in self.sweep().await {
            aggregate.insert(&database, StageOutcome::Probe(outcome));
        }
        aggregate.finish(true, None)
    }

    pub async fn users_sample(&self) -> AggregateResult {
        let mut aggregate = Aggregate::begin(Scenario::UsersSample);
        let outcome = self
            .prober
            .database(
                &self.target.with_database(&self.users.database),
                &DiagnosticQuery::Sample {
                    table: self.users.table.clone(),
                    columns: self.users.columns.clone(),
                    limit: self.users.limit,
                },
                Timing::Session,
            )
            .await;
        aggregate.insert(STAGE_USERS, StageOutcome::Probe(outcome));
        aggregate.finish(false, None)
    }

    pub async fn full_suite(&self, policy: FullSuitePolicy) -> AggregateResult {
        let mut aggregate = Aggregate::begin(Scenario::FullSuite(policy));

        let tcp = self.tcp().await;
        let tcp_failure = (!tcp.success).then(|| {
            tcp.error_message()
                .map_or_else(|| "TCP failed".to_string(), |m| format!("TCP failed: {m}"))
        });
        aggregate.insert(STAGE_TCP, StageOutcome::Probe(tcp));

        if let Some(reason) = tcp_failure {
            match policy {
                FullSuitePolicy::Strict => {
                    warn!("{reason}, stopping suite");
                    return aggregate.finish(true, Some(reason));
                }
                FullSuitePolicy::Lenient => warn!("{reason}, trying MySQL directly"),
            }
        }

        let basic = self.liveness(false, Timing::Session).await;
        aggregate.insert(STAGE_MYSQL_BASIC, StageOutcome::Probe(basic));
        aggregate.insert(STAGE_DATABASES, StageOutcome::Sweep(self.sweep().await));
        aggregate.finish(true, None)
    }

    pub async fn db_direct_suite(&self) -> AggregateResult {
        let mut aggregate = Aggregate::begin(Scenario::DbDirectSuite);
        let basic = self.liveness(true, Timing::Session).await;
        aggregate.insert(STAGE_MYSQL_BASIC, StageOutcome::Probe(basic));
        aggregate.insert(STAGE_DATABASES, StageOutcome::Sweep(self.sweep().await));
        aggregate.finish(true, None)
    }
}
