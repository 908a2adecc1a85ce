use crate::{
    probe::{LiveProber, ProbeOutcome, Prober},
    scenarios::{
        AggregateResult, FullSuitePolicy, Orchestrator, STAGE_MYSQL, STAGE_TCP, STAGE_USERS,
        Scenario, StageOutcome, Summary,
    },
};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use std::{any::Any, fmt, net::IpAddr, panic::AssertUnwindSafe, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

const TEST_TCP: &str = "TCP Connection";
const TEST_MYSQL: &str = "MySQL Connection";
const TEST_MYSQL_DIRECT: &str = "MySQL Direct Test";
const TEST_DATABASES: &str = "Database Access";
const TEST_USERS: &str = "Users Table";
const TEST_COMPLETE: &str = "Complete Test Suite";

/// Routes served, also listed by `GET /`
pub const ENDPOINTS: [(&str, &str); 8] = [
    ("tcp", "/test/tcp"),
    ("mysql", "/test/mysql"),
    ("mysql-direct", "/test/mysql-direct"),
    ("databases", "/test/databases"),
    ("users", "/test/users"),
    ("complete", "/test/complete"),
    ("complete-strict", "/test/complete/strict"),
    ("complete-lenient", "/test/complete/lenient"),
];

/// Deployment mode; production hides internal fault detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Production,
    #[default]
    Development,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(format!("Invalid environment: {s}")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Development => f.write_str("development"),
        }
    }
}

/// HTTP listener and presentation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub listen: Option<IpAddr>,
    pub port: u16,
    pub mode: Mode,
    pub full_suite: FullSuitePolicy,
}

/// Shared, read-only request state
#[derive(Debug)]
pub struct AppState<P> {
    pub orchestrator: Orchestrator<P>,
    pub mode: Mode,
    pub full_suite: FullSuitePolicy,
}

#[derive(Serialize, Debug)]
struct EnvironmentInfo {
    mode: Mode,
    platform: &'static str,
    arch: &'static str,
}

impl EnvironmentInfo {
    const fn new(mode: Mode) -> Self {
        Self {
            mode,
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }
}

#[derive(Serialize, Debug)]
struct TargetConfig<'a> {
    host: &'a str,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Serialize, Debug)]
struct SingleReport<'a> {
    test: &'static str,
    timestamp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<TargetConfig<'a>>,
    result: &'a ProbeOutcome,
}

#[derive(Serialize, Debug)]
struct SweepReport<'a> {
    test: &'static str,
    timestamp: &'a str,
    summary: Summary,
    results: &'a IndexMap<String, StageOutcome>,
}

#[derive(Serialize, Debug)]
struct SuiteReport<'a> {
    test: &'static str,
    timestamp: &'a str,
    duration: u64,
    environment: EnvironmentInfo,
    config: TargetConfig<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<&'a IndexMap<String, StageOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partial_results: Option<&'a IndexMap<String, StageOutcome>>,
}

#[derive(Serialize, Debug)]
struct FaultReport {
    test: &'static str,
    timestamp: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// 500 for anything outside the probe error taxonomy
fn internal_fault(mode: Mode, test: &'static str, error: &str, details: String) -> Response {
    error!(test, "internal fault: {error}: {details}");
    let report = FaultReport {
        test,
        timestamp: now(),
        error: error.to_string(),
        details: (mode == Mode::Development).then_some(details),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response()
}

impl<P: Prober> AppState<P> {
    fn config(&self, with_user: bool) -> TargetConfig<'_> {
        let target = self.orchestrator.target();
        TargetConfig {
            host: &target.host,
            port: target.port,
            user: with_user.then_some(target.credentials.user.as_str()),
        }
    }

    /// Run a scenario, turning a panic into an internal fault response
    async fn run(
        &self,
        scenario: Scenario,
        test: &'static str,
    ) -> Result<AggregateResult, Response> {
        AssertUnwindSafe(self.orchestrator.run(scenario))
            .catch_unwind()
            .await
            .map_err(|panic| {
                internal_fault(
                    self.mode,
                    test,
                    &format!("Error in {} test", scenario.name()),
                    panic_message(panic.as_ref()),
                )
            })
    }

    /// Single-probe report; a failed probe answers `on_failure`
    fn single(
        &self,
        test: &'static str,
        result: &AggregateResult,
        stage: &str,
        config: Option<TargetConfig<'_>>,
        on_failure: StatusCode,
    ) -> Response {
        match result.probe(stage) {
            Some(outcome) => {
                let status = if outcome.success {
                    StatusCode::OK
                } else {
                    on_failure
                };
                let report = SingleReport {
                    test,
                    timestamp: &result.timestamp,
                    config,
                    result: outcome,
                };
                (status, Json(report)).into_response()
            }
            None => internal_fault(
                self.mode,
                test,
                "Missing stage outcome",
                format!("stage {stage} absent from {}", result.scenario),
            ),
        }
    }

    fn suite(&self, test: &'static str, result: &AggregateResult) -> Response {
        let mut report = SuiteReport {
            test,
            timestamp: &result.timestamp,
            duration: result.total_duration_ms,
            environment: EnvironmentInfo::new(self.mode),
            config: self.config(true),
            results: None,
            error: None,
            partial_results: None,
        };

        match &result.error {
            None => {
                report.results = Some(&result.outcomes);
                Json(report).into_response()
            }
            Some(error) => {
                report.error = Some(error.as_str());
                report.partial_results = Some(&result.outcomes);
                (StatusCode::INTERNAL_SERVER_ERROR, Json(report)).into_response()
            }
        }
    }

    async fn complete(&self, policy: FullSuitePolicy) -> Response {
        match self.run(Scenario::FullSuite(policy), TEST_COMPLETE).await {
            Ok(result) => self.suite(TEST_COMPLETE, &result),
            Err(response) => response,
        }
    }
}

async fn index_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    let endpoints: serde_json::Map<_, _> = ENDPOINTS
        .iter()
        .map(|(name, path)| ((*name).to_string(), json!(path)))
        .collect();

    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": now(),
        "environment": EnvironmentInfo::new(state.mode),
        "endpoints": endpoints,
    }))
    .into_response()
}

async fn tcp_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    match state.run(Scenario::TcpOnly, TEST_TCP).await {
        Ok(result) => state.single(
            TEST_TCP,
            &result,
            STAGE_TCP,
            Some(state.config(false)),
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

async fn mysql_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    match state.run(Scenario::DbBasic, TEST_MYSQL).await {
        Ok(result) => state.single(
            TEST_MYSQL,
            &result,
            STAGE_MYSQL,
            Some(state.config(true)),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        Err(response) => response,
    }
}

async fn users_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    match state.run(Scenario::UsersSample, TEST_USERS).await {
        Ok(result) => state.single(
            TEST_USERS,
            &result,
            STAGE_USERS,
            None,
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        Err(response) => response,
    }
}

async fn databases_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    match state.run(Scenario::DbSweep, TEST_DATABASES).await {
        Ok(result) => Json(SweepReport {
            test: TEST_DATABASES,
            timestamp: &result.timestamp,
            summary: result.summary.unwrap_or_default(),
            results: &result.outcomes,
        })
        .into_response(),
        Err(response) => response,
    }
}

async fn mysql_direct_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    match state.run(Scenario::DbDirectSuite, TEST_MYSQL_DIRECT).await {
        Ok(result) => state.suite(TEST_MYSQL_DIRECT, &result),
        Err(response) => response,
    }
}

async fn complete_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    state.complete(state.full_suite).await
}

async fn complete_strict_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    state.complete(FullSuitePolicy::Strict).await
}

async fn complete_lenient_handler<P: Prober>(State(state): State<Arc<AppState<P>>>) -> Response {
    state.complete(FullSuitePolicy::Lenient).await
}

async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

/// Build the router; every route runs its scenario on the request's task
pub fn router<P: Prober + 'static>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/", get(index_handler::<P>))
        .route("/test/tcp", get(tcp_handler::<P>))
        .route("/test/mysql", get(mysql_handler::<P>))
        .route("/test/mysql-direct", get(mysql_direct_handler::<P>))
        .route("/test/databases", get(databases_handler::<P>))
        .route("/test/users", get(users_handler::<P>))
        .route("/test/complete", get(complete_handler::<P>))
        .route("/test/complete/strict", get(complete_strict_handler::<P>))
        .route("/test/complete/lenient", get(complete_lenient_handler::<P>))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the diagnostic service
///
/// # Errors
///
/// Returns an error if the service fails to bind to the port
pub async fn start(
    orchestrator: Orchestrator<LiveProber>,
    settings: ServerSettings,
) -> anyhow::Result<()> {
    let target = orchestrator.target();
    info!(
        host = %target.host,
        port = target.port,
        user = %target.credentials.user,
        password = "***",
        databases = ?orchestrator.databases(),
        "probe target"
    );

    let state = Arc::new(AppState {
        orchestrator,
        mode: settings.mode,
        full_suite: settings.full_suite,
    });
    let app = router(state);

    // Bind to socket with smart fallback
    let (listener, bind_addr) = match settings.listen {
        Some(addr) => {
            // Explicit address specified - bind to it
            let socket_addr = match addr {
                IpAddr::V4(v4) => format!("{v4}:{}", settings.port),
                IpAddr::V6(v6) => format!("[{v6}]:{}", settings.port),
            };
            let listener = TcpListener::bind(&socket_addr)
                .await
                .with_context(|| format!("failed to bind {socket_addr}"))?;
            (listener, socket_addr)
        }
        None => {
            // Auto mode: try IPv6 first, fallback to IPv4
            if let Ok(l) = TcpListener::bind(format!("[::]:{}", settings.port)).await {
                (l, format!("[::]:{}", settings.port))
            } else {
                let socket_addr = format!("0.0.0.0:{}", settings.port);
                let listener = TcpListener::bind(&socket_addr)
                    .await
                    .with_context(|| format!("failed to bind {socket_addr}"))?;
                (listener, socket_addr)
            }
        }
    };

    info!(
        environment = %settings.mode,
        full_suite = %settings.full_suite,
        "Listening on {bind_addr}"
    );
    for (name, path) in ENDPOINTS {
        info!("  {name}: http://{bind_addr}{path}");
    }

    axum::serve(listener, app.into_make_service())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )]

    use super::*;
    use crate::scenarios::tests::{ScriptedProber, orchestrator};
    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use std::collections::HashSet;
    use tower::ServiceExt;

    fn app(prober: ScriptedProber, mode: Mode, full_suite: FullSuitePolicy) -> Router {
        router(Arc::new(AppState {
            orchestrator: orchestrator(prober),
            mode,
            full_suite,
        }))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn lenient(prober: ScriptedProber) -> Router {
        app(prober, Mode::Development, FullSuitePolicy::Lenient)
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("production".parse::<Mode>().unwrap(), Mode::Production);
        assert_eq!("DEV".parse::<Mode>().unwrap(), Mode::Development);
        assert!("staging".parse::<Mode>().is_err());
        assert_eq!(Mode::default().to_string(), "development");
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_index() {
        let (status, body) = get_json(lenient(ScriptedProber::default()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["status"], "running");
        assert_eq!(body["environment"]["mode"], "development");
        assert_eq!(body["endpoints"]["databases"], "/test/databases");
        assert_eq!(body["endpoints"]["complete-strict"], "/test/complete/strict");
    }

    #[tokio::test]
    async fn test_tcp_failure_is_200() {
        let prober = ScriptedProber {
            tcp_down: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/tcp").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["test"], TEST_TCP);
        assert_eq!(body["config"]["host"], "db.example.com");
        assert_eq!(body["config"]["port"], 33101);
        assert!(body["config"].get("user").is_none());
        assert_eq!(body["result"]["success"], false);
        assert_eq!(body["result"]["error"]["code"], "ECONNREFUSED");
    }

    #[tokio::test]
    async fn test_mysql_failure_is_500_with_result() {
        let prober = ScriptedProber {
            mysql_down: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/mysql").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["test"], TEST_MYSQL);
        assert_eq!(body["config"]["user"], "probe");
        assert_eq!(body["result"]["success"], false);
        assert_eq!(body["result"]["error"]["message"], "connect ETIMEDOUT");
        assert_eq!(body["result"]["error"]["code"], "ETIMEDOUT");
    }

    #[tokio::test]
    async fn test_mysql_success_is_200() {
        let (status, body) = get_json(lenient(ScriptedProber::default()), "/test/mysql").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["success"], true);
        assert_eq!(body["result"]["test"], 1);
    }

    #[tokio::test]
    async fn test_users_failure_is_500_with_result() {
        let prober = ScriptedProber {
            missing: HashSet::from(["dbusers".to_string()]),
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/users").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["test"], TEST_USERS);
        assert_eq!(body["result"]["success"], false);
        assert_eq!(body["result"]["error"]["errno"], 1049);
        assert!(body["result"].get("total_users").is_none());
    }

    #[tokio::test]
    async fn test_databases_all_down_stays_200() {
        let prober = ScriptedProber {
            mysql_down: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/databases").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["failed"], 3);
    }

    #[tokio::test]
    async fn test_databases_summary() {
        let prober = ScriptedProber {
            missing: HashSet::from(["dbmercocamp".to_string()]),
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/databases").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], json!({"total": 3, "successful": 2, "failed": 1}));

        let keys: Vec<_> = body["results"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["dbusers", "dbcheckin", "dbmercocamp"]);
        assert_eq!(body["results"]["dbmercocamp"]["error"]["errno"], 1049);
    }

    #[tokio::test]
    async fn test_users() {
        let (status, body) = get_json(lenient(ScriptedProber::default()), "/test/users").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("config").is_none());
        assert_eq!(body["result"]["success"], true);
        assert_eq!(body["result"]["total_users"], 42);
        assert_eq!(body["result"]["sample_users"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_complete_strict_tcp_gate() {
        let prober = ScriptedProber {
            tcp_down: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/complete/strict").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["test"], TEST_COMPLETE);
        assert!(body["error"].as_str().unwrap().starts_with("TCP failed"));
        assert!(body.get("results").is_none());

        let partial = body["partial_results"].as_object().unwrap();
        assert_eq!(partial.len(), 1);
        assert!(partial.contains_key("tcp"));
    }

    #[tokio::test]
    async fn test_complete_lenient_continues() {
        let prober = ScriptedProber {
            tcp_down: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/complete/lenient").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"]["tcp"]["success"], false);
        assert_eq!(body["results"]["mysql_basic"]["success"], true);
        assert_eq!(body["results"]["databases"]["dbcheckin"]["total"], 7);
        assert_eq!(body["environment"]["platform"], std::env::consts::OS);
        assert_eq!(body["config"]["user"], "probe");
        assert!(body["config"].get("password").is_none());
    }

    #[tokio::test]
    async fn test_complete_uses_configured_policy() {
        let prober = ScriptedProber {
            tcp_down: true,
            ..Default::default()
        };
        let strict = app(prober.clone(), Mode::Development, FullSuitePolicy::Strict);
        let (status, _) = get_json(strict, "/test/complete").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = get_json(lenient(prober), "/test/complete").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mysql_direct_skips_tcp() {
        let prober = ScriptedProber {
            tcp_down: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober.clone()), "/test/mysql-direct").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["test"], TEST_MYSQL_DIRECT);
        assert!(body["results"].get("tcp").is_none());
        assert!(prober.calls().iter().all(|c| c.starts_with("db:")));
    }

    #[tokio::test]
    async fn test_internal_fault_details_in_development() {
        let prober = ScriptedProber {
            panic_on_tcp: true,
            ..Default::default()
        };
        let (status, body) = get_json(lenient(prober), "/test/tcp").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error in tcp-only test");
        assert_eq!(body["details"], "scripted panic");
    }

    #[tokio::test]
    async fn test_internal_fault_hides_details_in_production() {
        let prober = ScriptedProber {
            panic_on_tcp: true,
            ..Default::default()
        };
        let production = app(prober, Mode::Production, FullSuitePolicy::Lenient);
        let (status, body) = get_json(production, "/test/complete").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, body) = get_json(lenient(ScriptedProber::default()), "/test/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }
}
