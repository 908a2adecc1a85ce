use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::mysql::MySqlDatabaseError;
use std::{fmt, io, time::Duration};

/// Classification of a transport or database fault
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub errno: Option<i64>,
    pub message: String,
}

impl ErrorDetail {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            errno: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Fault raised when no connect/error event arrived in time
    #[must_use]
    pub fn timeout() -> Self {
        Self::new("Timeout").with_code("ETIMEDOUT")
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, self.errno) {
            (Some(code), Some(errno)) => write!(f, "{} ({code}, errno {errno})", self.message),
            (Some(code), None) => write!(f, "{} ({code})", self.message),
            (None, Some(errno)) => write!(f, "{} (errno {errno})", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Best-effort socket-level code for an I/O error kind
fn io_code(err: &io::Error) -> Option<&'static str> {
    let code = match err.kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::HostUnreachable => "EHOSTUNREACH",
        io::ErrorKind::NetworkUnreachable => "ENETUNREACH",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::UnexpectedEof => "PROTOCOL_CONNECTION_LOST",
        _ => {
            // resolver failures surface as uncategorized errors
            let message = err.to_string();
            if message.contains("lookup") || message.contains("resolve") {
                "ENOTFOUND"
            } else {
                return None;
            }
        }
    };
    Some(code)
}

impl From<&io::Error> for ErrorDetail {
    fn from(err: &io::Error) -> Self {
        Self {
            code: io_code(err).map(String::from),
            errno: err.raw_os_error().map(i64::from),
            message: err.to_string(),
        }
    }
}

/// Symbolic name for the MySQL server errors a probe commonly hits
const fn mysql_code(number: u16) -> Option<&'static str> {
    match number {
        1044 => Some("ER_DBACCESS_DENIED_ERROR"),
        1045 => Some("ER_ACCESS_DENIED_ERROR"),
        1049 => Some("ER_BAD_DB_ERROR"),
        1054 => Some("ER_BAD_FIELD_ERROR"),
        1064 => Some("ER_PARSE_ERROR"),
        1130 => Some("ER_HOST_NOT_PRIVILEGED"),
        1142 => Some("ER_TABLEACCESS_DENIED_ERROR"),
        1146 => Some("ER_NO_SUCH_TABLE"),
        1226 => Some("ER_USER_LIMIT_REACHED"),
        1040 => Some("ER_CON_COUNT_ERROR"),
        _ => None,
    }
}

impl From<&sqlx::Error> for ErrorDetail {
    fn from(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                match db_err.as_error().downcast_ref::<MySqlDatabaseError>() {
                    Some(mysql_err) => Self {
                        code: mysql_code(mysql_err.number())
                            .map(String::from)
                            .or_else(|| mysql_err.code().map(String::from)),
                        errno: Some(i64::from(mysql_err.number())),
                        message: mysql_err.message().to_string(),
                    },
                    None => Self {
                        code: db_err.code().map(|code| code.into_owned()),
                        errno: None,
                        message: db_err.message().to_string(),
                    },
                }
            }
            sqlx::Error::Io(io_err) => Self::from(io_err),
            sqlx::Error::PoolTimedOut => Self::new(err.to_string()).with_code("ETIMEDOUT"),
            sqlx::Error::Tls(_) => Self::new(err.to_string()).with_code("HANDSHAKE_SSL_ERROR"),
            sqlx::Error::Protocol(_) => Self::new(err.to_string()).with_code("PROTOCOL_ERROR"),
            _ => Self::new(err.to_string()),
        }
    }
}

/// Result of one probe invocation
///
/// `payload` is flattened into the serialized object, so a liveness probe
/// reads `{"success":true,"duration_ms":3,"test":1,"version":"..."}`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorDetail>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ProbeOutcome {
    #[must_use]
    pub fn succeeded(elapsed: Duration, payload: Map<String, Value>) -> Self {
        Self {
            success: true,
            duration_ms: millis(elapsed),
            error: None,
            payload,
        }
    }

    #[must_use]
    pub fn failed(elapsed: Duration, error: ErrorDetail) -> Self {
        Self {
            success: false,
            duration_ms: millis(elapsed),
            error: Some(error),
            payload: Map::new(),
        }
    }

    /// Failure message, if any
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[inline]
pub(crate) fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
