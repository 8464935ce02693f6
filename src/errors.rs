//! Classification of raw network failures into a closed, user-facing
//! error taxonomy. The REST layer and dashboards never parse raw error
//! strings; they only ever see an `ErrorKind`.

use serde::Serialize;
use thiserror::Error;

/// Closed set of user-facing command failures. `Busy` is deliberately
/// not here: a rejected dispatch is a concurrency-control outcome, not
/// a network error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("shutdown agent is not running on the target host")]
    AgentNotRunning,
    #[error("host did not respond in time")]
    HostUnresponsive,
    #[error("host could not be found")]
    HostNotFound,
    #[error("no MAC address is known for this host")]
    MissingMacAddress,
    #[error("network is unreachable")]
    NetworkUnreachable,
    #[error("request failed")]
    RequestFailed,
}

/// Maps raw failure text from the network layer to an `ErrorKind`.
///
/// Case-insensitive substring matching, first match wins. The order is
/// fixed: refused before timeout before not-found, so a message like
/// "connection refused after timeout" classifies as the agent being
/// down rather than the host being slow. Absent or empty input falls
/// through to `RequestFailed`.
pub fn classify(raw: Option<&str>) -> ErrorKind {
    let Some(raw) = raw else {
        return ErrorKind::RequestFailed;
    };
    let msg = raw.to_ascii_lowercase();

    const RULES: &[(&[&str], ErrorKind)] = &[
        (&["connection refused", "econnrefused"], ErrorKind::AgentNotRunning),
        (&["timed out", "timeout"], ErrorKind::HostUnresponsive),
        (
            &["host not found", "name or service not known", "no such host", "unknown host"],
            ErrorKind::HostNotFound,
        ),
        (&["no mac address", "missing mac"], ErrorKind::MissingMacAddress),
        (&["network is unreachable", "network unreachable"], ErrorKind::NetworkUnreachable),
    ];

    for (needles, kind) in RULES {
        if needles.iter().any(|n| msg.contains(n)) {
            return *kind;
        }
    }
    ErrorKind::RequestFailed
}

/// Convenience for `anyhow` chains: classifies the full error chain,
/// not just the outermost context message.
pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    classify(Some(&format!("{err:#}")))
}
