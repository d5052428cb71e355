/// Status board and HTTP endpoint
/// Collects check snapshots as they change and serves them as JSON, plus
/// Prometheus metrics and start/stop control for monitoring systems.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::check::{Check, CheckSnapshot, Level, Observer};

/// Timeout for reading an HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("unknown check '{0}'")]
    UnknownCheck(String),

    #[error("check '{0}' is not waiting to run")]
    NotWaiting(String),

    #[error("check '{0}' is not running")]
    NotRunning(String),
}

/// Overall state as served on `/`
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub details: BTreeMap<String, CheckSnapshot>,
    pub fail: Vec<String>,
    pub warn: Vec<String>,
    pub n_fail: usize,
    pub n_warn: usize,
}

/// Latest snapshot of every check, plus control access to the checks
pub struct StatusBoard {
    checks: BTreeMap<String, Arc<Check>>,
    snapshots: Mutex<BTreeMap<String, CheckSnapshot>>,
}

impl StatusBoard {
    pub fn new(checks: impl IntoIterator<Item = Arc<Check>>) -> Self {
        let checks: BTreeMap<String, Arc<Check>> =
            checks.into_iter().map(|c| (c.name.clone(), c)).collect();
        let snapshots = checks
            .iter()
            .map(|(name, c)| (name.clone(), c.snapshot()))
            .collect();
        Self {
            checks,
            snapshots: Mutex::new(snapshots),
        }
    }

    fn check(&self, name: &str) -> Result<&Arc<Check>, StatusError> {
        self.checks
            .get(name)
            .ok_or_else(|| StatusError::UnknownCheck(name.to_string()))
    }

    pub fn snapshot(&self, name: &str) -> Option<CheckSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn summary(&self) -> Summary {
        let details = self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let by_level = |level: Level| -> Vec<String> {
            details
                .values()
                .filter(|s| s.level == level)
                .map(|s| s.name.clone())
                .collect()
        };
        let fail = by_level(Level::Fail);
        let warn = by_level(Level::Warn);
        Summary {
            n_fail: fail.len(),
            n_warn: warn.len(),
            fail,
            warn,
            details,
        }
    }

    /// Wake a check that is waiting for its next run
    pub fn start(&self, name: &str) -> Result<(), StatusError> {
        if self.check(name)?.request_start() {
            Ok(())
        } else {
            Err(StatusError::NotWaiting(name.to_string()))
        }
    }

    /// Stop a running check, optionally counting the run as failed
    pub fn stop(&self, name: &str, count_as_failure: bool) -> Result<(), StatusError> {
        if self.check(name)?.request_stop(count_as_failure) {
            Ok(())
        } else {
            Err(StatusError::NotRunning(name.to_string()))
        }
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Observer for StatusBoard {
    fn on_update(&self, snapshot: CheckSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.name.clone(), snapshot);
    }
}

/// Bind the status server
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind status server on {}:{}", host, port))?;
    info!("Status server listening on http://{}/", listener.local_addr()?);
    Ok(listener)
}

/// Serve requests until `cancel_token` fires
pub async fn serve(listener: TcpListener, board: Arc<StatusBoard>, cancel_token: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let board = board.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut socket, &board).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Status server shutting down");
                break;
            }
        }
    }
}

async fn handle_request(socket: &mut TcpStream, board: &StatusBoard) -> std::io::Result<()> {
    let mut buf = [0u8; 2048];

    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("GET");
    let path = parts.next().unwrap_or("/");

    let response = route(board, method, path);
    socket.write_all(response.to_http().as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn json(code: u16, body: String) -> Self {
        Self {
            code,
            content_type: "application/json",
            body,
        }
    }

    fn error(code: u16, message: &str) -> Self {
        Self::json(code, serde_json::json!({ "error": message }).to_string())
    }

    fn reason(&self) -> &'static str {
        match self.code {
            200 => "OK",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            _ => "Internal Server Error",
        }
    }

    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.code,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// Map a request line to a response
pub fn route(board: &StatusBoard, method: &str, path: &str) -> Response {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path.trim_matches('/').splitn(2, '/').collect();

    match segments.as_slice() {
        [""] => json_or_error(&board.summary()),
        ["health"] | ["healthz"] => {
            let summary = board.summary();
            Response::json(
                200,
                serde_json::json!({
                    "status": "healthy",
                    "checks": board.len(),
                    "n_fail": summary.n_fail,
                    "n_warn": summary.n_warn,
                })
                .to_string(),
            )
        }
        ["metrics"] => Response {
            code: 200,
            content_type: "text/plain; version=0.0.4",
            body: build_metrics(&board.summary()),
        },
        [action @ ("start" | "stop" | "fail"), name] => {
            if method != "GET" && method != "POST" {
                return Response::error(405, "use GET or POST");
            }
            let name = match urlencoding::decode(name) {
                Ok(n) => n.into_owned(),
                Err(_) => return Response::error(404, "bad check name"),
            };
            let result = match *action {
                "start" => board.start(&name),
                "stop" => board.stop(&name, false),
                _ => board.stop(&name, true),
            };
            match result {
                Ok(()) => {
                    info!("{}: {} via status server", name, action);
                    Response::json(200, serde_json::json!({ "ok": true, "check": name }).to_string())
                }
                Err(e @ StatusError::UnknownCheck(_)) => Response::error(404, &e.to_string()),
                Err(e) => Response::error(409, &e.to_string()),
            }
        }
        ["check", name] => match urlencoding::decode(name).ok().and_then(|n| board.snapshot(&n)) {
            Some(snapshot) => json_or_error(&snapshot),
            None => Response::error(404, "Not Found"),
        },
        _ => Response::error(404, "Not Found"),
    }
}

fn json_or_error<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => Response::json(200, body),
        Err(e) => Response::error(500, &e.to_string()),
    }
}

/// Escape a Prometheus label value
fn label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn build_metrics(summary: &Summary) -> String {
    // Prometheus-compatible metrics format
    let mut body = String::from(
        "# HELP calltest_runs_total Runs performed per check\n\
         # TYPE calltest_runs_total counter\n",
    );
    for s in summary.details.values() {
        body.push_str(&format!(
            "calltest_runs_total{{check=\"{}\"}} {}\n",
            label_value(&s.name),
            s.n_run
        ));
    }
    body.push_str(
        "# HELP calltest_failures_total Failed runs per check\n\
         # TYPE calltest_failures_total counter\n",
    );
    for s in summary.details.values() {
        body.push_str(&format!(
            "calltest_failures_total{{check=\"{}\"}} {}\n",
            label_value(&s.name),
            s.n_fail
        ));
    }
    body.push_str(
        "# HELP calltest_consecutive_failures Failures since the last success\n\
         # TYPE calltest_consecutive_failures gauge\n",
    );
    for s in summary.details.values() {
        body.push_str(&format!(
            "calltest_consecutive_failures{{check=\"{}\"}} {}\n",
            label_value(&s.name),
            s.fail_count
        ));
    }
    body.push_str(&format!(
        "# HELP calltest_failing Checks at fail level\n\
         # TYPE calltest_failing gauge\n\
         calltest_failing {}\n\
         # HELP calltest_warning Checks at warn level\n\
         # TYPE calltest_warning gauge\n\
         calltest_warning {}\n",
        summary.n_fail, summary.n_warn
    ));
    body
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Arbitrary paths never panic and always produce a status line
        #[test]
        fn route_never_panics(path in "/[a-z%0-9/?=]{0,40}", method in "(GET|POST|PUT)") {
            let b = StatusBoard::new(Vec::new());
            let r = route(&b, &method, &path);
            prop_assert!(r.to_http().starts_with("HTTP/1.1 "));
        }

        /// Content-Length always matches the body
        #[test]
        fn content_length_matches(path in "/[a-z]{0,10}") {
            let b = StatusBoard::new(Vec::new());
            let r = route(&b, "GET", &path);
            let http = r.to_http();
            let (head, body) = http.split_once("\r\n\r\n").unwrap();
            let expected = format!("Content-Length: {}", body.len());
            prop_assert!(head.contains(&expected));
        }
    }
}
