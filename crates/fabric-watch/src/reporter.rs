//! Controller status reporting
//!
//! One PUT per confirmed transition:
//!
//! ```text
//! PUT {base}/status/{category}/{resource_id}
//! {"status": "UP", "ts": 1760000000000000000}
//!
//! 200 {"success": true, "ret": 0}
//! ```
//!
//! Anything but a 2xx carrying `success: true` is a failure; the caller
//! keeps the transition pending and retries on the next tick.
//!
//! Resource ids are percent-encoded as a single path segment, so ids holding
//! `/`, `?`, `#` or `%` still reach their own endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fabric_core_liveness::{ObjectCategory, Status};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default upper bound for one report round trip
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("controller answered HTTP {0}")]
    Status(u16),

    #[error("controller rejected the report (ret {ret})")]
    Rejected { ret: i64 },

    #[error("invalid controller URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Report body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: String,

    /// Transition time, nanoseconds since the Unix epoch
    pub ts: i64,
}

impl StatusReport {
    /// Body for `status` in the vocabulary of `category`
    pub fn new(category: ObjectCategory, status: Status, changed_at: DateTime<Utc>) -> Self {
        Self {
            status: category.report_word(status).to_string(),
            ts: changed_at.timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}

/// Controller response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub ret: i64,
}

/// Endpoint for one resource under `base`
///
/// Any path already on `base` is kept; `resource_id` becomes exactly one
/// percent-encoded segment.
pub fn report_url(
    base: &Url,
    category: ObjectCategory,
    resource_id: &str,
) -> Result<Url, ReportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ReportError::InvalidUrl {
            url: base.to_string(),
            reason: "cannot be a base".to_string(),
        })?
        .pop_if_empty()
        .push("status")
        .push(category.path_segment())
        .push(resource_id);
    Ok(url)
}

/// Where transitions are pushed
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Deliver one transition; `Ok` only once the controller acknowledged it
    async fn report(
        &self,
        category: ObjectCategory,
        resource_id: &str,
        report: &StatusReport,
    ) -> Result<(), ReportError>;
}

/// `reqwest` client for the controller REST API
#[derive(Debug, Clone)]
pub struct HttpReporter {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpReporter {
    /// Client for the controller at `base_url`, each request bounded by `timeout`
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, ReportError> {
        let raw = base_url.as_ref();
        let base_url = Url::parse(raw).map_err(|e| ReportError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ReportError::InvalidUrl {
                url: raw.to_string(),
                reason: "cannot be a base".to_string(),
            });
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Controller base URL reports are sent under
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl StatusReporter for HttpReporter {
    async fn report(
        &self,
        category: ObjectCategory,
        resource_id: &str,
        report: &StatusReport,
    ) -> Result<(), ReportError> {
        let url = report_url(&self.base_url, category, resource_id)?;
        debug!("PUT {} {}", url, report.status);

        let response = self.client.put(url).json(report).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status(status.as_u16()));
        }

        let ack: ReportAck = response.json().await?;
        if !ack.success {
            return Err(ReportError::Rejected { ret: ack.ret });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::put;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::{Arc, Mutex};

    const ACCEPT: u8 = 0;
    const REJECT: u8 = 1;
    const FAIL: u8 = 2;

    #[derive(Clone, Default)]
    struct Controller {
        received: Arc<Mutex<Vec<(String, String, StatusReport)>>>,
        mode: Arc<AtomicU8>,
    }

    async fn handle(
        State(controller): State<Controller>,
        Path((category, id)): Path<(String, String)>,
        Json(report): Json<StatusReport>,
    ) -> (StatusCode, Json<ReportAck>) {
        controller
            .received
            .lock()
            .unwrap()
            .push((category, id, report));

        match controller.mode.load(Ordering::SeqCst) {
            ACCEPT => (
                StatusCode::OK,
                Json(ReportAck {
                    success: true,
                    ret: 0,
                }),
            ),
            REJECT => (
                StatusCode::OK,
                Json(ReportAck {
                    success: false,
                    ret: 17,
                }),
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(ReportAck::default())),
        }
    }

    async fn serve(controller: Controller) -> String {
        let app = Router::new()
            .route("/status/:category/:id", put(handle))
            .with_state(controller);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_report_body() {
        let at = Utc.timestamp_opt(1_700_000_000, 5).unwrap();

        let link = StatusReport::new(ObjectCategory::LogicalLink, Status::Up, at);
        assert_eq!(link.status, "UP");
        assert_eq!(link.ts, 1_700_000_000_000_000_005);

        let sa = StatusReport::new(ObjectCategory::IpsecSession, Status::Down, at);
        assert_eq!(sa.status, "Idle");

        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["status"], "UP");
        assert_eq!(json["ts"], 1_700_000_000_000_000_005_i64);
    }

    #[test]
    fn test_report_url() {
        let base = Url::parse("http://controller.fabric:8080").unwrap();
        assert_eq!(
            report_url(&base, ObjectCategory::Tunnel, "t1").unwrap().as_str(),
            "http://controller.fabric:8080/status/tunnels/t1"
        );

        let nested = Url::parse("http://controller.fabric/api/").unwrap();
        assert_eq!(
            report_url(&nested, ObjectCategory::IpsecSession, "l7")
                .unwrap()
                .as_str(),
            "http://controller.fabric/api/status/ipsec/l7"
        );
    }

    #[test]
    fn test_report_url_escapes_resource_id() {
        let base = Url::parse("http://controller.fabric").unwrap();
        let url = report_url(&base, ObjectCategory::Port, "gw#2/a?b=1%").unwrap();

        assert_eq!(url.path(), "/status/ports/gw%232%2Fa%3Fb=1%25");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpReporter::new("controller.fabric", REPORT_TIMEOUT),
            Err(ReportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpReporter::new("mailto:ops@fabric", REPORT_TIMEOUT),
            Err(ReportError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_reporter_success() {
        let controller = Controller::default();
        let base = serve(controller.clone()).await;
        let reporter = HttpReporter::new(format!("{}/", base), REPORT_TIMEOUT).unwrap();

        let report = StatusReport::new(ObjectCategory::Port, Status::Down, Utc::now());
        reporter
            .report(ObjectCategory::Port, "p1", &report)
            .await
            .unwrap();

        let received = controller.received.lock().unwrap().clone();
        assert_eq!(
            received,
            vec![("ports".to_string(), "p1".to_string(), report)]
        );
    }

    #[tokio::test]
    async fn test_http_reporter_delivers_awkward_ids_intact() {
        let controller = Controller::default();
        let base = serve(controller.clone()).await;
        let reporter = HttpReporter::new(base, REPORT_TIMEOUT).unwrap();
        let report = StatusReport::new(ObjectCategory::Port, Status::Up, Utc::now());

        for id in ["gw#2", "edge?x=1", "tenant/a", "50%"] {
            reporter
                .report(ObjectCategory::Port, id, &report)
                .await
                .unwrap();
        }

        let ids: Vec<String> = controller
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id, _)| id.clone())
            .collect();
        assert_eq!(ids, vec!["gw#2", "edge?x=1", "tenant/a", "50%"]);
    }

    #[tokio::test]
    async fn test_http_reporter_rejections() {
        let controller = Controller::default();
        let base = serve(controller.clone()).await;
        let reporter = HttpReporter::new(base, REPORT_TIMEOUT).unwrap();
        let report = StatusReport::new(ObjectCategory::Port, Status::Up, Utc::now());

        controller.mode.store(REJECT, Ordering::SeqCst);
        let err = reporter
            .report(ObjectCategory::Port, "p1", &report)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Rejected { ret: 17 }));

        controller.mode.store(FAIL, Ordering::SeqCst);
        let err = reporter
            .report(ObjectCategory::Port, "p1", &report)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Status(500)));
    }

    #[tokio::test]
    async fn test_http_reporter_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter =
            HttpReporter::new(format!("http://{}", addr), Duration::from_secs(1)).unwrap();
        let report = StatusReport::new(ObjectCategory::Port, Status::Up, Utc::now());
        let err = reporter
            .report(ObjectCategory::Port, "p1", &report)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Transport(_)));
    }
}
