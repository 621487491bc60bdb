use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::ToSocketAddrs;

use crate::classify::{self, WellKnownPorts};
use crate::error::ResultOkLogExt;
use crate::exposition;
use crate::inspector::{Inspector, Snapshot};

/// Path of the scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

async fn metrics(State(inspector): State<Inspector>) -> Response {
    let snapshot = tokio::task::spawn_blocking(move || inspector.snapshot())
        .await
        .unwrap_or_else(|err| {
            log::error!("failed to read host state: {}", err);
            Snapshot::default()
        });

    let usage = classify::classify(&snapshot.connections, WellKnownPorts::standard());
    let body = exposition::render(&snapshot.pod_name, snapshot.port_total, &usage)
        .ok_log()
        .unwrap_or_default();
    log::trace!(
        "served {} connections in {} buckets",
        snapshot.connections.len(),
        usage.label_count()
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, exposition::content_type())],
        body,
    )
        .into_response()
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new(inspector: Inspector) -> Self {
        let router = axum::Router::new()
            .route(METRICS_PATH, any(metrics))
            .with_state(inspector);
        Self { router }
    }

    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    /// Binds `addr` and serves requests until the server stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the address can't be bound (e.g. port already in use).
    pub async fn listen(self, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router.into_make_service()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use std::fs;
    use std::path::Path;
    use tower::ServiceExt;

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   116        0 20598 1
   1: 0100007F:B5A4 0100007F:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 31337 1
   2: 0100007F:B5A6 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 31338 1
   3: 0100007F:B5A8 0100007F:01BB 06 00000000:00000000 00:00000000 00000000  1000        0 31339 1
";

    fn write_file(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    async fn scrape(router: axum::Router, method: Method) -> (StatusCode, String, String) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(METRICS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    fn sample_value(body: &str, prefix: &str) -> f64 {
        let line = body
            .lines()
            .find(|line| line.starts_with(prefix))
            .unwrap_or_else(|| panic!("no sample `{prefix}` in:\n{body}"));
        line.rsplit_once(' ').unwrap().1.parse().unwrap()
    }

    #[tokio::test]
    async fn test_metrics_from_fake_proc() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "sys/kernel/hostname", "api-0\n");
        write_file(dir.path(), "sys/net/ipv4/ip_local_port_range", "32768\t60999\n");
        write_file(dir.path(), "net/tcp", TCP_TABLE);

        let server = APIServer::new(Inspector::new(dir.path()));
        let (status, content_type, body) = scrape(server.router(), Method::GET).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, exposition::content_type());
        assert_eq!(sample_value(&body, "port_total{pod_name=\"api-0\"}"), 28232.0);
        assert_eq!(
            sample_value(
                &body,
                "port_used{pod_name=\"api-0\",remote_addr=\"127.0.0.1 [443:https]\",state=\"ESTABLISHED\"}"
            ),
            1.0
        );
        assert_eq!(
            sample_value(
                &body,
                "port_used{pod_name=\"api-0\",remote_addr=\"127.0.0.1 [443:https]\",state=\"TIME_WAIT\"}"
            ),
            1.0
        );
        assert_eq!(
            sample_value(
                &body,
                "port_used{pod_name=\"api-0\",remote_addr=\"OTHER\",state=\"ESTABLISHED\"}"
            ),
            1.0
        );
        assert_eq!(
            sample_value(
                &body,
                "port_used{pod_name=\"api-0\",remote_addr=\"0.0.0.0 [0:unknown]\",state=\"LISTEN\"}"
            ),
            1.0
        );
    }

    #[tokio::test]
    async fn test_metrics_with_unreadable_proc() {
        let dir = tempfile::tempdir().unwrap();
        let server = APIServer::new(Inspector::new(dir.path().join("missing")));
        let (status, _, body) = scrape(server.router(), Method::GET).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sample_value(&body, "port_total{pod_name=\"\"}"), 0.0);
        assert_eq!(sample_value(&body, "port_usage{pod_name=\"\"}"), 0.0);
        assert!(!body.contains("port_used{"));
    }

    #[tokio::test]
    async fn test_metrics_accepts_any_method() {
        let dir = tempfile::tempdir().unwrap();
        let server = APIServer::new(Inspector::new(dir.path()));
        let (status, _, body) = scrape(server.router(), Method::POST).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# TYPE port_usage gauge\n"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let server = APIServer::new(Inspector::default());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
