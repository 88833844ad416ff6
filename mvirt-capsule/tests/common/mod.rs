//! Test helpers for mvirt-capsule REST tests.

use std::sync::Arc;
use std::time::Duration;

use mvirt_capsule::rest::{AppState, create_router};
use mvirt_capsule::{
    CapsuleAuditLogger, LocalCompute, LocalComputeConfig, MemoryStore, Orchestrator,
    OrchestratorConfig, RandomNameGenerator,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Images the test backend knows about.
pub const TEST_IMAGES: &[&str] = &["nginx", "busybox", "alpine:3.19"];

/// In-process server on an ephemeral port with a reqwest client pointed at it.
pub struct TestServer {
    pub base_url: String,
    client: reqwest::Client,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server with the default orchestrator configuration.
    pub async fn spawn() -> Self {
        Self::spawn_with(OrchestratorConfig::default()).await
    }

    pub async fn spawn_with(config: OrchestratorConfig) -> Self {
        let compute = LocalCompute::new(LocalComputeConfig {
            images: TEST_IMAGES.iter().map(|s| s.to_string()).collect(),
            start_delay: Duration::from_millis(20),
        });
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStore::default()),
            Arc::new(compute),
            Arc::new(RandomNameGenerator),
            Arc::new(CapsuleAuditLogger::new_noop()),
            config,
        );
        let router = create_router(Arc::new(AppState {
            orchestrator: Arc::new(orchestrator),
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Test server failed");
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("POST request failed")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("DELETE request failed")
    }

    /// Create a capsule in `project` and return its JSON view.
    pub async fn create_capsule(&self, project: &str, body: &Value) -> Value {
        let response = self
            .post_json(&format!("/projects/{}/capsules", project), body)
            .await;
        assert_eq!(response.status(), 202, "create failed");
        response.json().await.expect("Invalid capsule body")
    }

    /// Poll a capsule until it reports `status`.
    pub async fn wait_for_status(&self, id: &str, status: &str) -> Value {
        for _ in 0..50 {
            let body: Value = self
                .get(&format!("/capsules/{}", id))
                .await
                .json()
                .await
                .expect("Invalid capsule body");
            if body["status"] == status {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("capsule {} never reached {}", id, status);
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
