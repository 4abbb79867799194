//! Typed HTTP client for the cadence daemon REST API.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::NodeTarget;
use crate::domain::intent::{IntentRecord, Trigger};
use crate::domain::types::{DaemonHealth, FleetStatus, NodeView, ReconcileResult};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9200";

pub struct CadenceClient {
    base_url: String,
    http: Client,
}

impl CadenceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Resolve a client from the configured daemon targets.
    /// `None` name → localhost default. `Some(name)` → look up in the map.
    pub fn from_target(
        name: Option<&str>,
        targets: &HashMap<String, NodeTarget>,
    ) -> Result<Self> {
        match name {
            None => Self::new(DEFAULT_BASE_URL),
            Some(n) => match targets.get(n) {
                Some(target) => Self::new(&target.url),
                None => bail!(
                    "daemon '{}' not found in config. Available: {}",
                    n,
                    if targets.is_empty() {
                        "(none configured)".to_string()
                    } else {
                        targets.keys().cloned().collect::<Vec<_>>().join(", ")
                    }
                ),
            },
        }
    }

    pub async fn health(&self) -> Result<DaemonHealth> {
        self.send(self.http.get(self.url("/health"))).await
    }

    pub async fn fleet(&self) -> Result<FleetStatus> {
        self.send(self.http.get(self.url("/api/v1/fleet"))).await
    }

    pub async fn nodes(&self) -> Result<Vec<NodeView>> {
        self.send(self.http.get(self.url("/api/v1/nodes"))).await
    }

    pub async fn node(&self, name: &str) -> Result<NodeView> {
        self.send(self.http.get(self.url(&format!("/api/v1/nodes/{name}"))))
            .await
    }

    pub async fn register(&self, name: &str) -> Result<NodeView> {
        self.send(self.http.post(self.url(&format!("/api/v1/nodes/{name}"))))
            .await
    }

    pub async fn put_intent(&self, name: &str, intent: &IntentRecord) -> Result<NodeView> {
        self.send_json(
            self.http.put(self.url(&format!("/api/v1/nodes/{name}/intent"))),
            intent,
        )
        .await
    }

    pub async fn report(&self, name: &str, trigger: &Trigger) -> Result<NodeView> {
        self.send_json(
            self.http.post(self.url(&format!("/api/v1/nodes/{name}/events"))),
            trigger,
        )
        .await
    }

    pub async fn reconcile(&self) -> Result<ReconcileResult> {
        self.send(self.http.post(self.url("/api/v1/reconcile"))).await
    }

    // ── Internal helpers ───────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        body: &B,
    ) -> Result<T> {
        self.send(req.json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await.context("sending request to cadence daemon")?;
        let url = resp.url().to_string();
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", url, status, body);
        }

        resp.json()
            .await
            .with_context(|| format!("parsing response from {}", url))
    }
}
