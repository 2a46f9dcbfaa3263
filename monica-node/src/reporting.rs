//! Periodic heartbeat reporting to the controller fleet.
//!
//! One cycle: collect, seal, deliver, sleep. Endpoints are redundant, not
//! load-balanced: every configured endpoint gets the report every cycle, and
//! the cycle succeeds when at least one accepts. Controllers must tolerate
//! duplicate reports; that trade favors availability over exactly-once
//! delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::crypto::CipherChannel;
use crate::identity::NodeIdentity;
use crate::metrics::{MetricsSample, ServiceStatus, SystemProfile};

/// One full state report, sealed and fanned out each cycle. Transient: lives
/// for the duration of one send attempt.
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub system_info: SystemProfile,
    pub metrics: MetricsSample,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceStatus>,
}

/// The reporting orchestrator. Owns the HTTP client and the endpoint list
/// for the duration of each cycle.
pub struct Reporter {
    identity: Arc<NodeIdentity>,
    profile: Arc<SystemProfile>,
    cipher: Arc<CipherChannel>,
    endpoints: Vec<String>,
    watched_services: Vec<String>,
    cycle_interval: Duration,
    client: reqwest::Client,
}

impl Reporter {
    pub fn new(
        config: &NodeConfig,
        identity: Arc<NodeIdentity>,
        profile: Arc<SystemProfile>,
        cipher: Arc<CipherChannel>,
    ) -> Result<Self> {
        // Advisory identification for controller routing and logs; the
        // sealed payload remains the source of truth.
        let user_agent = format!(
            "Monica-Node/{} ({})",
            env!("CARGO_PKG_VERSION"),
            identity.client_tag()
        );
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            identity,
            profile,
            cipher,
            endpoints: config.controller_endpoints.clone(),
            watched_services: config.watched_services.clone(),
            cycle_interval: config.heartbeat_interval(),
            client,
        })
    }

    /// COLLECT -> ENCRYPT -> DELIVER -> SLEEP, forever. A failed cycle is
    /// logged and the loop continues at the normal interval; the only exit
    /// is process shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Reporting every {:?} to {} controller endpoint(s)",
            self.cycle_interval,
            self.endpoints.len()
        );
        let mut timer = interval(self.cycle_interval);
        loop {
            timer.tick().await;
            if let Err(e) = self.run_cycle().await {
                error!("Heartbeat cycle failed: {e:#}");
            }
        }
    }

    /// One reporting cycle. Errors only when no endpoint accepted the report.
    async fn run_cycle(&self) -> Result<()> {
        let report = self.assemble_report().await;
        let payload = self
            .cipher
            .seal(&report)
            .context("Failed to seal heartbeat report")?;

        let accepted = self.deliver(payload).await;
        if accepted == 0 {
            anyhow::bail!("no controller endpoint accepted the report");
        }
        debug!("Heartbeat accepted by {}/{} endpoints", accepted, self.endpoints.len());
        Ok(())
    }

    async fn assemble_report(&self) -> HeartbeatReport {
        let metrics = MetricsSample::collect().await;
        let mut services = Vec::with_capacity(self.watched_services.len());
        for name in &self.watched_services {
            services.push(ServiceStatus::probe(name).await);
        }

        HeartbeatReport {
            node_id: self.identity.node_id.clone(),
            kind: "heartbeat".to_string(),
            system_info: (*self.profile).clone(),
            metrics,
            services,
        }
    }

    /// Fan the sealed payload out to every endpoint concurrently. Failures
    /// are isolated per endpoint; returns how many accepted the report.
    async fn deliver(&self, payload: Vec<u8>) -> usize {
        let attempts = self.endpoints.iter().map(|endpoint| {
            let client = self.client.clone();
            let body = payload.clone();
            async move {
                match client
                    .post(endpoint)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(body)
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => true,
                    Ok(response) => {
                        warn!("Controller {} rejected report: {}", endpoint, response.status());
                        false
                    }
                    Err(e) => {
                        warn!("Controller {} unreachable: {}", endpoint, e);
                        false
                    }
                }
            }
        });

        join_all(attempts).await.into_iter().filter(|accepted| *accepted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP endpoint that accepts anything with a 200.
    async fn accepting_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        )
                        .await;
                });
            }
        });
        format!("http://{addr}/api/v1/report")
    }

    /// Endpoint where nothing listens: connection refused.
    async fn refusing_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/api/v1/report")
    }

    fn test_reporter(endpoints: Vec<String>) -> Reporter {
        let toml = format!(
            r#"
            encryption_key = "{}"
            controller_endpoints = [{}]
            heartbeat_interval_secs = 1
            request_timeout_secs = 5
            "#,
            BASE64.encode([0x42u8; KEY_SIZE]),
            endpoints
                .iter()
                .map(|e| format!("{e:?}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        let config = NodeConfig::from_toml(&toml, "test").unwrap();
        let identity = Arc::new(NodeIdentity {
            node_id: "0123abcd".to_string(),
            hostname: "test-host".to_string(),
            created_at: Utc::now(),
        });
        let profile = Arc::new(SystemProfile::capture());
        let cipher = Arc::new(CipherChannel::new(&config.encryption_key).unwrap());
        Reporter::new(&config, identity, profile, cipher).unwrap()
    }

    #[tokio::test]
    async fn cycle_succeeds_when_one_of_three_endpoints_accepts() {
        let endpoints = vec![
            refusing_endpoint().await,
            refusing_endpoint().await,
            accepting_endpoint().await,
        ];
        let reporter = test_reporter(endpoints);
        reporter.run_cycle().await.unwrap();
    }

    #[tokio::test]
    async fn cycle_fails_when_all_endpoints_fail() {
        let endpoints = vec![refusing_endpoint().await, refusing_endpoint().await];
        let reporter = test_reporter(endpoints);
        assert!(reporter.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn report_serializes_with_heartbeat_type_tag() {
        let reporter = test_reporter(vec!["http://127.0.0.1:1/report".to_string()]);
        let report = reporter.assemble_report().await;
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["node_id"], "0123abcd");
        assert!(value["system_info"]["cpu_count"].as_u64().unwrap() > 0);
        assert!(value["metrics"]["memory"]["total"].as_u64().unwrap() > 0);
        // No watched services configured: the field stays off the wire.
        assert!(value.get("services").is_none());
    }
}
