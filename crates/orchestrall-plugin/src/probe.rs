// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health probes for plugin installations.
//!
//! Every probe is bounded by the configured timeout. A timeout or transport
//! error is reported as `Unhealthy`, never as an error.

use std::time::Duration;

use orchestrall_core::{
    HealthCheckResult, HealthStatus, HealthSubject, PluginCapability, PluginContext,
};
use tokio::net::TcpStream;
use tracing::debug;

use crate::manifest::{HealthCheckDescriptor, HealthProtocol, PluginManifest};

/// Runs the probe a manifest's health-check descriptor asks for.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                debug!(error = %e, "falling back to default HTTP client for health probes");
                reqwest::Client::new()
            });
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one installation.
    ///
    /// Without a descriptor the registered implementation's hook is used; a
    /// plugin with neither is reported healthy.
    pub async fn probe(
        &self,
        subject: HealthSubject,
        manifest: &PluginManifest,
        implementation: Option<&dyn PluginCapability>,
        ctx: &PluginContext<'_>,
    ) -> HealthCheckResult {
        let check = async {
            match (&manifest.health_check, implementation) {
                (Some(descriptor), implementation) => {
                    self.probe_descriptor(descriptor, implementation, ctx).await
                }
                (None, Some(implementation)) => internal(implementation, ctx).await,
                (None, None) => HealthStatus::Healthy,
            }
        };

        let status = match tokio::time::timeout(self.timeout, check).await {
            Ok(status) => status,
            Err(_) => HealthStatus::Unhealthy(format!(
                "health check timed out after {}ms",
                self.timeout.as_millis()
            )),
        };
        debug!(%subject, ?status, "health probe finished");
        HealthCheckResult::from_status(subject, status)
    }

    async fn probe_descriptor(
        &self,
        descriptor: &HealthCheckDescriptor,
        implementation: Option<&dyn PluginCapability>,
        ctx: &PluginContext<'_>,
    ) -> HealthStatus {
        let endpoint = descriptor.endpoint.as_deref().unwrap_or_default();
        match descriptor.protocol {
            HealthProtocol::Http | HealthProtocol::Https => self.http(endpoint).await,
            HealthProtocol::Tcp => tcp(endpoint).await,
            HealthProtocol::Internal => match implementation {
                Some(implementation) => internal(implementation, ctx).await,
                None => HealthStatus::Unhealthy(
                    "internal health check declared but no implementation is registered".into(),
                ),
            },
        }
    }

    async fn http(&self, url: &str) -> HealthStatus {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => HealthStatus::Healthy,
            // A 4xx means the endpoint itself is wrong; it never recovers
            // without a manifest change, so it counts toward failure.
            Ok(resp) if resp.status().is_server_error() || resp.status().is_client_error() => {
                HealthStatus::Unhealthy(format!("{url} returned {}", resp.status()))
            }
            Ok(resp) => HealthStatus::Degraded(format!("{url} returned {}", resp.status())),
            Err(e) if e.is_timeout() => HealthStatus::Unhealthy(format!("{url} timed out")),
            Err(e) if e.is_connect() => {
                HealthStatus::Unhealthy(format!("{url}: connection refused"))
            }
            Err(e) => HealthStatus::Unhealthy(format!("{url}: {e}")),
        }
    }
}

async fn tcp(address: &str) -> HealthStatus {
    match TcpStream::connect(address).await {
        Ok(_) => HealthStatus::Healthy,
        Err(e) => HealthStatus::Unhealthy(format!("{address}: {e}")),
    }
}

async fn internal(implementation: &dyn PluginCapability, ctx: &PluginContext<'_>) -> HealthStatus {
    match implementation.health_check(ctx).await {
        Ok(status) => status,
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrall_core::{HealthState, ResolvedConfig, TenantId};
    use orchestrall_test_utils::MockPlugin;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::format::DocumentFormat;
    use crate::manifest::ManifestValidator;

    fn manifest(health: &str) -> PluginManifest {
        let content = format!(
            "id = \"crm\"\nversion = \"1.0.0\"\ncategory = \"sales\"\n{health}"
        );
        ManifestValidator::parse(&content, DocumentFormat::Toml).unwrap()
    }

    fn http_manifest(url: &str) -> PluginManifest {
        manifest(&format!(
            "[healthCheck]\nprotocol = \"http\"\nendpoint = \"{url}\"\nintervalSeconds = 5\n"
        ))
    }

    async fn run(
        prober: &HealthProber,
        manifest: &PluginManifest,
        implementation: Option<&dyn PluginCapability>,
    ) -> HealthCheckResult {
        let tenant = TenantId::parse("acme").unwrap();
        let config = ResolvedConfig::new();
        let ctx = PluginContext {
            tenant: &tenant,
            plugin: "crm",
            config: &config,
        };
        let subject = HealthSubject::Plugin {
            tenant: tenant.clone(),
            plugin: "crm".into(),
        };
        prober.probe(subject, manifest, implementation, &ctx).await
    }

    #[tokio::test]
    async fn http_probe_maps_status_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/not-modified"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let prober = HealthProber::new(Duration::from_secs(2));
        let ok = run(&prober, &http_manifest(&format!("{}/ok", server.uri())), None).await;
        assert_eq!(ok.status, HealthState::Healthy);

        let broken = run(&prober, &http_manifest(&format!("{}/broken", server.uri())), None).await;
        assert_eq!(broken.status, HealthState::Unhealthy);
        assert!(broken.message.unwrap().contains("503"));

        let missing = run(&prober, &http_manifest(&format!("{}/missing", server.uri())), None).await;
        assert_eq!(missing.status, HealthState::Unhealthy);
        assert!(missing.message.unwrap().contains("404"));

        let cached = run(&prober, &http_manifest(&format!("{}/not-modified", server.uri())), None).await;
        assert_eq!(cached.status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn slow_http_endpoint_times_out_as_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let prober = HealthProber::new(Duration::from_millis(100));
        let result = run(&prober, &http_manifest(&format!("{}/health", server.uri())), None).await;
        assert_eq!(result.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn tcp_probe_reports_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let prober = HealthProber::new(Duration::from_secs(1));

        let tcp_manifest = |addr: String| {
            manifest(&format!(
                "[healthCheck]\nprotocol = \"tcp\"\nendpoint = \"{addr}\"\nintervalSeconds = 5\n"
            ))
        };

        let up = run(&prober, &tcp_manifest(address.to_string()), None).await;
        assert_eq!(up.status, HealthState::Healthy);

        drop(listener);
        let down = run(&prober, &tcp_manifest(address.to_string()), None).await;
        assert_eq!(down.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn internal_probe_uses_implementation() {
        let internal_manifest =
            manifest("[healthCheck]\nprotocol = \"internal\"\nintervalSeconds = 5\n");
        let prober = HealthProber::new(Duration::from_secs(1));

        let plugin = MockPlugin::new("crm").with_health_sequence(vec![HealthStatus::Degraded(
            "queue backlog".into(),
        )]);
        let result = run(&prober, &internal_manifest, Some(&plugin)).await;
        assert_eq!(result.status, HealthState::Degraded);
        assert_eq!(result.message.as_deref(), Some("queue backlog"));
        assert_eq!(plugin.health_calls(), 1);

        let missing = run(&prober, &internal_manifest, None).await;
        assert_eq!(missing.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn hanging_implementation_is_bounded_by_timeout() {
        let prober = HealthProber::new(Duration::from_millis(50));
        let plugin = MockPlugin::new("crm").hanging_health_check();
        let result = run(&prober, &manifest(""), Some(&plugin)).await;
        assert_eq!(result.status, HealthState::Unhealthy);
        assert!(result.message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn no_descriptor_and_no_implementation_is_healthy() {
        let prober = HealthProber::new(Duration::from_secs(1));
        let result = run(&prober, &manifest(""), None).await;
        assert!(result.is_healthy());
    }
}
