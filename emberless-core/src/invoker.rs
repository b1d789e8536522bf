// SPDX-License-Identifier: Apache-2.0

//! Invocation bridge.
//!
//! Orchestration glue between the request router and a backend: resolves the
//! function configuration, ensures the backend container is running, and
//! issues the invocation POST, all wrapped in a per-function circuit
//! breaker. The raw backend response is returned untranslated; mapping it to
//! a protocol response is the router's concern.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::config::DaemonConfig;
use crate::error::{EmberError, EmberResult};
use crate::lifecycle::LifecycleManager;
use crate::registry::FunctionRegistry;
use crate::types::FunctionName;

/// Fixed invocation path every backend serves.
pub const INVOCATION_PATH: &str = "/2015-03-31/functions/function/invocations";

/// Environment variable carrying the URL backends use to call back into
/// this deployment's front door.
pub const CALLBACK_ENV_VAR: &str = "EMBERLESS_CALLBACK_URL";

/// Tunables for the invocation bridge.
#[derive(Debug, Clone)]
pub struct InvokerSettings {
    /// Injected into every backend as [`CALLBACK_ENV_VAR`]. Resolved once
    /// per process; startup fails if the configuration cannot supply it.
    pub callback_url: String,
    /// Port the backends serve invocations on.
    pub invoke_port: u16,
    /// Consecutive failures before a function's breaker opens.
    pub failure_threshold: u32,
    /// Cooling-off period before a half-open trial.
    pub recovery_timeout: Duration,
}

impl InvokerSettings {
    pub fn from_daemon(config: &DaemonConfig) -> Self {
        Self {
            callback_url: config.callback_url.clone(),
            invoke_port: config.invoke_port.value(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
        }
    }
}

/// Raw response from a backend invocation.
///
/// Status, headers, and body are passed through for protocol-specific
/// translation one layer up.
#[derive(Debug)]
pub struct InvocationResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Bridges invocation requests to backend containers.
pub struct Invoker {
    registry: Arc<FunctionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    client: reqwest::Client,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: InvokerSettings,
}

impl Invoker {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        settings: InvokerSettings,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            client: reqwest::Client::new(),
            breakers: DashMap::new(),
            settings,
        }
    }

    /// Invoke a function with the given payload.
    ///
    /// Looks up the function configuration (absent names fail before
    /// anything touches the runtime), ensures the backend is up, and POSTs
    /// the payload to its invocation endpoint honoring `timeout`.
    pub async fn invoke(
        &self,
        function_name: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> EmberResult<InvocationResponse> {
        let name = FunctionName::new(function_name)
            .map_err(|_| EmberError::FunctionNotFound(function_name.to_string()))?;

        let config = self
            .registry
            .get(&name)
            .ok_or_else(|| EmberError::FunctionNotFound(function_name.to_string()))?;

        let mut env = config.environment.clone();
        env.insert(
            CALLBACK_ENV_VAR.to_string(),
            self.settings.callback_url.clone(),
        );

        let breaker = self.breaker_for(name.as_str());

        breaker
            .call(move || async move {
                let host = self.lifecycle.ensure_running(&name, &config.image, &env).await?;

                let url = format!(
                    "http://{}:{}{}",
                    host, self.settings.invoke_port, INVOCATION_PATH
                );
                debug!(function = %name, url = %url, "Invoking backend");

                let response = self
                    .client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .timeout(timeout)
                    .body(payload)
                    .send()
                    .await
                    .map_err(|e| EmberError::Invocation {
                        function: name.to_string(),
                        source: e,
                    })?;

                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .map(|(key, value)| {
                        (
                            key.as_str().to_string(),
                            String::from_utf8_lossy(value.as_bytes()).into_owned(),
                        )
                    })
                    .collect();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| EmberError::Invocation {
                        function: name.to_string(),
                        source: e,
                    })?
                    .to_vec();

                Ok(InvocationResponse {
                    status,
                    headers,
                    body,
                })
            })
            .await
    }

    /// One breaker per function, created lazily and kept for the process
    /// lifetime.
    fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                self.settings.failure_threshold,
                self.settings.recovery_timeout,
            ))
        });
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FunctionConfig;
    use crate::lifecycle::LifecycleSettings;
    use crate::runtime::ContainerRuntime;
    use crate::test_support::MockRuntime;
    use std::collections::HashMap;

    fn test_invoker(runtime: Arc<MockRuntime>, functions: Vec<&str>) -> Invoker {
        let configs = functions
            .into_iter()
            .map(|name| FunctionConfig {
                name: FunctionName::new(name).unwrap(),
                image: format!("{}:latest", name),
                environment: HashMap::from([("STAGE".to_string(), "test".to_string())]),
            })
            .collect();
        let registry = FunctionRegistry::new_shared(configs).unwrap();

        let lifecycle = Arc::new(LifecycleManager::new(
            runtime as Arc<dyn ContainerRuntime>,
            LifecycleSettings {
                network: "test-net".to_string(),
                invoke_port: 8080,
                readiness_timeout: Duration::ZERO,
                lock_timeout: Duration::from_secs(30),
            },
        ));

        Invoker::new(
            registry,
            lifecycle,
            InvokerSettings {
                callback_url: "http://gateway:8080".to_string(),
                invoke_port: 8080,
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_function_never_touches_runtime() {
        let runtime = Arc::new(MockRuntime::new());
        let invoker = test_invoker(Arc::clone(&runtime), vec!["f1"]);

        let err = invoker
            .invoke("ghost", b"{}".to_vec(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EmberError::FunctionNotFound(_)));
        assert_eq!(runtime.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_name_is_not_found() {
        let runtime = Arc::new(MockRuntime::new());
        let invoker = test_invoker(Arc::clone(&runtime), vec!["f1"]);

        let err = invoker
            .invoke("not a name!", b"{}".to_vec(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, EmberError::FunctionNotFound(_)));
        assert_eq!(runtime.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_callback_url_injected_into_backend_env() {
        let runtime = Arc::new(MockRuntime::new());
        let invoker = test_invoker(Arc::clone(&runtime), vec!["f1"]);

        // The HTTP call fails (nothing resolves "f1"), but the container was
        // created first and its environment is what we are checking.
        let _ = invoker
            .invoke("f1", b"{}".to_vec(), Duration::from_millis(200))
            .await;

        let specs = runtime.created_specs.lock().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(
            specs[0].env.get(CALLBACK_ENV_VAR),
            Some(&"http://gateway:8080".to_string())
        );
        assert_eq!(specs[0].env.get("STAGE"), Some(&"test".to_string()));
    }

    #[tokio::test]
    async fn test_breaker_opens_per_function() {
        let runtime = Arc::new(MockRuntime::new());
        let invoker = test_invoker(Arc::clone(&runtime), vec!["f1", "f2"]);

        // Two transport failures trip f1's breaker (threshold = 2).
        for _ in 0..2 {
            let err = invoker
                .invoke("f1", b"{}".to_vec(), Duration::from_millis(200))
                .await
                .unwrap_err();
            assert!(matches!(err, EmberError::Invocation { .. }));
        }

        let err = invoker
            .invoke("f1", b"{}".to_vec(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, EmberError::CircuitOpen { .. }));

        // f2 has its own breaker and still reaches its backend.
        let err = invoker
            .invoke("f2", b"{}".to_vec(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, EmberError::Invocation { .. }));
    }
}
