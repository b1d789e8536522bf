// SPDX-License-Identifier: Apache-2.0

//! Container lifecycle manager.
//!
//! Owns the single-flight "ensure running" protocol, readiness
//! synchronization, idle-based eviction, and startup reconciliation of
//! backends a previous process left behind. Lifecycle decisions for one
//! function serialize on a per-name lock; unrelated functions proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::{EmberError, EmberResult, RuntimeError};
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerStatus, OWNER_LABEL_KEY, OWNER_LABEL_VALUE,
};
use crate::types::FunctionName;

/// Delay between readiness connection attempts.
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on a single readiness connection attempt.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-name bookkeeping for one backend.
///
/// The gate serializes every state-changing decision about the name,
/// including the readiness wait. It must never be held across work for a
/// different name.
#[derive(Debug)]
struct BackendRecord {
    gate: tokio::sync::Mutex<()>,
    last_accessed: std::sync::Mutex<Instant>,
}

impl BackendRecord {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            last_accessed: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_accessed.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_accessed.lock().unwrap().elapsed()
    }
}

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Network the backend containers attach to.
    pub network: String,
    /// Port the backends listen on; also the readiness probe target.
    pub invoke_port: u16,
    /// How long to wait for a backend to accept connections before
    /// optimistically proceeding. Zero disables the wait.
    pub readiness_timeout: Duration,
    /// Bound on waiting for the per-name lock, so one wedged creation
    /// cannot permanently stall later callers for the same name.
    pub lock_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_daemon(config: &DaemonConfig) -> Self {
        Self {
            network: config.network.clone(),
            invoke_port: config.invoke_port.value(),
            readiness_timeout: Duration::from_secs(config.readiness_timeout_secs),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
        }
    }
}

/// Manages the lifecycle of backend containers.
///
/// The runtime is the source of truth for backend existence and status; the
/// record map here only serializes creation and tracks access times for
/// eviction. That is what allows adopting a backend that is already running
/// when this process knows nothing about it (e.g. after a restart).
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: LifecycleSettings,
    backends: DashMap<String, Arc<BackendRecord>>,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: LifecycleSettings) -> Self {
        Self {
            runtime,
            settings,
            backends: DashMap::new(),
        }
    }

    /// Ensure a backend container for `name` is up, creating or restarting it
    /// as needed, and return its network hostname.
    ///
    /// Concurrent callers for the same name serialize on the per-name lock;
    /// exactly one of them performs the creation and the rest observe the
    /// running container.
    pub async fn ensure_running(
        &self,
        name: &FunctionName,
        image: &str,
        env: &HashMap<String, String>,
    ) -> EmberResult<String> {
        // Record the access first: the request counts as activity even if
        // creation fails below.
        let record = self.record_for(name.as_str());
        record.touch();

        let _guard = tokio::time::timeout(self.settings.lock_timeout, record.gate.lock())
            .await
            .map_err(|_| EmberError::ContainerStart {
                function: name.to_string(),
                source: RuntimeError::LockTimeout(name.to_string()),
            })?;

        // An eviction sweep may have dropped the record while this caller
        // was queued on the gate; re-assert it so the backend stays tracked.
        self.backends
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&record));

        match self
            .runtime
            .inspect(name.as_str())
            .await
            .map_err(|e| self.start_error(name, e))?
        {
            Some(ContainerStatus::Running) => {
                debug!(function = %name, "Backend already running");
            }
            Some(ContainerStatus::Exited) => {
                info!(function = %name, "Warm start: restarting exited backend");
                self.runtime
                    .start(name.as_str())
                    .await
                    .map_err(|e| self.start_error(name, e))?;
            }
            Some(ContainerStatus::Other(state)) => {
                info!(function = %name, state = %state, "Backend in unusable state, recreating");
                self.runtime
                    .remove(name.as_str(), true)
                    .await
                    .map_err(|e| self.start_error(name, e))?;
                self.create_and_start(name, image, env).await?;
            }
            None => {
                info!(function = %name, image = %image, "Cold start: creating backend");
                self.create_and_start(name, image, env).await?;
            }
        }

        self.wait_until_invocable(name).await;

        Ok(name.to_string())
    }

    /// Stop backends whose last access is older than `idle_threshold` and
    /// drop their bookkeeping. Entries with an in-flight lifecycle decision
    /// are skipped this pass; per-entry failures do not abort the sweep.
    pub async fn evict_idle(&self, idle_threshold: Duration) {
        let candidates: Vec<(String, Arc<BackendRecord>)> = self
            .backends
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (name, record) in candidates {
            if record.idle_for() <= idle_threshold {
                continue;
            }

            // Never mutate state for a name whose lock is held by an
            // in-flight ensure_running call.
            let Ok(_guard) = record.gate.try_lock() else {
                debug!(function = %name, "Skipping eviction: lifecycle operation in flight");
                continue;
            };

            // The record may have been touched while this sweep raced to
            // the lock.
            if record.idle_for() <= idle_threshold {
                continue;
            }

            info!(
                function = %name,
                idle_secs = record.idle_for().as_secs(),
                "Scale-down: stopping idle backend"
            );

            match self.runtime.stop(&name).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {
                    // Record and lock lifetime are tied together: both go
                    // when the backend is evicted.
                    self.backends
                        .remove_if(&name, |_, value| Arc::ptr_eq(value, &record));
                }
                Err(e) => {
                    error!(function = %name, error = %e, "Failed to stop idle backend");
                }
            }
        }
    }

    /// Reclaim backends left behind by a previous, now-dead process.
    ///
    /// Lists every container carrying the ownership label regardless of
    /// state and force-removes each one, isolating per-container failures.
    /// Runs once at startup, before any request is served.
    pub async fn prune_orphans(&self) {
        info!("Reconciling orphaned backends");

        let names = match self
            .runtime
            .list_by_label(OWNER_LABEL_KEY, OWNER_LABEL_VALUE)
            .await
        {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Failed to list owned containers");
                return;
            }
        };

        for name in names {
            info!(container = %name, "Removing orphaned backend");

            if let Err(e) = self.runtime.stop(&name).await {
                if !matches!(e, RuntimeError::NotFound(_)) {
                    warn!(container = %name, error = %e, "Failed to stop orphan");
                }
            }

            if let Err(e) = self.runtime.remove(&name, true).await {
                if !matches!(e, RuntimeError::NotFound(_)) {
                    warn!(container = %name, error = %e, "Failed to remove orphan");
                }
            }
        }
    }

    /// Number of backends currently tracked for eviction.
    pub fn tracked_backends(&self) -> usize {
        self.backends.len()
    }

    fn record_for(&self, name: &str) -> Arc<BackendRecord> {
        let entry = self
            .backends
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BackendRecord::new()));
        Arc::clone(entry.value())
    }

    async fn create_and_start(
        &self,
        name: &FunctionName,
        image: &str,
        env: &HashMap<String, String>,
    ) -> EmberResult<()> {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            env: env.clone(),
            network: self.settings.network.clone(),
        };

        self.runtime
            .create(&spec)
            .await
            .map_err(|e| self.start_error(name, e))?;
        self.runtime
            .start(name.as_str())
            .await
            .map_err(|e| self.start_error(name, e))?;
        Ok(())
    }

    /// Wait for the backend to accept a TCP connection on the invoke port.
    ///
    /// A bare connection probe only: the invocation endpoint must not
    /// receive a trial request while its runtime is still booting. A timeout
    /// is not an error; the next network call either succeeds or surfaces as
    /// a normal invocation failure.
    async fn wait_until_invocable(&self, name: &FunctionName) {
        if self.settings.readiness_timeout.is_zero() {
            return;
        }

        let ready = wait_for_ready(
            name.as_str(),
            self.settings.invoke_port,
            self.settings.readiness_timeout,
            READINESS_POLL_INTERVAL,
        )
        .await;

        if !ready {
            warn!(
                function = %name,
                timeout_secs = self.settings.readiness_timeout.as_secs(),
                "Backend did not accept connections before the readiness deadline; continuing"
            );
        }
    }

    fn start_error(&self, name: &FunctionName, source: RuntimeError) -> EmberError {
        EmberError::ContainerStart {
            function: name.to_string(),
            source,
        }
    }
}

/// Poll a TCP connect to `host:port` until it succeeds or `timeout` elapses.
pub(crate) async fn wait_for_ready(
    host: &str,
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        match tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect((host, port))).await
        {
            Ok(Ok(_)) => {
                debug!(host, port, "Backend is accepting connections");
                return true;
            }
            Ok(Err(_)) | Err(_) => {}
        }

        if Instant::now() >= deadline {
            return false;
        }

        tokio::time::sleep(interval).await;
    }
}

/// Drive periodic idle eviction until the task is aborted.
pub fn spawn_idle_sweeper(
    manager: Arc<LifecycleManager>,
    interval: Duration,
    idle_threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            manager.evict_idle(idle_threshold).await;
        }
    })
}
