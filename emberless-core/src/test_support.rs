//! In-memory container runtime for unit tests.
//!
//! Records every call so tests can assert on exactly which runtime
//! operations a lifecycle decision issued.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};

#[derive(Default)]
pub(crate) struct MockRuntime {
    pub containers: Mutex<HashMap<String, ContainerStatus>>,
    pub created_specs: Mutex<Vec<ContainerSpec>>,
    pub create_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_stop_for: Mutex<HashSet<String>>,
    pub fail_remove_for: Mutex<HashSet<String>>,
    pub create_delay: Mutex<Option<Duration>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: &str, status: ContainerStatus) -> Self {
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), status);
        self
    }

    /// Total mutating + querying calls issued against the runtime.
    pub fn total_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
            + self.start_calls.load(Ordering::SeqCst)
            + self.stop_calls.load(Ordering::SeqCst)
            + self.remove_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerStatus>, RuntimeError> {
        Ok(self.containers.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable {
                reason: "injected create failure".to_string(),
            });
        }

        self.created_specs.lock().unwrap().push(spec.clone());
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), ContainerStatus::Other("created".to_string()));
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name) {
            Some(status) => {
                *status = ContainerStatus::Running;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_stop_for.lock().unwrap().contains(name) {
            return Err(RuntimeError::Unavailable {
                reason: "injected stop failure".to_string(),
            });
        }

        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name) {
            Some(status) => {
                *status = ContainerStatus::Exited;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_remove_for.lock().unwrap().contains(name) {
            return Err(RuntimeError::Unavailable {
                reason: "injected remove failure".to_string(),
            });
        }

        match self.containers.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn list_by_label(&self, _key: &str, _value: &str) -> Result<Vec<String>, RuntimeError> {
        let mut names: Vec<String> = self.containers.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
