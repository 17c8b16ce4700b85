//! Fleet-level bookkeeping of the containers owned by one session

use crate::{container::Container, errors::ContainerError};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::Notify;

/// Tracks the live containers belonging to one orchestration session and
/// provides the graceful-shutdown barrier
///
/// Containers join the set when the runtime confirms their creation and
/// leave it when the runtime confirms their destruction, so the set always
/// reflects confirmed backend state, not requested state.
pub(crate) struct FleetManager {
    containers: Mutex<HashMap<String, Arc<Container>>>,
    emptied: Notify,
}

impl FleetManager {
    pub fn new() -> Arc<Self> {
        Arc::new(FleetManager {
            containers: Mutex::new(HashMap::new()),
            emptied: Notify::new(),
        })
    }

    pub fn on_created(&self, container: Arc<Container>) {
        log::debug!("registered container {}", container);
        self.containers
            .lock()
            .unwrap()
            .insert(container.id().to_owned(), container);
    }

    pub fn on_destroyed(&self, id: &str) {
        let mut containers = self.containers.lock().unwrap();
        if containers.remove(id).is_some() {
            log::debug!("unregistered container {}", id);
        }
        if containers.is_empty() {
            self.emptied.notify_waiters();
        }
    }

    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.containers.lock().unwrap().values().cloned().collect()
    }

    /// Request destruction of every container currently in the fleet, then
    /// wait until the runtime has confirmed destruction of all of them.
    ///
    /// The wait is released by destroy confirmations arriving on the event
    /// path, including ones for containers destroyed by other parties while
    /// the drain is in progress. With no `limit` the wait is unbounded.
    pub async fn drain_and_wait(&self, limit: Option<Duration>) -> Result<(), ContainerError> {
        let snapshot = self.containers();
        log::info!("waiting for {} containers to be removed", snapshot.len());
        for container in &snapshot {
            container.request_destroy().await?;
        }
        match limit {
            None => {
                self.wait_empty().await;
                Ok(())
            }
            Some(limit) => tokio::time::timeout(limit, self.wait_empty())
                .await
                .map_err(|_| ContainerError::DrainTimedOut),
        }
    }

    async fn wait_empty(&self) {
        loop {
            // register for the wakeup before checking, so a removal landing
            // in between cannot be missed
            let notified = self.emptied.notified();
            if self.containers.lock().unwrap().is_empty() {
                return;
            }
            notified.await;
        }
    }
}
