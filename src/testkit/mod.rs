//! Shared test utilities available to both unit and integration tests
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests). The centerpiece is [MemoryBackend], an in-memory
//! [RuntimeBackend] that emulates a small container runtime: commands
//! mutate its state and emit the matching events on its stream, calls are
//! recorded for exactly-once assertions, and failures and slow pulls can be
//! scripted.

use crate::{
    backend::{
        Bind, ContainerSummary, EventAction, EventCategory, ImageSummary, ObservedState,
        RunOptions, RuntimeBackend, RuntimeEvent,
    },
    errors::BackendError,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;

struct State {
    /// image id -> tag references
    images: HashMap<String, Vec<String>>,
    containers: HashMap<String, ContainerSummary>,
    /// pull references accepted but not yet completed
    held_pulls: Vec<String>,
}

/// An in-memory runtime backend with observable behavior
///
/// Every accepted command is appended to a call log (`"pull app:1"`,
/// `"start cnt-0"`, ...) and completes by emitting the event a real runtime
/// would. Pulls can be held back with [MemoryBackend::hold_pulls] to keep
/// them in flight while a test arranges concurrent callers, and creations
/// can be made to fail with "image not found" to exercise the retry path.
pub struct MemoryBackend {
    state: Mutex<State>,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<RuntimeEvent>>>,
    calls: Mutex<Vec<String>>,
    hold_pulls: AtomicBool,
    fail_pulls: AtomicUsize,
    fail_creates: AtomicUsize,
    next_id: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(MemoryBackend {
            state: Mutex::new(State {
                images: HashMap::new(),
                containers: HashMap::new(),
                held_pulls: Vec::new(),
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            calls: Mutex::new(Vec::new()),
            hold_pulls: AtomicBool::new(false),
            fail_pulls: AtomicUsize::new(0),
            fail_creates: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
        })
    }

    /// Make an image present before a session scans the backend
    pub fn seed_image(&self, id: &str, tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .images
            .insert(id.to_owned(), tags.iter().map(|t| (*t).to_owned()).collect());
    }

    /// Make a container present before a session scans the backend
    pub fn seed_container(&self, id: &str, name: &str, image_id: &str, observed: ObservedState) {
        let mut state = self.state.lock().unwrap();
        state.containers.insert(
            id.to_owned(),
            ContainerSummary {
                id: id.to_owned(),
                name: name.to_owned(),
                image_id: image_id.to_owned(),
                state: observed,
            },
        );
    }

    /// Keep accepted pulls in flight until [MemoryBackend::release_pulls]
    pub fn hold_pulls(&self) {
        self.hold_pulls.store(true, Ordering::SeqCst);
    }

    /// Complete every held pull, emitting its event
    pub fn release_pulls(&self) {
        let held = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.held_pulls)
        };
        for reference in held {
            self.complete_pull(&reference);
        }
    }

    /// Fail the next container creation with "image not found"
    pub fn fail_next_create(&self) {
        self.fail_creates.fetch_add(1, Ordering::SeqCst);
    }

    /// Reject the next pull request with a connection error
    pub fn fail_next_pull(&self) {
        self.fail_pulls.fetch_add(1, Ordering::SeqCst);
    }

    /// Attach `reference` to `image_id` (creating the image if new) and
    /// emit the matching tag event
    pub fn tag_image(&self, image_id: &str, reference: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state
                .images
                .entry(image_id.to_owned())
                .or_default()
                .push(reference.to_owned());
        }
        self.emit(RuntimeEvent {
            category: EventCategory::Image,
            action: EventAction::Tag,
            subject: image_id.to_owned(),
            attributes: HashMap::from([("name".to_owned(), reference.to_owned())]),
        });
    }

    /// Delete an image out from under the orchestrator, as another client
    /// of the same runtime would
    pub fn delete_image(&self, image_id: &str) {
        self.state.lock().unwrap().images.remove(image_id);
        self.emit(RuntimeEvent {
            category: EventCategory::Image,
            action: EventAction::Delete,
            subject: image_id.to_owned(),
            attributes: HashMap::new(),
        });
    }

    /// Inject a raw event on the stream
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Every command accepted so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How many pulls were issued to the backend
    pub fn pull_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with("pull "))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn complete_pull(&self, reference: &str) -> String {
        let image_id = {
            let mut state = self.state.lock().unwrap();
            let existing = state
                .images
                .iter()
                .find(|(_, tags)| tags.iter().any(|t| t == reference))
                .map(|(id, _)| id.clone());
            match existing {
                Some(id) => id,
                None => {
                    let id = self.fresh_id("img");
                    state.images.insert(id.clone(), vec![reference.to_owned()]);
                    id
                }
            }
        };
        self.emit(RuntimeEvent {
            category: EventCategory::Image,
            action: EventAction::Pull,
            subject: reference.to_owned(),
            attributes: HashMap::new(),
        });
        image_id
    }
}

#[async_trait]
impl RuntimeBackend for MemoryBackend {
    async fn list_images(&self) -> Result<Vec<ImageSummary>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .map(|(id, tags)| ImageSummary {
                id: id.clone(),
                tags: tags.clone(),
            })
            .collect())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, BackendError> {
        Ok(self.state.lock().unwrap().containers.values().cloned().collect())
    }

    async fn pull_image(&self, repository: &str, tag: &str) -> Result<(), BackendError> {
        let reference = format!("{}:{}", repository, tag);
        self.record(format!("pull {}", reference));
        if self
            .fail_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Connection(format!(
                "pull of {} refused",
                reference
            )));
        }
        if self.hold_pulls.load(Ordering::SeqCst) {
            self.state.lock().unwrap().held_pulls.push(reference);
        } else {
            self.complete_pull(&reference);
        }
        Ok(())
    }

    async fn resolve_image(&self, reference: &str) -> Result<String, BackendError> {
        let state = self.state.lock().unwrap();
        state
            .images
            .iter()
            .find(|(_, tags)| tags.iter().any(|t| t == reference))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| BackendError::ImageNotFound(reference.to_owned()))
    }

    async fn create_container(
        &self,
        image_id: &str,
        _options: &RunOptions,
    ) -> Result<String, BackendError> {
        self.record(format!("create {}", image_id));
        if self
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::ImageNotFound(image_id.to_owned()));
        }
        let id = self.fresh_id("cnt");
        let name = format!("role-{}", id);
        {
            let mut state = self.state.lock().unwrap();
            if !state.images.contains_key(image_id) {
                return Err(BackendError::ImageNotFound(image_id.to_owned()));
            }
            state.containers.insert(
                id.clone(),
                ContainerSummary {
                    id: id.clone(),
                    name: name.clone(),
                    image_id: image_id.to_owned(),
                    state: ObservedState::Created,
                },
            );
        }
        self.emit(RuntimeEvent {
            category: EventCategory::Container,
            action: EventAction::Create,
            subject: id.clone(),
            attributes: HashMap::from([
                ("name".to_owned(), name),
                ("image".to_owned(), image_id.to_owned()),
            ]),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), BackendError> {
        self.record(format!("start {}", id));
        let known = {
            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(id) {
                Some(summary) => {
                    summary.state = ObservedState::Running;
                    true
                }
                None => false,
            }
        };
        if known {
            self.emit(RuntimeEvent {
                category: EventCategory::Container,
                action: EventAction::Start,
                subject: id.to_owned(),
                attributes: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), BackendError> {
        self.record(format!("stop {}", id));
        let known = {
            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(id) {
                Some(summary) => {
                    summary.state = ObservedState::Exited;
                    true
                }
                None => false,
            }
        };
        if known {
            self.emit(RuntimeEvent {
                category: EventCategory::Container,
                action: EventAction::Die,
                subject: id.to_owned(),
                attributes: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), BackendError> {
        self.record(format!("remove {}", id));
        let known = self.state.lock().unwrap().containers.remove(id).is_some();
        if known {
            self.emit(RuntimeEvent {
                category: EventCategory::Container,
                action: EventAction::Destroy,
                subject: id.to_owned(),
                attributes: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<(), BackendError> {
        self.record(format!("rmi {}", id));
        let known = self.state.lock().unwrap().images.remove(id).is_some();
        if known {
            self.emit(RuntimeEvent {
                category: EventCategory::Image,
                action: EventAction::Delete,
                subject: id.to_owned(),
                attributes: HashMap::new(),
            });
        }
        Ok(())
    }

    fn subscribe_events(&self) -> BoxStream<'static, RuntimeEvent> {
        let receiver = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("event stream already subscribed");
        Box::pin(futures_util::stream::unfold(receiver, |mut receiver| {
            async move { receiver.recv().await.map(|event| (event, receiver)) }
        }))
    }
}

/// A bind mount usable in test run options
pub fn test_bind() -> Bind {
    Bind {
        source: "scratch".to_owned(),
        target: "/scratch".to_owned(),
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
