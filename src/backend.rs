//! The interface the orchestrator needs from a container runtime
//!
//! A [RuntimeBackend] binding wraps one container engine (a daemon and its
//! API). Commands only *initiate* work: pulls, starts, stops and removals
//! return as soon as the runtime has accepted the request, and completion is
//! observed later on the event stream. The orchestrator core consumes that
//! stream through [RuntimeBackend::subscribe_events] exactly once per
//! session.

use crate::errors::BackendError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashMap;

/// Which kind of resource a [RuntimeEvent] is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Container,
    Image,
}

/// What happened to the subject of a [RuntimeEvent]
///
/// Actions the orchestrator does not recognize are carried as
/// [EventAction::Other] and ignored by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Start,
    Die,
    Destroy,
    Pull,
    Tag,
    Delete,
    Other(String),
}

/// One observation from the runtime's event stream
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub category: EventCategory,
    pub action: EventAction,
    /// Event subject: a container id for container events, an image id or
    /// pulled reference for image events
    pub subject: String,
    pub attributes: HashMap<String, String>,
}

impl RuntimeEvent {
    pub(crate) fn attribute(&self, name: &'static str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// An image as reported by [RuntimeBackend::list_images]
#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub id: String,
    /// Raw tag strings; parsed into identifiers by the reconciler
    pub tags: Vec<String>,
}

/// Container state as reported by [RuntimeBackend::list_containers]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedState {
    Created,
    Running,
    Exited,
}

/// A container as reported by [RuntimeBackend::list_containers]
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub state: ObservedState,
}

/// A named volume mounted into a role container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub source: String,
    pub target: String,
}

/// Creation options applied to every role container a session starts
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Command to run in the container; empty keeps the image default
    pub command: Vec<String>,
    pub binds: Vec<Bind>,
    /// Ask the runtime to remove the container as soon as it exits
    pub auto_remove: bool,
}

/// Bindings to one concrete container runtime
///
/// All commands are asynchronous at the runtime level as well as at the call
/// site: a successful return means the request was accepted, not that the
/// work finished. The state changes show up on the event stream.
#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    /// Current images, used once to seed the model at session start
    async fn list_images(&self) -> Result<Vec<ImageSummary>, BackendError>;

    /// Current containers, used once to seed the model at session start
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, BackendError>;

    /// Ask the runtime to pull `repository:tag`; completion arrives as an
    /// image `pull` event
    async fn pull_image(&self, repository: &str, tag: &str) -> Result<(), BackendError>;

    /// Resolve a reference the runtime reported (such as a pulled tag) to
    /// the backend image id it points at
    async fn resolve_image(&self, reference: &str) -> Result<String, BackendError>;

    /// Create a container from an image id; returns the backend-assigned
    /// container id, or [BackendError::ImageNotFound] if the image vanished
    async fn create_container(
        &self,
        image_id: &str,
        options: &RunOptions,
    ) -> Result<String, BackendError>;

    async fn start_container(&self, id: &str) -> Result<(), BackendError>;

    async fn stop_container(&self, id: &str) -> Result<(), BackendError>;

    async fn remove_container(&self, id: &str) -> Result<(), BackendError>;

    async fn remove_image(&self, id: &str) -> Result<(), BackendError>;

    /// The runtime's event stream: infinite and not restartable.
    /// Reconnection policy is the binding's concern, not the core's.
    fn subscribe_events(&self) -> BoxStream<'static, RuntimeEvent>;
}
