//! Orchestration sessions and their configuration

use crate::{
    backend::{RunOptions, RuntimeBackend},
    container::{fleet::FleetManager, Container},
    errors::{BackendError, ContainerError, ImageError},
    image::{
        registry::{ImageRegistry, ObtainTicket},
        Image, ImageIdentifier,
    },
    reconciler::EventReconciler,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;

/// A container creation this session asked the backend for, awaiting its
/// create event
pub(crate) struct PendingCreation {
    pub auto_start: bool,
}

/// State shared between a [Session]'s callers and its event reconciler
pub(crate) struct Shared {
    pub backend: Arc<dyn RuntimeBackend>,
    pub images: ImageRegistry,
    pub fleet: Arc<FleetManager>,
    /// Every tracked container, by backend id, whichever party created it
    pub containers: Mutex<HashMap<String, Arc<Container>>>,
    /// Creations in flight, by backend-assigned container id. An async
    /// mutex: it is held across the backend's create call so the create
    /// event cannot be processed before the entry is registered.
    pub pending_creations: tokio::sync::Mutex<HashMap<String, PendingCreation>>,
    pub run_options: RunOptions,
}

/// Builder for configuring custom [Session] instances
#[derive(Debug, Default)]
pub struct SessionBuilder {
    run_options: RunOptions,
    drain_timeout: Option<Duration>,
}

impl SessionBuilder {
    /// Start constructing a custom session
    pub fn new() -> Self {
        SessionBuilder::default()
    }

    /// Creation options applied to every role container this session starts
    pub fn run_options(mut self, options: RunOptions) -> Self {
        self.run_options = options;
        self
    }

    /// Bound the shutdown drain barrier
    ///
    /// By default [Session::shutdown] waits indefinitely for the runtime to
    /// confirm destruction of the session's containers.
    pub fn drain_timeout(mut self, limit: Duration) -> Self {
        self.drain_timeout = Some(limit);
        self
    }

    /// Construct a [Session] using the parameters from this builder
    ///
    /// Scans the backend's current images and containers to seed the model,
    /// then starts processing the backend's event stream.
    pub async fn build(self, backend: Arc<dyn RuntimeBackend>) -> Result<Session, BackendError> {
        let shared = Arc::new(Shared {
            backend: backend.clone(),
            images: ImageRegistry::new(),
            fleet: FleetManager::new(),
            containers: Mutex::new(HashMap::new()),
            pending_creations: tokio::sync::Mutex::new(HashMap::new()),
            run_options: self.run_options,
        });
        // subscribe before the scan so nothing happening during the scan is
        // lost; processing starts only once the scan has seeded the model
        let events = backend.subscribe_events();
        let reconciler = EventReconciler::new(shared.clone());
        reconciler.seed().await?;
        let events_task = tokio::spawn(reconciler.run(events));
        Ok(Session {
            shared,
            drain_timeout: self.drain_timeout,
            events_task,
        })
    }
}

/// One orchestration session against one runtime backend
///
/// A session owns the in-process model: the tag index, the pending-request
/// tables and the fleet of containers it created. The model is kept
/// consistent with the runtime by a reconciler task consuming the backend's
/// event stream for the life of the session; dropping the session stops the
/// task.
///
/// The main entry point is [Session::start_role]: make sure the image is
/// present, pulling it if needed, and run a container from it.
pub struct Session {
    shared: Arc<Shared>,
    drain_timeout: Option<Duration>,
    events_task: JoinHandle<()>,
}

impl Session {
    /// Construct a session with default options
    pub async fn new(backend: Arc<dyn RuntimeBackend>) -> Result<Session, BackendError> {
        Session::builder().build(backend).await
    }

    /// Construct a session with custom options, via [SessionBuilder]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Is a tag mapping for `id` known right now? No side effects.
    pub fn is_image_available(&self, id: &ImageIdentifier) -> bool {
        self.shared.images.is_available(id)
    }

    /// All tags currently known to the session, sorted
    pub fn available_images(&self) -> Vec<ImageIdentifier> {
        let mut tags = self.shared.images.available_tags();
        tags.sort();
        tags
    }

    /// The image `id` currently resolves to, if any
    pub fn image(&self, id: &ImageIdentifier) -> Option<Arc<Image>> {
        self.shared.images.lookup(id)
    }

    /// The tracked container with this backend id, if any
    pub fn container(&self, id: &str) -> Option<Arc<Container>> {
        self.shared.containers.lock().unwrap().get(id).cloned()
    }

    /// The live containers created by this session
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.shared.fleet.containers()
    }

    /// Make sure `id` is locally available, without waiting for completion
    ///
    /// If the tag does not resolve and no pull for it is outstanding, one
    /// backend pull is issued. Concurrent requests for the same identifier
    /// share that single pull.
    pub async fn fetch_image(&self, id: &ImageIdentifier) -> Result<(), ImageError> {
        match self.shared.images.begin_obtain(id, false) {
            ObtainTicket::Ready(_) | ObtainTicket::Join { .. } => Ok(()),
            ObtainTicket::Pull { .. } => self.request_pull(id).await,
        }
    }

    /// Resolve `id` to an image, pulling it if it is not yet available
    ///
    /// Completes as soon as the tag resolves; if a pull is already in
    /// flight for the same identifier this call joins it instead of issuing
    /// a second one.
    pub async fn obtain_image(&self, id: &ImageIdentifier) -> Result<Arc<Image>, ImageError> {
        log::debug!("obtaining {}", id);
        let receiver = match self.shared.images.begin_obtain(id, true) {
            ObtainTicket::Ready(image) => return Ok(image),
            ObtainTicket::Join { receiver } => receiver,
            ObtainTicket::Pull { receiver } => {
                self.request_pull(id).await?;
                receiver
            }
        };
        let receiver = receiver.expect("a waiter was registered");
        receiver
            .await
            .map_err(|_| ImageError::PullAborted(id.to_string()))
    }

    /// Launch a role: obtain the image for `id`, then create and start a
    /// container from it
    ///
    /// Returns the backend id of the created container as soon as the
    /// runtime has accepted the creation; the container reaches `Running`
    /// asynchronously. If the image is deleted between obtaining it and
    /// creating the container, the whole operation is retried from image
    /// resolution — the stale image reference must not be reused.
    pub async fn start_role(&self, id: &ImageIdentifier) -> Result<String, ImageError> {
        log::info!("requesting role for image {}", id);
        loop {
            let image = self.obtain_image(id).await?;
            match self.create_role_container(&image).await {
                Ok(container_id) => return Ok(container_id),
                Err(BackendError::ImageNotFound(_)) => {
                    log::debug!("image {} vanished while creating container, retrying", id);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Graceful shutdown: destroy the fleet's containers and wait for the
    /// runtime to confirm, then request deletion of every tracked image
    ///
    /// Image deletion is fire-and-forget; only container teardown is
    /// awaited. The wait is bounded by [SessionBuilder::drain_timeout] when
    /// one was configured.
    pub async fn shutdown(&self) -> Result<(), ContainerError> {
        self.shared.fleet.drain_and_wait(self.drain_timeout).await?;
        for image in self.shared.images.images() {
            log::info!("requesting deletion of image {}", image.id());
            if let Err(err) = self.shared.backend.remove_image(image.id()).await {
                log::warn!("failed to request deletion of image {}: {}", image.id(), err);
            }
        }
        Ok(())
    }

    async fn request_pull(&self, id: &ImageIdentifier) -> Result<(), ImageError> {
        log::info!("requesting pull of {}", id);
        if let Err(err) = self
            .shared
            .backend
            .pull_image(id.repository(), id.tag())
            .await
        {
            self.shared.images.abort_pull(id);
            return Err(err.into());
        }
        Ok(())
    }

    async fn create_role_container(&self, image: &Arc<Image>) -> Result<String, BackendError> {
        log::info!("creating container for image {} {:?}", image.id(), image.tags());
        // hold the pending-creations lock across the backend call, so the
        // reconciler cannot process the create event before the entry exists
        let mut pending = self.shared.pending_creations.lock().await;
        let container_id = self
            .shared
            .backend
            .create_container(image.id(), &self.shared.run_options)
            .await?;
        pending.insert(container_id.clone(), PendingCreation { auto_start: true });
        Ok(container_id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}
