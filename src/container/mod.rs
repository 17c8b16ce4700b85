//! Containers and their lifecycle state machine

pub(crate) mod fleet;

use crate::{
    backend::RuntimeBackend,
    errors::ContainerError,
    image::Image,
};
use fleet::FleetManager;
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, Weak},
};

/// Lifecycle state of a [Container]
///
/// `Pending` is the only initial state and `Destroyed` the only terminal
/// one. `Starting`, `Stopping` and `Destroying` mean a backend operation is
/// in flight; the state machine issues no further backend calls until the
/// runtime confirms the operation through the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Destroy,
}

/// A backend call decided on by the state machine, issued after the state
/// lock is released
enum BackendOp {
    Start,
    Stop,
    Destroy,
}

struct LifecycleState {
    status: Status,
    queue: VecDeque<Action>,
}

/// One runtime container tracked by a session
///
/// Requested actions are queued and applied in order as the state machine
/// permits; completions reported by the runtime advance the machine and
/// drain the queue further. At most one backend-affecting operation is in
/// flight per container at any time.
pub struct Container {
    id: String,
    name: String,
    image: Arc<Image>,
    backend: Arc<dyn RuntimeBackend>,
    fleet: Option<Arc<FleetManager>>,
    state: Mutex<LifecycleState>,
    /// Handle to our own Arc, for registering with the fleet
    me: Weak<Container>,
}

impl Container {
    pub(crate) fn new(
        id: &str,
        name: &str,
        image: Arc<Image>,
        backend: Arc<dyn RuntimeBackend>,
        fleet: Option<Arc<FleetManager>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Container {
            id: id.to_owned(),
            name: name.to_owned(),
            image,
            backend,
            fleet,
            state: Mutex::new(LifecycleState {
                status: Status::Pending,
                queue: VecDeque::new(),
            }),
            me: me.clone(),
        })
    }

    /// The opaque identifier the runtime backend assigned to this container
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The container's display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The image this container was instantiated from
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Current lifecycle state
    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status
    }

    /// Ask for the container to be started once the state machine allows it
    pub async fn request_start(&self) -> Result<(), ContainerError> {
        self.enqueue(Action::Start);
        self.kick().await
    }

    /// Ask for the container to be stopped once the state machine allows it
    pub async fn request_stop(&self) -> Result<(), ContainerError> {
        self.enqueue(Action::Stop);
        self.kick().await
    }

    /// Ask for the container to be destroyed, stopping it first if it is
    /// running
    pub async fn request_destroy(&self) -> Result<(), ContainerError> {
        self.enqueue(Action::Destroy);
        self.kick().await
    }

    pub(crate) async fn on_created(&self) -> Result<(), ContainerError> {
        log::info!("container {} has been created", self);
        self.state.lock().unwrap().status = Status::Created;
        if let (Some(fleet), Some(me)) = (&self.fleet, self.me.upgrade()) {
            fleet.on_created(me);
        }
        self.kick().await
    }

    pub(crate) async fn on_started(&self) -> Result<(), ContainerError> {
        log::info!("container {} has started", self);
        self.state.lock().unwrap().status = Status::Running;
        self.kick().await
    }

    pub(crate) async fn on_stopped(&self) -> Result<(), ContainerError> {
        log::info!("container {} has stopped", self);
        self.state.lock().unwrap().status = Status::Stopped;
        self.kick().await
    }

    pub(crate) async fn on_destroyed(&self) -> Result<(), ContainerError> {
        log::info!("container {} has been destroyed", self);
        self.state.lock().unwrap().status = Status::Destroyed;
        self.image.remove_container(&self.id);
        if let Some(fleet) = &self.fleet {
            fleet.on_destroyed(&self.id);
        }
        self.kick().await
    }

    fn enqueue(&self, action: Action) {
        self.state.lock().unwrap().queue.push_back(action);
    }

    /// Drain the pending-action queue as far as the current state permits.
    ///
    /// Runs entirely under the state lock and yields at most one backend
    /// operation: every transition that needs the backend enters an
    /// in-flight state, which ends the loop. The operation itself is issued
    /// by [Container::kick] after the lock is dropped.
    fn advance(&self) -> Option<BackendOp> {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.status {
                Status::Created => match state.queue.pop_front()? {
                    Action::Start => {
                        state.status = Status::Starting;
                        return Some(BackendOp::Start);
                    }
                    Action::Stop => {
                        // never started, nothing to stop at the backend
                        state.status = Status::Stopped;
                    }
                    Action::Destroy => {
                        state.status = Status::Destroying;
                        return Some(BackendOp::Destroy);
                    }
                },
                Status::Running => match state.queue.pop_front()? {
                    Action::Start => (),
                    Action::Stop => {
                        state.status = Status::Stopping;
                        return Some(BackendOp::Stop);
                    }
                    Action::Destroy => {
                        // stop first, destroy once the runtime reports it stopped
                        state.status = Status::Stopping;
                        state.queue.push_back(Action::Destroy);
                        return Some(BackendOp::Stop);
                    }
                },
                Status::Stopped => match state.queue.pop_front()? {
                    Action::Start | Action::Stop => (),
                    Action::Destroy => {
                        state.status = Status::Destroying;
                        return Some(BackendOp::Destroy);
                    }
                },
                // wait for the in-flight operation's completion, or stay
                // put in Pending/Destroyed
                _ => return None,
            }
        }
    }

    async fn kick(&self) -> Result<(), ContainerError> {
        match self.advance() {
            None => Ok(()),
            Some(BackendOp::Start) => {
                log::debug!("container {} starting", self);
                Ok(self.backend.start_container(&self.id).await?)
            }
            Some(BackendOp::Stop) => {
                log::debug!("container {} stopping", self);
                Ok(self.backend.stop_container(&self.id).await?)
            }
            Some(BackendOp::Destroy) => {
                log::debug!("container {} being removed", self);
                Ok(self.backend.remove_container(&self.id).await?)
            }
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container({} {:?})", self.name, self.status())
    }
}
