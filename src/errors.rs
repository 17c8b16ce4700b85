//! Error types you might see while obtaining images or running roles

use thiserror::Error;

/// Errors reported by a [RuntimeBackend](crate::backend::RuntimeBackend)
/// binding
///
/// The core never retries these itself, with one exception: a
/// [BackendError::ImageNotFound] from container creation makes
/// [Session::start_role](crate::Session::start_role) re-resolve the image
/// and try again.
#[derive(Error, Debug)]
pub enum BackendError {
    /// the referenced image is not present on the runtime
    #[error("image not found on the runtime: {0:?}")]
    ImageNotFound(String),

    /// could not reach the runtime daemon
    #[error("runtime connection error: {0}")]
    Connection(String),

    /// the runtime rejected the request
    #[error("request rejected by the runtime: {0}")]
    Rejected(String),
}

/// Errors during image identification and image acquisition
#[derive(Error, Debug)]
pub enum ImageError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// a pull this caller was waiting on could not be issued
    #[error("pull aborted before completion: {0}")]
    PullAborted(String),

    /// error reported by the runtime backend
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors while driving a container's lifecycle
#[derive(Error, Debug)]
pub enum ContainerError {
    /// error reported by the runtime backend
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// the shutdown drain barrier hit its configured bound
    #[error("timed out waiting for containers to be destroyed")]
    DrainTimedOut,
}

/// Errors while applying one runtime event to the in-process model
///
/// These are caught and logged by the event reconciler; a malformed event
/// never stops the subscription.
#[derive(Error, Debug)]
pub enum EventError {
    /// the event is missing an attribute the reconciler needs
    #[error("event is missing attribute {0:?}")]
    MissingAttribute(&'static str),

    /// the event references a container this session is not tracking
    #[error("event references unknown container {0:?}")]
    UnknownContainer(String),

    /// image bookkeeping failed for this event
    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// container bookkeeping failed for this event
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
}
