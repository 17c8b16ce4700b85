//! Launch ephemeral worker roles inside containers.
//!
//! A [Session] keeps an in-process model of one container runtime's images
//! and containers, reconciled against the runtime's event stream, and
//! exposes [Session::start_role] on top: make sure an image is available,
//! pulling it on demand and coalescing concurrent requests, then create and
//! start a container from it. The runtime itself is reached through the
//! [backend::RuntimeBackend] trait, so any engine with pull/create/start/
//! stop/remove commands and an event stream can be plugged in.

pub mod backend;
pub mod container;
pub mod errors;
pub mod image;

mod reconciler;
mod session;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use crate::{
    container::{Container, Status},
    image::{Image, ImageIdentifier},
    session::{Session, SessionBuilder},
};
