//! Index of known images and coalescing of in-flight pulls

use crate::image::{Image, ImageIdentifier};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::oneshot;

/// Outcome of atomically checking availability and registering interest
pub(crate) enum ObtainTicket {
    /// The tag already resolves to a tracked image
    Ready(Arc<Image>),
    /// No pull is outstanding for this identifier: the caller must issue
    /// exactly one backend pull
    Pull {
        receiver: Option<oneshot::Receiver<Arc<Image>>>,
    },
    /// A pull for this identifier is already outstanding; the caller joined
    /// its waiter list
    Join {
        receiver: Option<oneshot::Receiver<Arc<Image>>>,
    },
}

struct RegistryState {
    /// Every tracked image, by backend id
    images: HashMap<String, Arc<Image>>,
    /// The global tag index; each tag resolves to exactly one image
    tags: HashMap<ImageIdentifier, Arc<Image>>,
    /// Waiter lists for pulls in flight. An entry with an empty list still
    /// marks the pull as outstanding.
    pending_pulls: HashMap<ImageIdentifier, Vec<oneshot::Sender<Arc<Image>>>>,
}

/// Owns the set of known images and tags for one session
///
/// A single mutex covers the image index, the tag index and the
/// pending-pull table, so "check availability, register a waiter, decide
/// whether to issue the one backend pull" is one atomic step, and so is the
/// event path's "publish the image and fire its waiters". A registration can
/// therefore never land between a check and a fire and be left pending
/// forever.
pub(crate) struct ImageRegistry {
    state: Mutex<RegistryState>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        ImageRegistry {
            state: Mutex::new(RegistryState {
                images: HashMap::new(),
                tags: HashMap::new(),
                pending_pulls: HashMap::new(),
            }),
        }
    }

    pub fn is_available(&self, id: &ImageIdentifier) -> bool {
        self.state.lock().unwrap().tags.contains_key(id)
    }

    pub fn lookup(&self, id: &ImageIdentifier) -> Option<Arc<Image>> {
        self.state.lock().unwrap().tags.get(id).cloned()
    }

    pub fn images(&self) -> Vec<Arc<Image>> {
        self.state.lock().unwrap().images.values().cloned().collect()
    }

    pub fn available_tags(&self) -> Vec<ImageIdentifier> {
        self.state.lock().unwrap().tags.keys().cloned().collect()
    }

    /// Find the image tracked under `image_id`, creating an untagged record
    /// for it if this is the first time the runtime mentions it
    pub fn get_or_create(&self, image_id: &str) -> Arc<Image> {
        self.state
            .lock()
            .unwrap()
            .images
            .entry(image_id.to_owned())
            .or_insert_with(|| Arc::new(Image::new(image_id)))
            .clone()
    }

    /// Atomically check availability and register interest in `id`.
    ///
    /// When `wait` is false no waiter is registered, but the caller still
    /// learns whether it is the one that must issue the backend pull.
    pub fn begin_obtain(&self, id: &ImageIdentifier, wait: bool) -> ObtainTicket {
        let mut state = self.state.lock().unwrap();
        if let Some(image) = state.tags.get(id) {
            log::debug!("{} already present as {}", id, image.id());
            return ObtainTicket::Ready(image.clone());
        }
        let mut receiver = None;
        let already_pending = state.pending_pulls.contains_key(id);
        let waiters = state.pending_pulls.entry(id.clone()).or_default();
        if wait {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            receiver = Some(rx);
        }
        if already_pending {
            log::debug!("{} pull already in flight, joining", id);
            ObtainTicket::Join { receiver }
        } else {
            ObtainTicket::Pull { receiver }
        }
    }

    /// Drop the pending entry for `id` after a pull could not be issued.
    ///
    /// Every waiter's receiver fails, so nobody is left pending for a pull
    /// that never happened.
    pub fn abort_pull(&self, id: &ImageIdentifier) {
        let waiters = self.state.lock().unwrap().pending_pulls.remove(id);
        if let Some(waiters) = waiters {
            log::warn!("aborting pull of {}, dropping {} waiters", id, waiters.len());
        }
    }

    /// Point `id` at `image`, detaching it from whatever image held it
    /// before. Maintains the one-image-per-tag invariant.
    pub fn attach_tag(&self, image: &Arc<Image>, id: ImageIdentifier) {
        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.tags.get(&id) {
            if !Arc::ptr_eq(previous, image) {
                previous.remove_tag(&id);
            }
        }
        image.add_tag(id.clone());
        state.tags.insert(id, image.clone());
    }

    /// Publish a confirmed image: index it and fire, exactly once and in
    /// registration order, every waiter list for a tag now pointing at it.
    pub fn publish(&self, image: &Arc<Image>) {
        let mut state = self.state.lock().unwrap();
        state
            .images
            .insert(image.id().to_owned(), image.clone());
        for tag in image.tags() {
            state.tags.insert(tag.clone(), image.clone());
            if let Some(waiters) = state.pending_pulls.remove(&tag) {
                log::debug!("{} resolved, notifying {} waiters", tag, waiters.len());
                for waiter in waiters {
                    // a waiter that gave up is not an error
                    let _ = waiter.send(image.clone());
                }
            }
        }
    }

    /// Forget a deleted image, detaching every tag that pointed at it
    pub fn remove_image(&self, image_id: &str) -> Option<Arc<Image>> {
        let mut state = self.state.lock().unwrap();
        let image = state.images.remove(image_id)?;
        for tag in image.tags() {
            if let Some(current) = state.tags.get(&tag) {
                if Arc::ptr_eq(current, &image) {
                    state.tags.remove(&tag);
                }
            }
        }
        Some(image)
    }
}
