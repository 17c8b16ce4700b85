//! Container images and image identity


mod identifier;
pub(crate) mod registry;

pub use identifier::ImageIdentifier;

use crate::container::Container;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, Weak},
};

/// One content-addressed image as known to the runtime
///
/// An image carries the set of tags currently pointing at it and the set of
/// containers instantiated from it. Many tags may reference one image, but a
/// tag belongs to at most one image at a time; the event reconciler keeps
/// that invariant as the runtime reports pulls, re-tags and deletions.
///
/// Images are owned by the session's image registry. Containers hold their
/// own reference to their image, while the image only tracks its containers
/// weakly.
pub struct Image {
    id: String,
    tags: Mutex<HashSet<ImageIdentifier>>,
    containers: Mutex<HashMap<String, Weak<Container>>>,
}

impl Image {
    pub(crate) fn new(id: &str) -> Self {
        Image {
            id: id.to_owned(),
            tags: Mutex::new(HashSet::new()),
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// The opaque identifier the runtime backend assigned to this image
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the tags currently pointing at this image
    pub fn tags(&self) -> Vec<ImageIdentifier> {
        self.tags.lock().unwrap().iter().cloned().collect()
    }

    /// Snapshot of the live containers instantiated from this image
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn add_tag(&self, id: ImageIdentifier) {
        self.tags.lock().unwrap().insert(id);
    }

    pub(crate) fn remove_tag(&self, id: &ImageIdentifier) {
        self.tags.lock().unwrap().remove(id);
    }

    pub(crate) fn add_container(&self, container_id: &str, container: Weak<Container>) {
        self.containers
            .lock()
            .unwrap()
            .insert(container_id.to_owned(), container);
    }

    pub(crate) fn remove_container(&self, container_id: &str) {
        self.containers.lock().unwrap().remove(container_id);
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({})", self.id)
    }
}
