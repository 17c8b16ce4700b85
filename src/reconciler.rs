//! Applies the runtime's event stream to the in-process model

use crate::{
    backend::{EventAction, EventCategory, ImageSummary, ObservedState, RuntimeEvent},
    container::Container,
    errors::{BackendError, EventError, ImageError},
    image::ImageIdentifier,
    session::Shared,
};
use futures_util::{stream::BoxStream, StreamExt};
use std::sync::Arc;

/// Consumes the backend's event stream for the lifetime of a session,
/// correlating runtime-assigned identifiers with pending caller requests
/// and keeping the tag and container bookkeeping consistent
pub(crate) struct EventReconciler {
    shared: Arc<Shared>,
}

impl EventReconciler {
    pub fn new(shared: Arc<Shared>) -> Self {
        EventReconciler { shared }
    }

    /// One-time scan of the backend's current images and containers, run
    /// before live events are processed so state that predates the session
    /// is visible
    pub async fn seed(&self) -> Result<(), BackendError> {
        for ImageSummary { id, tags } in self.shared.backend.list_images().await? {
            let image = self.shared.images.get_or_create(&id);
            for tag in &tags {
                match tag.parse::<ImageIdentifier>() {
                    Ok(tag) => self.shared.images.attach_tag(&image, tag),
                    Err(err) => {
                        log::warn!("ignoring unparseable tag {:?} on image {}: {}", tag, id, err)
                    }
                }
            }
            self.shared.images.publish(&image);
        }
        for summary in self.shared.backend.list_containers().await? {
            let image = self.shared.images.get_or_create(&summary.image_id);
            let container = Container::new(
                &summary.id,
                &summary.name,
                image.clone(),
                self.shared.backend.clone(),
                None,
            );
            self.shared
                .containers
                .lock()
                .unwrap()
                .insert(summary.id.clone(), container.clone());
            image.add_container(&summary.id, Arc::downgrade(&container));
            let seeded = async {
                container.on_created().await?;
                match summary.state {
                    ObservedState::Running => container.on_started().await,
                    ObservedState::Exited => container.on_stopped().await,
                    ObservedState::Created => Ok(()),
                }
            };
            if let Err(err) = seeded.await {
                log::warn!("error seeding container {}: {}", summary.id, err);
            }
        }
        log::info!(
            "seeded {} images, {} containers",
            self.shared.images.images().len(),
            self.shared.containers.lock().unwrap().len()
        );
        Ok(())
    }

    /// Process events until the stream ends. One failing event is logged
    /// and must never stop the subscription.
    pub async fn run(self, mut events: BoxStream<'static, RuntimeEvent>) {
        while let Some(event) = events.next().await {
            log::trace!(
                "runtime event {:?}/{:?} for {}",
                event.category,
                event.action,
                event.subject
            );
            if let Err(err) = self.apply(&event).await {
                log::warn!(
                    "error processing {:?} event for {}: {}",
                    event.action,
                    event.subject,
                    err
                );
            }
        }
        log::warn!("runtime event stream ended");
    }

    async fn apply(&self, event: &RuntimeEvent) -> Result<(), EventError> {
        match event.category {
            EventCategory::Container => self.apply_container_event(event).await,
            EventCategory::Image => self.apply_image_event(event).await,
        }
    }

    async fn apply_container_event(&self, event: &RuntimeEvent) -> Result<(), EventError> {
        match &event.action {
            EventAction::Create => self.container_created(event).await,
            EventAction::Start => Ok(self.tracked(&event.subject)?.on_started().await?),
            EventAction::Die => Ok(self.tracked(&event.subject)?.on_stopped().await?),
            EventAction::Destroy => {
                let container = self.tracked(&event.subject)?;
                container.on_destroyed().await?;
                self.shared.containers.lock().unwrap().remove(&event.subject);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn apply_image_event(&self, event: &RuntimeEvent) -> Result<(), EventError> {
        match &event.action {
            EventAction::Pull => self.image_pulled(event).await,
            EventAction::Tag => self.image_tagged(event),
            EventAction::Delete => {
                self.image_deleted(event);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn container_created(&self, event: &RuntimeEvent) -> Result<(), EventError> {
        let name = event
            .attribute("name")
            .ok_or(EventError::MissingAttribute("name"))?;
        let image_id = event
            .attribute("image")
            .ok_or(EventError::MissingAttribute("image"))?;
        let pending = self
            .shared
            .pending_creations
            .lock()
            .await
            .remove(&event.subject);
        // an externally created container may come from an image the
        // runtime never mentioned before
        let image = self.shared.images.get_or_create(image_id);
        let fleet = pending.as_ref().map(|_| self.shared.fleet.clone());
        let container = Container::new(
            &event.subject,
            name,
            image.clone(),
            self.shared.backend.clone(),
            fleet,
        );
        self.shared
            .containers
            .lock()
            .unwrap()
            .insert(event.subject.clone(), container.clone());
        image.add_container(&event.subject, Arc::downgrade(&container));
        if pending.map(|p| p.auto_start).unwrap_or(false) {
            // queued while still Pending; on_created's drain issues it
            container.request_start().await?;
        }
        container.on_created().await?;
        Ok(())
    }

    async fn image_pulled(&self, event: &RuntimeEvent) -> Result<(), EventError> {
        let tag = ImageIdentifier::parse(&event.subject)?;
        let image_id = self
            .shared
            .backend
            .resolve_image(&event.subject)
            .await
            .map_err(|err| EventError::Image(ImageError::Backend(err)))?;
        let image = self.shared.images.get_or_create(&image_id);
        self.shared.images.attach_tag(&image, tag.clone());
        log::info!("pulled {} as image {}", tag, image_id);
        self.shared.images.publish(&image);
        Ok(())
    }

    fn image_tagged(&self, event: &RuntimeEvent) -> Result<(), EventError> {
        let name = event
            .attribute("name")
            .ok_or(EventError::MissingAttribute("name"))?;
        let tag: ImageIdentifier = name.parse()?;
        let image = self.shared.images.get_or_create(&event.subject);
        self.shared.images.attach_tag(&image, tag.clone());
        log::info!("tagged image {} as {}", event.subject, tag);
        self.shared.images.publish(&image);
        Ok(())
    }

    fn image_deleted(&self, event: &RuntimeEvent) {
        match self.shared.images.remove_image(&event.subject) {
            Some(image) => {
                log::info!(
                    "image {} deleted, detached {} tags",
                    event.subject,
                    image.tags().len()
                )
            }
            None => log::debug!("delete event for untracked image {}", event.subject),
        }
    }

    fn tracked(&self, id: &str) -> Result<Arc<Container>, EventError> {
        self.shared
            .containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EventError::UnknownContainer(id.to_owned()))
    }
}
