use rolebox::{
    backend::{EventAction, EventCategory, ObservedState, RuntimeEvent},
    testkit::{eventually, MemoryBackend},
    ImageIdentifier, Session, Status,
};
use std::collections::HashMap;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn startup_scan_seeds_images_and_containers() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-a", &["worker:1.0", "worker:latest"]);
    backend.seed_image("img-b", &["helper:2"]);
    backend.seed_container("cnt-run", "runner", "img-a", ObservedState::Running);
    backend.seed_container("cnt-exit", "leftover", "img-b", ObservedState::Exited);
    backend.seed_container("cnt-new", "fresh", "img-b", ObservedState::Created);

    let session = Session::new(backend).await.unwrap();
    assert_eq!(
        session.available_images(),
        vec![
            ImageIdentifier::with_tag("helper", "2"),
            ImageIdentifier::with_tag("worker", "1.0"),
            ImageIdentifier::with_tag("worker", "latest"),
        ]
    );
    let worker = session
        .image(&ImageIdentifier::new("worker"))
        .expect("seeded tag resolves");
    assert_eq!(worker.id(), "img-a");

    assert_eq!(session.container("cnt-run").unwrap().status(), Status::Running);
    assert_eq!(session.container("cnt-exit").unwrap().status(), Status::Stopped);
    assert_eq!(session.container("cnt-new").unwrap().status(), Status::Created);
    // pre-existing containers belong to no fleet
    assert!(session.containers().is_empty());
}

#[tokio::test]
async fn tag_event_repoints_a_tag() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-old", &["worker:latest"]);
    let session = Session::new(backend.clone()).await.unwrap();
    let id = ImageIdentifier::new("worker");
    let old = session.image(&id).unwrap();
    assert_eq!(old.id(), "img-old");

    backend.tag_image("img-new", "worker:latest");
    eventually(|| session.image(&id).is_some_and(|img| img.id() == "img-new")).await;

    // the old image no longer claims the tag; the new one does
    assert!(old.tags().is_empty());
    assert_eq!(session.image(&id).unwrap().tags(), vec![id]);
}

#[tokio::test]
async fn delete_event_detaches_tags() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-a", &["worker:1.0", "worker:latest"]);
    let session = Session::new(backend.clone()).await.unwrap();
    assert_eq!(session.available_images().len(), 2);

    backend.delete_image("img-a");
    eventually(|| session.available_images().is_empty()).await;
    assert!(!session.is_image_available(&ImageIdentifier::new("worker")));
}

#[tokio::test]
async fn externally_created_containers_are_tracked_without_a_fleet() {
    init_log();
    let backend = MemoryBackend::new();
    let session = Session::new(backend.clone()).await.unwrap();

    // another client of the same runtime creates and runs a container from
    // an image this session has never heard of
    backend.emit(RuntimeEvent {
        category: EventCategory::Container,
        action: EventAction::Create,
        subject: "cnt-ext".to_owned(),
        attributes: HashMap::from([
            ("name".to_owned(), "intruder".to_owned()),
            ("image".to_owned(), "img-ext".to_owned()),
        ]),
    });
    backend.emit(RuntimeEvent {
        category: EventCategory::Container,
        action: EventAction::Start,
        subject: "cnt-ext".to_owned(),
        attributes: HashMap::new(),
    });
    eventually(|| {
        session
            .container("cnt-ext")
            .is_some_and(|c| c.status() == Status::Running)
    })
    .await;

    let container = session.container("cnt-ext").unwrap();
    assert_eq!(container.name(), "intruder");
    assert_eq!(container.image().id(), "img-ext");
    // not ours: the fleet stays empty and nothing was auto-started by us
    assert!(session.containers().is_empty());
    assert!(backend.calls().is_empty());

    backend.emit(RuntimeEvent {
        category: EventCategory::Container,
        action: EventAction::Die,
        subject: "cnt-ext".to_owned(),
        attributes: HashMap::new(),
    });
    backend.emit(RuntimeEvent {
        category: EventCategory::Container,
        action: EventAction::Destroy,
        subject: "cnt-ext".to_owned(),
        attributes: HashMap::new(),
    });
    eventually(|| session.container("cnt-ext").is_none()).await;
    assert_eq!(container.status(), Status::Destroyed);
}

#[tokio::test]
async fn one_malformed_event_does_not_stop_the_stream() {
    init_log();
    let backend = MemoryBackend::new();
    let session = Session::new(backend.clone()).await.unwrap();

    // create event with no attributes, a start for a container nobody
    // tracks, and an action we do not recognize
    backend.emit(RuntimeEvent {
        category: EventCategory::Container,
        action: EventAction::Create,
        subject: "cnt-broken".to_owned(),
        attributes: HashMap::new(),
    });
    backend.emit(RuntimeEvent {
        category: EventCategory::Container,
        action: EventAction::Start,
        subject: "cnt-ghost".to_owned(),
        attributes: HashMap::new(),
    });
    backend.emit(RuntimeEvent {
        category: EventCategory::Image,
        action: EventAction::Other("prune".to_owned()),
        subject: "whatever".to_owned(),
        attributes: HashMap::new(),
    });

    // the reconciler is still listening
    let id = ImageIdentifier::new("worker");
    session.fetch_image(&id).await.unwrap();
    eventually(|| session.is_image_available(&id)).await;
}

#[tokio::test]
async fn stop_then_destroy_through_the_event_stream() {
    init_log();
    let backend = MemoryBackend::new();
    let session = Session::new(backend.clone()).await.unwrap();
    let id = ImageIdentifier::new("worker");

    let container_id = session.start_role(&id).await.unwrap();
    eventually(|| {
        session
            .container(&container_id)
            .is_some_and(|c| c.status() == Status::Running)
    })
    .await;
    let container = session.container(&container_id).unwrap();

    container.request_stop().await.unwrap();
    container.request_destroy().await.unwrap();
    eventually(|| container.status() == Status::Destroyed).await;

    // exactly one stop and one remove, in that order
    let lifecycle: Vec<String> = backend
        .calls()
        .into_iter()
        .filter(|call| call.contains(&container_id))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            format!("start {}", container_id),
            format!("stop {}", container_id),
            format!("remove {}", container_id),
        ]
    );
    assert!(session.container(&container_id).is_none());
}
