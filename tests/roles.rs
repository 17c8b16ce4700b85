use rolebox::{
    backend::RunOptions,
    testkit::{eventually, test_bind, MemoryBackend},
    ImageIdentifier, Session, Status,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn start_role_pulls_creates_and_starts() {
    init_log();
    let backend = MemoryBackend::new();
    let session = Session::new(backend.clone()).await.unwrap();
    let id = ImageIdentifier::with_tag("worker", "1.0");

    let container_id = session.start_role(&id).await.unwrap();
    eventually(|| {
        session
            .container(&container_id)
            .is_some_and(|c| c.status() == Status::Running)
    })
    .await;

    let container = session.container(&container_id).unwrap();
    assert_eq!(session.containers().len(), 1);
    assert!(session.is_image_available(&id));
    assert_eq!(container.image().id(), session.image(&id).unwrap().id());
    assert_eq!(container.image().containers().len(), 1);
    assert_eq!(backend.pull_count(), 1);
    assert_eq!(
        backend.calls(),
        vec![
            "pull worker:1.0".to_owned(),
            format!("create {}", container.image().id()),
            format!("start {}", container_id),
        ]
    );
}

#[tokio::test]
async fn start_role_reuses_an_available_image() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-seeded", &["worker:latest"]);
    let session = Session::builder()
        .run_options(RunOptions {
            command: vec!["sleep".to_owned(), "1000".to_owned()],
            binds: vec![test_bind()],
            auto_remove: true,
        })
        .build(backend.clone())
        .await
        .unwrap();

    let id = ImageIdentifier::new("worker");
    let container_id = session.start_role(&id).await.unwrap();
    eventually(|| {
        session
            .container(&container_id)
            .is_some_and(|c| c.status() == Status::Running)
    })
    .await;
    assert_eq!(backend.pull_count(), 0);
}

#[tokio::test]
async fn start_role_retries_when_image_vanishes_before_create() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-stale", &["worker:latest"]);
    let session = Session::new(backend.clone()).await.unwrap();
    let id = ImageIdentifier::new("worker");

    // the seeded image disappears, and the first creation races past the
    // removal and is refused with "image not found"
    backend.delete_image("img-stale");
    eventually(|| !session.is_image_available(&id)).await;
    backend.fail_next_create();

    let container_id = session.start_role(&id).await.unwrap();
    eventually(|| {
        session
            .container(&container_id)
            .is_some_and(|c| c.status() == Status::Running)
    })
    .await;

    // the role was re-resolved from scratch: one fresh pull, one refused
    // create, one that stuck
    assert_eq!(backend.pull_count(), 1);
    let creates = backend
        .calls()
        .iter()
        .filter(|call| call.starts_with("create "))
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn two_roles_from_one_image() {
    init_log();
    let backend = MemoryBackend::new();
    let session = Session::new(backend.clone()).await.unwrap();
    let id = ImageIdentifier::new("worker");

    let first = session.start_role(&id).await.unwrap();
    let second = session.start_role(&id).await.unwrap();
    assert_ne!(first, second);
    eventually(|| {
        session.containers().len() == 2
            && session
                .containers()
                .iter()
                .all(|c| c.status() == Status::Running)
    })
    .await;

    let image = session.image(&id).unwrap();
    assert_eq!(image.containers().len(), 2);
    assert_eq!(backend.pull_count(), 1);
}
