use rolebox::{
    backend::ObservedState,
    testkit::{eventually, MemoryBackend},
    ImageIdentifier, Session, Status,
};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn shutdown_drains_roles_and_requests_image_deletion() {
    init_log();
    let backend = MemoryBackend::new();
    let session = Session::new(backend.clone()).await.unwrap();
    let id = ImageIdentifier::new("worker");

    let first = session.start_role(&id).await.unwrap();
    let second = session.start_role(&id).await.unwrap();
    eventually(|| {
        session.containers().len() == 2
            && session
                .containers()
                .iter()
                .all(|c| c.status() == Status::Running)
    })
    .await;
    let image_id = session.image(&id).unwrap().id().to_owned();

    session.shutdown().await.unwrap();
    assert!(session.containers().is_empty());
    eventually(|| session.container(&first).is_none() && session.container(&second).is_none())
        .await;

    let calls = backend.calls();
    // both roles were stopped before removal, and the image deletion was
    // requested only after the drain completed
    for container_id in [&first, &second] {
        let stop = calls
            .iter()
            .position(|c| c == &format!("stop {}", container_id));
        let remove = calls
            .iter()
            .position(|c| c == &format!("remove {}", container_id));
        assert!(stop.unwrap() < remove.unwrap());
    }
    let rmi = calls
        .iter()
        .position(|c| c == &format!("rmi {}", image_id))
        .expect("image deletion requested");
    assert!(calls
        .iter()
        .position(|c| c.starts_with("remove "))
        .is_some_and(|remove| remove < rmi));
}


#[tokio::test]
async fn shutdown_with_no_roles_is_immediate() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-a", &["worker:latest"]);
    let session = Session::new(backend.clone()).await.unwrap();

    session.shutdown().await.unwrap();
    assert_eq!(backend.calls(), vec!["rmi img-a".to_owned()]);
    eventually(|| !session.is_image_available(&ImageIdentifier::new("worker"))).await;
}

#[tokio::test]
async fn shutdown_leaves_foreign_containers_alone() {
    init_log();
    let backend = MemoryBackend::new();
    backend.seed_image("img-a", &["worker:latest"]);
    backend.seed_container("cnt-foreign", "bystander", "img-a", ObservedState::Running);
    let session = Session::new(backend.clone()).await.unwrap();

    let ours = session.start_role(&ImageIdentifier::new("worker")).await.unwrap();
    eventually(|| {
        session
            .container(&ours)
            .is_some_and(|c| c.status() == Status::Running)
    })
    .await;

    session.shutdown().await.unwrap();
    // the pre-existing container was not ours to destroy
    assert_eq!(
        session.container("cnt-foreign").unwrap().status(),
        Status::Running
    );
    assert!(!backend
        .calls()
        .iter()
        .any(|c| c == "remove cnt-foreign" || c == "stop cnt-foreign"));
}
