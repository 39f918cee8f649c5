mod common;

use std::fs;

use n8n_deploy::compose;
use n8n_deploy::error::DeployError;
use n8n_deploy::stack::StackRunner;

use common::FakeEngine;

#[test]
fn pulls_before_up_then_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();
    let descriptor = compose::render(&common::configuration(dir.path())).unwrap();

    StackRunner::new(&engine, dir.path().join("docker-compose.yml"))
        .up(&descriptor)
        .unwrap();

    assert_eq!(engine.calls(), ["pull", "up", "ps"]);
}

#[test]
fn writes_descriptor_before_starting() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();
    let descriptor = compose::render(&common::configuration(dir.path())).unwrap();
    let file = dir.path().join("docker-compose.yml");

    StackRunner::new(&engine, &file).up(&descriptor).unwrap();

    assert_eq!(fs::read_to_string(&file).unwrap(), descriptor.to_yaml().unwrap());
}

#[test]
fn unchanged_descriptor_is_not_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();
    let descriptor = compose::render(&common::configuration(dir.path())).unwrap();
    let runner = StackRunner::new(&engine, dir.path().join("docker-compose.yml"));

    assert!(runner.write(&descriptor).unwrap());
    assert!(!runner.write(&descriptor).unwrap());
}

#[test]
fn missing_service_fails() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();
    engine.0.borrow_mut().running = vec!["postgres".into()];
    let descriptor = compose::render(&common::configuration(dir.path())).unwrap();

    let err = StackRunner::new(&engine, dir.path().join("docker-compose.yml"))
        .up(&descriptor)
        .unwrap_err();

    assert!(matches!(err, DeployError::ServiceNotRunning(ref name) if name == "n8n"));
}

#[test]
fn failed_up_keeps_written_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();
    engine.0.borrow_mut().fail_up = true;
    let descriptor = compose::render(&common::configuration(dir.path())).unwrap();
    let file = dir.path().join("docker-compose.yml");

    assert!(StackRunner::new(&engine, &file).up(&descriptor).is_err());

    assert!(file.exists());
    assert_eq!(engine.calls(), ["pull", "up"]);
}

#[test]
fn failed_pull_never_touches_running_services() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();
    engine.0.borrow_mut().fail_pull = true;
    let descriptor = compose::render(&common::configuration(dir.path())).unwrap();

    let err = StackRunner::new(&engine, dir.path().join("docker-compose.yml"))
        .up(&descriptor)
        .unwrap_err();

    assert!(matches!(err, DeployError::CommandFailed { ref command, .. } if command == "docker compose pull"));
    assert_eq!(engine.calls(), ["pull"]);
}
