//! Stack resolver tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use deployer::deploy::executor::StepExecutor;
use deployer::deploy::stack::StackResolver;
use deployer::errors::DeployerError;
use deployer::models::deployment::StepName;

use crate::helpers::{failed, ok, FakeRunner, Stacks, COMPOSE_PLAIN};

fn resolver(stacks: &Stacks, runner: Arc<FakeRunner>) -> StackResolver {
    StackResolver::new(
        stacks.root().to_path_buf(),
        "docker".to_string(),
        Duration::from_secs(60),
        Arc::new(StepExecutor::new(runner, 2000)),
    )
}

#[tokio::test]
async fn test_locate_existing_stack() {
    let stacks = Stacks::new();
    let dir = stacks.add("media", COMPOSE_PLAIN);

    let context = resolver(&stacks, Arc::new(FakeRunner::new()))
        .locate("media")
        .await
        .unwrap();

    assert_eq!(context.name, "media");
    assert_eq!(context.root_path, dir.canonicalize().unwrap());
    assert!(context.compose_file.ends_with("docker-compose.yml"));
    assert!(context.env_override.is_empty());
}

#[tokio::test]
async fn test_locate_alternate_compose_name() {
    let stacks = Stacks::new();
    let dir = stacks.root().join("api");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("compose.yaml"), COMPOSE_PLAIN).unwrap();

    let context = resolver(&stacks, Arc::new(FakeRunner::new()))
        .locate("api")
        .await
        .unwrap();
    assert!(context.compose_file.ends_with("compose.yaml"));
}

#[tokio::test]
async fn test_locate_sets_registry_auth_override() {
    let stacks = Stacks::new();
    let dir = stacks.add("private", COMPOSE_PLAIN);
    stacks.add_registry_auth("private");

    let context = resolver(&stacks, Arc::new(FakeRunner::new()))
        .locate("private")
        .await
        .unwrap();

    let expected = dir.canonicalize().unwrap().join(".docker");
    assert_eq!(
        context.env_override.get("DOCKER_CONFIG").map(String::as_str),
        Some(expected.to_string_lossy().as_ref())
    );
}

#[tokio::test]
async fn test_locate_missing_stack() {
    let stacks = Stacks::new();
    let result = resolver(&stacks, Arc::new(FakeRunner::new()))
        .locate("ghost")
        .await;
    assert!(matches!(result, Err(DeployerError::StackNotFound(name)) if name == "ghost"));
}

#[tokio::test]
async fn test_locate_rejects_traversal() {
    let stacks = Stacks::new();
    let resolver = resolver(&stacks, Arc::new(FakeRunner::new()));

    for name in ["..", "../etc", "media/../..", ""] {
        assert!(
            matches!(resolver.locate(name).await, Err(DeployerError::InvalidRequest(_))),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_locate_without_compose_file() {
    let stacks = Stacks::new();
    std::fs::create_dir_all(stacks.root().join("empty")).unwrap();

    let result = resolver(&stacks, Arc::new(FakeRunner::new()))
        .locate("empty")
        .await;
    match result {
        Err(DeployerError::InvalidRequest(msg)) => assert_eq!(msg, "compose file missing"),
        other => panic!("unexpected {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_locate_rejects_symlink_escape() {
    let stacks = Stacks::new();
    let outside = tempfile::TempDir::new().unwrap();
    std::fs::write(outside.path().join("docker-compose.yml"), COMPOSE_PLAIN).unwrap();
    std::os::unix::fs::symlink(outside.path(), stacks.root().join("escape")).unwrap();

    let result = resolver(&stacks, Arc::new(FakeRunner::new()))
        .locate("escape")
        .await;
    assert!(matches!(result, Err(DeployerError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_check_running_lists_services() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_outcome("ps", ok("web\n\nworker\n")));
    let resolver = resolver(&stacks, runner.clone());

    let context = resolver.locate("media").await.unwrap();
    let check = resolver.check_running(&context).await.unwrap();

    assert_eq!(check.services, vec!["web", "worker"]);
    assert_eq!(check.status.name, StepName::Status);
    assert!(check.status.ok);

    let call = runner.call_for("ps").unwrap();
    assert_eq!(call.args, vec!["compose", "ps", "--status=running", "--services"]);
    assert_eq!(call.cwd, context.root_path);
    assert_eq!(call.env, HashMap::new());
}

#[tokio::test]
async fn test_check_running_with_nothing_up() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_outcome("ps", ok("\n")));
    let resolver = resolver(&stacks, runner);

    let context = resolver.locate("media").await.unwrap();
    let result = resolver.check_running(&context).await;
    assert!(matches!(result, Err(DeployerError::StackNotRunning(_))));
}

#[tokio::test]
async fn test_check_running_command_failure() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(
        FakeRunner::new().with_outcome("ps", failed(1, "Cannot connect to the Docker daemon")),
    );
    let resolver = resolver(&stacks, runner);

    let context = resolver.locate("media").await.unwrap();
    let check = resolver.check_running(&context).await.unwrap();
    assert!(!check.status.ok);
    assert_eq!(check.status.exit_code, 1);
    assert!(check.status.tail.contains("Docker daemon"));
}
