//! Orchestrator pipeline tests

use std::sync::Arc;
use std::time::Duration;

use deployer::app::options::{RateLimitOptions, StepTimeouts};
use deployer::authn::rate_limit::RateLimiter;
use deployer::deploy::executor::EXIT_CODE_TIMEOUT;
use deployer::deploy::orchestrator::DeployOrchestrator;
use deployer::errors::DeployerError;
use deployer::models::deployment::{DeployRequest, StepName};

use crate::helpers::{
    config, failed, ok, orchestrator, secret_resolver, sign_hex, stack_request, timed_out, FakeRunner,
    FakeStore, Login, Stacks, COMPOSE_PLAIN, COMPOSE_WITH_SECRETS,
};

#[tokio::test]
async fn test_full_pipeline_succeeds() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new());
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let result = orchestrator.deploy(stack_request("media")).await.unwrap();

    assert!(result.ok);
    assert_eq!(result.stack, "media");
    assert!(!result.deploy_id.is_empty());
    assert!(result.finished_at >= result.started_at);
    let names: Vec<_> = result.steps.iter().map(|s| s.name).collect();
    assert_eq!(names, StepName::SEQUENCE.to_vec());
    assert!(result.steps.iter().all(|s| s.ok && s.exit_code == 0));
    assert_eq!(runner.verbs(), vec!["ps", "config", "pull", "up"]);

    let up = runner.call_for("up").unwrap();
    assert_eq!(up.program, "docker");
    assert_eq!(up.args, vec!["compose", "up", "-d", "--remove-orphans"]);
}

#[tokio::test]
async fn test_each_step_gets_its_own_timeout() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new());

    let mut settings = config(stacks.root());
    settings.pipeline.timeouts = StepTimeouts {
        status: Duration::from_secs(7),
        config: Duration::from_secs(11),
        pull: Duration::from_secs(13),
        up: Duration::from_secs(17),
    };
    let orchestrator = DeployOrchestrator::new(settings, runner.clone(), None);

    assert!(orchestrator.deploy(stack_request("media")).await.unwrap().ok);

    assert_eq!(runner.timeout_for("ps"), Some(Duration::from_secs(7)));
    assert_eq!(runner.timeout_for("config"), Some(Duration::from_secs(11)));
    assert_eq!(runner.timeout_for("pull"), Some(Duration::from_secs(13)));
    assert_eq!(runner.timeout_for("up"), Some(Duration::from_secs(17)));
}

#[tokio::test]
async fn test_config_failure_short_circuits() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(
        FakeRunner::new().with_outcome("config", failed(15, "services.web.image must be a string")),
    );
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let result = orchestrator.deploy(stack_request("media")).await.unwrap();

    assert!(!result.ok);
    assert_eq!(runner.verbs(), vec!["ps", "config"]);

    // Only one step after the inspection was attempted
    let attempted: Vec<_> = result
        .steps
        .iter()
        .filter(|s| s.name != StepName::Status)
        .collect();
    assert_eq!(attempted.len(), 1);
    assert_eq!(attempted[0].name, StepName::Config);
    assert_eq!(attempted[0].exit_code, 15);
    assert!(attempted[0].tail.contains("must be a string"));
    assert_eq!(result.failed_step().map(|s| s.name), Some(StepName::Config));
}

#[tokio::test]
async fn test_pull_timeout() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_outcome("pull", timed_out()));
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let result = orchestrator.deploy(stack_request("media")).await.unwrap();

    assert!(!result.ok);
    assert_eq!(result.steps.len(), 3);
    let names: Vec<_> = result.steps.iter().map(|s| s.name).collect();
    assert_eq!(names, vec![StepName::Status, StepName::Config, StepName::Pull]);
    assert!(!result.steps[2].ok);
    assert_eq!(result.steps[2].exit_code, EXIT_CODE_TIMEOUT);
    assert!(result.steps[2].tail.contains("timeout"));
    assert!(!runner.verbs().contains(&"up".to_string()));
}

#[tokio::test]
async fn test_failed_inspection_stops_pipeline() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_outcome("ps", failed(1, "daemon unreachable")));
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let result = orchestrator.deploy(stack_request("media")).await.unwrap();

    assert!(!result.ok);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].name, StepName::Status);
    assert_eq!(runner.verbs(), vec!["ps"]);
}

#[tokio::test]
async fn test_stopped_stack_is_not_deployed() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_outcome("ps", ok("")));
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let result = orchestrator.deploy(stack_request("media")).await;

    assert!(matches!(result, Err(DeployerError::StackNotRunning(_))));
    assert_eq!(runner.verbs(), vec!["ps"]);
}

#[tokio::test]
async fn test_gates_run_no_commands() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new());
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let mut unsigned = stack_request("media");
    unsigned.signature = None;
    assert!(matches!(
        orchestrator.deploy(unsigned).await,
        Err(DeployerError::Unauthorized(_))
    ));

    let mut forged = stack_request("media");
    forged.signature = Some(sign_hex(b"other"));
    assert!(matches!(
        orchestrator.deploy(forged).await,
        Err(DeployerError::Unauthorized(_))
    ));

    assert!(matches!(
        orchestrator.deploy(stack_request("ghost")).await,
        Err(DeployerError::StackNotFound(_))
    ));

    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_rate_limit_checked_before_signature() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new());
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None).with_rate_limiter(
        Arc::new(RateLimiter::new(RateLimitOptions {
            limit: 1,
            window: Duration::from_secs(60),
        })),
    );

    let mut unsigned = stack_request("media");
    unsigned.signature = None;
    assert!(matches!(
        orchestrator.deploy(unsigned).await,
        Err(DeployerError::Unauthorized(_))
    ));

    // The rejected call still used up the window
    assert!(matches!(
        orchestrator.deploy(stack_request("media")).await,
        Err(DeployerError::RateLimited)
    ));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_json_body_deploy() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new());
    let orchestrator = orchestrator(stacks.root(), runner.clone(), None);

    let body = br#"{"stack":"media"}"#;
    let result = orchestrator
        .deploy_json(body, Some(&sign_hex(body)), "10.0.0.1")
        .await
        .unwrap();
    assert!(result.ok);
    assert_eq!(result.steps.len(), 4);

    let bad = b"{not json";
    assert!(matches!(
        orchestrator.deploy_json(bad, Some(&sign_hex(bad)), "10.0.0.1").await,
        Err(DeployerError::InvalidRequest(_))
    ));

    let missing = br#"{"stack":""}"#;
    assert!(matches!(
        orchestrator.deploy_json(missing, Some(&sign_hex(missing)), "10.0.0.1").await,
        Err(DeployerError::InvalidRequest(_))
    ));

    let object = br#"{"stack":{"name":"media"}}"#;
    match orchestrator.deploy_json(object, Some(&sign_hex(object)), "10.0.0.1").await {
        Err(DeployerError::InvalidRequest(message)) => assert_eq!(message, "missing stack"),
        other => panic!("unexpected result: {other:?}"),
    }

    // Numeric stack names are taken by their text form
    stacks.add("5", COMPOSE_PLAIN);
    let numeric = br#"{"stack":5}"#;
    let result = orchestrator
        .deploy_json(numeric, Some(&sign_hex(numeric)), "10.0.0.1")
        .await
        .unwrap();
    assert_eq!(result.stack, "5");
    assert!(result.ok);

    // Signature is checked before the body is parsed
    assert!(matches!(
        orchestrator.deploy_json(bad, None, "10.0.0.1").await,
        Err(DeployerError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_registry_auth_and_secrets_reach_mutating_steps() {
    let stacks = Stacks::new();
    let dir = stacks.add("prd-thread_db", COMPOSE_WITH_SECRETS);
    stacks.add_registry_auth("prd-thread_db");

    let store = Arc::new(FakeStore::new(Login::Accept).with_path(
        "prd/thread_db",
        &[("DB_USER", "app"), ("DB_PASS", "hunter2"), ("UNUSED_KEY", "nope")],
    ));
    let runner = Arc::new(
        FakeRunner::new().with_outcome("config", ok("POSTGRES_PASSWORD: hunter2\nimage: postgres:16\n")),
    );
    let orchestrator = orchestrator(
        stacks.root(),
        runner.clone(),
        Some(secret_resolver(store.clone())),
    );

    let result = orchestrator.deploy(stack_request("prd-thread_db")).await.unwrap();
    assert!(result.ok);

    let docker_config = dir.canonicalize().unwrap().join(".docker");
    for verb in ["config", "pull", "up"] {
        let call = runner.call_for(verb).unwrap();
        assert_eq!(call.env.get("DB_USER").map(String::as_str), Some("app"), "{verb}");
        assert_eq!(call.env.get("DB_PASS").map(String::as_str), Some("hunter2"), "{verb}");
        assert!(!call.env.contains_key("UNUSED_KEY"), "{verb}");
        assert_eq!(
            call.env.get("DOCKER_CONFIG").map(String::as_str),
            Some(docker_config.to_string_lossy().as_ref())
        );
    }
    assert!(runner.call_for("ps").unwrap().env.is_empty());

    let config = &result.steps[1];
    assert!(!config.tail.contains("hunter2"));
    assert!(config.tail.contains("***"));
    assert!(config.tail.contains("image: postgres:16"));
}

#[tokio::test]
async fn test_rejected_store_login_aborts_before_mutation() {
    let stacks = Stacks::new();
    stacks.add("db", COMPOSE_WITH_SECRETS);
    let store = Arc::new(FakeStore::new(Login::Reject));
    let runner = Arc::new(FakeRunner::new());
    let orchestrator = orchestrator(stacks.root(), runner.clone(), Some(secret_resolver(store)));

    let result = orchestrator.deploy(stack_request("db")).await;

    assert!(matches!(result, Err(DeployerError::SecretStoreAuth(_))));
    assert_eq!(runner.verbs(), vec!["ps"]);
}

#[tokio::test]
async fn test_unreachable_store_degrades() {
    let stacks = Stacks::new();
    stacks.add("db", COMPOSE_WITH_SECRETS);
    let store = Arc::new(FakeStore::new(Login::Unreachable));
    let runner = Arc::new(FakeRunner::new());
    let orchestrator = orchestrator(stacks.root(), runner.clone(), Some(secret_resolver(store)));

    let result = orchestrator.deploy(stack_request("db")).await.unwrap();

    assert!(result.ok);
    assert!(!runner.call_for("up").unwrap().env.contains_key("DB_PASS"));
}

#[tokio::test]
async fn test_same_stack_deploys_are_serialized() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_delay(Duration::from_millis(20)));
    let orchestrator = Arc::new(orchestrator(stacks.root(), runner.clone(), None));

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.deploy(stack_request("media")).await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.deploy(stack_request("media")).await }
    });

    assert!(first.await.unwrap().unwrap().ok);
    assert!(second.await.unwrap().unwrap().ok);
    assert_eq!(runner.max_active(), 1);
    assert_eq!(runner.verbs().len(), 8);
}

#[tokio::test]
async fn test_different_stacks_run_in_parallel() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    stacks.add("db", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_delay(Duration::from_millis(50)));
    let orchestrator = Arc::new(orchestrator(stacks.root(), runner.clone(), None));

    let (media, db) = tokio::join!(
        orchestrator.deploy(stack_request("media")),
        orchestrator.deploy(stack_request("db")),
    );

    assert!(media.unwrap().ok);
    assert!(db.unwrap().ok);
    assert_eq!(runner.max_active(), 2);
}

#[tokio::test]
async fn test_dropped_request_does_not_cancel_pipeline() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let runner = Arc::new(FakeRunner::new().with_delay(Duration::from_millis(30)));
    let orchestrator = Arc::new(orchestrator(stacks.root(), runner.clone(), None));

    let request = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.deploy(stack_request("media")).await }
    });

    while runner.verbs().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    request.abort();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !runner.verbs().contains(&"up".to_string()) || orchestrator.stack_locks().is_locked("media") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(runner.verbs(), vec!["ps", "config", "pull", "up"]);
}

#[tokio::test]
async fn test_empty_body_is_signed_over_stack_name() {
    let stacks = Stacks::new();
    stacks.add("media", COMPOSE_PLAIN);
    let orchestrator = orchestrator(stacks.root(), Arc::new(FakeRunner::new()), None);

    let request = DeployRequest {
        stack: "media".to_string(),
        raw_body: Vec::new(),
        signature: Some(sign_hex(b"media")),
        source_ip: "192.0.2.1".to_string(),
    };
    assert!(orchestrator.deploy(request).await.unwrap().ok);
}
