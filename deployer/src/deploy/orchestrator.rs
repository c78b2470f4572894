//! Deploy orchestration: admission, locking and the update pipeline

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::app::options::{AppOptions, PipelineOptions, RateLimitOptions};
use crate::authn::rate_limit::RateLimiter;
use crate::authn::signature::{signed_payload, SignatureVerifier};
use crate::deploy::executor::{CommandRunner, CommandSpec, ProcessRunner, StepExecutor};
use crate::deploy::fsm::{PipelineFsm, StepEvent};
use crate::deploy::locks::StackLocks;
use crate::deploy::stack::StackResolver;
use crate::errors::DeployerError;
use crate::models::deployment::{DeployPayload, DeployRequest, DeployResult, StackContext, StepName};
use crate::secrets::resolver::SecretResolver;
use crate::secrets::vault::VaultClient;
use crate::utils::generate_uuid;

/// Static settings of an orchestrator
#[derive(Debug)]
pub struct OrchestratorConfig {
    pub deploy_secret: SecretString,
    pub stacks_root: std::path::PathBuf,
    pub rate_limit: RateLimitOptions,
    pub pipeline: PipelineOptions,
}

/// Entry point for deploy requests.
///
/// Requests are admitted (rate limit, then signature), mapped to a stack,
/// serialized per stack and run through `status -> config -> pull -> up`.
pub struct DeployOrchestrator {
    verifier: SignatureVerifier,
    rate_limiter: Arc<RateLimiter>,
    stack_locks: Arc<StackLocks>,
    pipeline: Arc<Pipeline>,
}

struct Pipeline {
    resolver: StackResolver,
    secrets: Option<SecretResolver>,
    executor: Arc<StepExecutor>,
    options: PipelineOptions,
}

impl DeployOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        runner: Arc<dyn CommandRunner>,
        secrets: Option<SecretResolver>,
    ) -> Self {
        let executor = Arc::new(StepExecutor::new(runner, config.pipeline.tail_limit));
        let resolver = StackResolver::new(
            config.stacks_root,
            config.pipeline.compose_bin.clone(),
            config.pipeline.timeouts.status,
            executor.clone(),
        );

        Self {
            verifier: SignatureVerifier::new(config.deploy_secret),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            stack_locks: Arc::new(StackLocks::new()),
            pipeline: Arc::new(Pipeline {
                resolver,
                secrets,
                executor,
                options: config.pipeline,
            }),
        }
    }

    /// Wire the orchestrator to real processes and, when configured, Vault
    pub fn from_options(options: AppOptions) -> Result<Self, DeployerError> {
        let secrets = match options.secret_store {
            Some(store_options) => {
                let shared_paths = store_options.shared_paths.clone();
                info!("Secret injection enabled ({})", store_options.addr);
                let store = VaultClient::new(store_options)?;
                Some(SecretResolver::new(Arc::new(store), shared_paths))
            }
            None => {
                info!("Secret injection disabled");
                None
            }
        };

        let config = OrchestratorConfig {
            deploy_secret: options.deploy_secret,
            stacks_root: options.stacks_root,
            rate_limit: options.rate_limit,
            pipeline: options.pipeline,
        };
        Ok(Self::new(config, Arc::new(ProcessRunner::default()), secrets))
    }

    /// Share a rate limiter with other orchestrators
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Share stack locks with other orchestrators
    pub fn with_stack_locks(mut self, stack_locks: Arc<StackLocks>) -> Self {
        self.stack_locks = stack_locks;
        self
    }

    pub fn stack_locks(&self) -> &Arc<StackLocks> {
        &self.stack_locks
    }

    /// Handle `POST /deploy/{stack}`
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployResult, DeployerError> {
        let payload = signed_payload(&request.raw_body, &request.stack);
        self.admit(&request.source_ip, &payload, request.signature.as_deref())?;
        self.run_stack(&request.stack).await
    }

    /// Handle `POST /deploy` with a JSON body naming the stack
    pub async fn deploy_json(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        source_ip: &str,
    ) -> Result<DeployResult, DeployerError> {
        self.admit(source_ip, raw_body, signature)?;

        let payload: DeployPayload = serde_json::from_slice(raw_body)
            .map_err(|_| DeployerError::InvalidRequest("invalid json body".to_string()))?;
        let stack = payload
            .stack_name()
            .ok_or_else(|| DeployerError::InvalidRequest("missing stack".to_string()))?;

        self.run_stack(&stack).await
    }

    fn admit(
        &self,
        source: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<(), DeployerError> {
        if !self.rate_limiter.allow(source) {
            warn!(event = "rejected", reason = "rate_limited", source, "Rate limit exceeded for {}", source);
            return Err(DeployerError::RateLimited);
        }
        self.verifier.check(payload, signature).inspect_err(|e| {
            warn!(event = "rejected", reason = "unauthorized", source, "Rejected deploy request: {}", e);
        })
    }

    async fn run_stack(&self, stack: &str) -> Result<DeployResult, DeployerError> {
        let context = self.pipeline.resolver.locate(stack).await?;

        let guard = self.stack_locks.acquire(&context.name).await;
        let deploy_id = generate_uuid();
        let span = info_span!("deploy", stack = %context.name, deploy_id = %deploy_id);
        let pipeline = self.pipeline.clone();

        // Once started the pipeline outlives the request; a dropped client
        // connection must not leave a half-applied stack behind.
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                pipeline.execute(context, deploy_id).await
            }
            .instrument(span),
        );

        task.await.map_err(|e| {
            error!("Deploy task of {} failed: {}", stack, e);
            DeployerError::Internal(format!("deploy task failed: {}", e))
        })?
    }
}

impl Pipeline {
    async fn execute(
        &self,
        context: StackContext,
        deploy_id: String,
    ) -> Result<DeployResult, DeployerError> {
        let started_at = Utc::now();
        info!(
            event = "deploy_start",
            registry_auth = context.env_override.contains_key("DOCKER_CONFIG"),
            "Deploying stack {}",
            context.name
        );

        let mut fsm = PipelineFsm::new();
        let mut steps = Vec::with_capacity(StepName::SEQUENCE.len());

        fsm.process(StepName::Status, StepEvent::Dispatch)
            .map_err(DeployerError::Internal)?;
        let check = self.resolver.check_running(&context).await?;
        let status_event = if check.status.ok {
            debug!("Running services: {}", check.services.join(", "));
            StepEvent::Succeed
        } else {
            StepEvent::Fail
        };
        fsm.process(StepName::Status, status_event)
            .map_err(DeployerError::Internal)?;
        steps.push(check.status);

        if !fsm.is_halted() {
            let mut env = context.env_override.clone();
            let mut secret_values = Vec::new();
            if let Some(secrets) = &self.secrets {
                let injected = secrets
                    .resolve_secrets(&context.name, &context.compose_file)
                    .await
                    .inspect_err(|e| error!("Aborting deploy of {}: {}", context.name, e))?;
                secret_values.extend(injected.values().filter(|v| !v.is_empty()).cloned());
                env.extend(injected);
            }

            while let Some(step) = fsm.next_step() {
                fsm.process(step, StepEvent::Dispatch)
                    .map_err(DeployerError::Internal)?;

                let spec = CommandSpec::compose(
                    &self.options.compose_bin,
                    step,
                    context.root_path.clone(),
                    env.clone(),
                );
                let output = self
                    .executor
                    .run(step, &spec, self.options.timeouts.for_step(step), &secret_values)
                    .await;

                let event = if output.result.ok {
                    StepEvent::Succeed
                } else {
                    StepEvent::Fail
                };
                fsm.process(step, event).map_err(DeployerError::Internal)?;
                steps.push(output.result);
            }
        }

        let result = DeployResult::from_steps(deploy_id, &context.name, steps, started_at);
        let duration_ms = (result.finished_at - result.started_at).num_milliseconds();
        match result.failed_step() {
            None => info!(
                event = "deploy_done",
                ok = true,
                complete = fsm.is_complete(),
                duration_ms,
                "Deployed stack {}",
                result.stack
            ),
            Some(failed) => warn!(
                event = "deploy_done",
                ok = false,
                complete = fsm.is_complete(),
                failed_step = failed.name.as_str(),
                exit_code = failed.exit_code,
                duration_ms,
                "Deploy of stack {} failed at {}",
                result.stack,
                failed.name
            ),
        }
        Ok(result)
    }
}
