// Docker container backend using Bollard
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::engine::{check_limits, Execution, ExecutionEngine, ExecutionError, StdinLines};
use crate::runner::{
    stdout_capture_limit, BoundedBuffer, RunnerOutput, RunnerPayload, PAYLOAD_ENV, RUNNER_SCRIPT,
    STDERR_CAPTURE_BYTES,
};

const INSTANCE_LABEL: &str = "leveltest.engine";

/// Container cleanup guard for cancelled runs. The normal path hands the
/// container back with [`ContainerGuard::release`] and removes it with an
/// awaited call; the guard only acts when the run future is dropped first.
struct ContainerGuard {
    docker: Docker,
    container_id: Option<String>,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id: Some(container_id),
        }
    }

    fn release(mut self) -> String {
        self.container_id.take().unwrap_or_default()
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %container_id, "No runtime left to remove container");
            return;
        };
        let docker = self.docker.clone();

        // Drop cannot await; hand removal to the runtime
        runtime.spawn(async move {
            if let Err(e) = docker
                .remove_container(&container_id, Some(force_remove()))
                .await
            {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

fn force_remove() -> RemoveContainerOptions {
    RemoveContainerOptions {
        force: true,
        ..Default::default()
    }
}

/// Runs each submission in a throwaway container.
///
/// **Container Rules:**
/// - Network disabled
/// - Memory and CPU limits from [`RuntimeConfig`]
/// - Payload passed base64-encoded in an environment variable
/// - Container force-removed after every run, awaited before the call returns
pub struct DockerEngine {
    docker: Docker,
    config: RuntimeConfig,
    /// Label value marking the containers this engine created
    instance: String,
}

impl DockerEngine {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            config,
            instance: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Pull the image if it is not cached locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, code: &str, stdin: &StdinLines) -> Result<String> {
        let payload = RunnerPayload::new(code, stdin, self.config.max_output_bytes);
        let payload = serde_json::to_vec(&payload).context("Failed to encode runner payload")?;

        let config = Config {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![
                "python3".to_string(),
                "-I".to_string(),
                "-c".to_string(),
                RUNNER_SCRIPT.to_string(),
            ]),
            env: Some(vec![format!(
                "{}={}",
                PAYLOAD_ENV,
                general_purpose::STANDARD.encode(payload)
            )]),
            labels: Some(HashMap::from([(
                INSTANCE_LABEL.to_string(),
                self.instance.clone(),
            )])),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.config.memory_limit_bytes()),
                memory_swap: Some(self.config.memory_limit_bytes()),
                nano_cpus: Some(self.config.nano_cpus()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("leveltest-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        Ok(container.id)
    }

    /// Follow the logs until the container stops, then read its exit code.
    /// Stops following as soon as stdout passes its cap.
    async fn collect(&self, container_id: &str) -> RunnerOutput {
        let mut stdout = BoundedBuffer::new(stdout_capture_limit(self.config.max_output_bytes));
        let mut stderr = BoundedBuffer::new(STDERR_CAPTURE_BYTES);

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push(&message);
                    if stdout.overflowed() {
                        warn!(container_id, "Container stdout over capacity");
                        return RunnerOutput {
                            stdout,
                            stderr,
                            exit_code: None,
                        };
                    }
                }
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id, error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = Some(WaitContainerOptions {
            condition: "not-running",
        });

        // A non-zero exit is reported by bollard as an error carrying the code
        let mut wait_stream = self.docker.wait_container(container_id, wait_options);
        let exit_code = match wait_stream.next().await {
            Some(Ok(response)) => Some(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id, error = %e, "Failed to get container exit code");
                None
            }
            None => None,
        };

        RunnerOutput {
            stdout,
            stderr,
            exit_code,
        }
    }

    async fn run(&self, code: &str, stdin: &StdinLines) -> Result<std::result::Result<String, ExecutionError>> {
        self.ensure_image(&self.config.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", self.config.image))?;

        let container_id = self.create_container(code, stdin).await?;
        let guard = ContainerGuard::new(&self.docker, container_id.clone());

        let outcome = self.run_container(&container_id).await;

        let container_id = guard.release();
        if let Err(e) = self
            .docker
            .remove_container(&container_id, Some(force_remove()))
            .await
        {
            warn!(container_id = %container_id, error = %e, "Failed to remove container");
        }

        outcome
    }

    async fn run_container(&self, container_id: &str) -> Result<std::result::Result<String, ExecutionError>> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let timeout_duration = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout_duration, self.collect(container_id)).await {
            Ok(output) => {
                debug!(container_id, exit_code = ?output.exit_code, "Container exited");
                Ok(output.into_outcome(self.config.max_output_bytes))
            }
            Err(_) => {
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id, error = %e, "Failed to kill timed-out container");
                }
                Ok(Err(ExecutionError::Timeout {
                    limit_ms: self.config.timeout_ms,
                }))
            }
        }
    }
}

#[cfg(test)]
impl DockerEngine {
    /// Containers of this engine that still exist, running or not
    pub(crate) async fn containers_left(&self) -> Result<usize> {
        let options = bollard::container::ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{}={}", INSTANCE_LABEL, self.instance)],
            )]),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;
        Ok(containers.len())
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn execute(&self, code: &str, stdin: &StdinLines) -> Execution {
        if let Err(e) = check_limits(code, stdin) {
            warn!(error = %e, "Submission rejected before execution");
            return Execution::failed(e, 0);
        }

        let start_time = Instant::now();
        let outcome = match self.run(code, stdin).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Docker engine failure");
                Err(ExecutionError::sandbox(e))
            }
        };

        Execution {
            outcome,
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}
