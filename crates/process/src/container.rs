// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Container executor over the docker daemon.
//!
//! Same contract as the local executor, with the container name as the
//! handle and the container log standing in for the logfile.

use bollard::{
    container::{
        Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use cf_types::{ForgeError, ForgeResult};
use futures::StreamExt;
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

/// Everything needed to run one node container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// (host, container) port pairs, bound on loopback.
    pub ports: Vec<(u16, u16)>,
    /// (host path, container path) bind mounts.
    pub volumes: Vec<(PathBuf, String)>,
}

/// Thin wrapper around the docker API for node lifecycle operations.
#[derive(Clone, Debug)]
pub struct ContainerExecutor {
    docker: Docker,
}

impl ContainerExecutor {
    /// Connect to the local docker daemon.
    pub fn connect() -> ForgeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ForgeError::unavailable("docker daemon", e.to_string()))?;
        Ok(Self { docker })
    }

    /// Ensure `image` is present locally, pulling it if necessary.
    pub async fn pull(&self, image: &str) -> ForgeResult<()> {
        info!(target: "forge::process", image, "pulling image");
        let options = CreateImageOptions { from_image: image, ..Default::default() };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| ForgeError::unavailable("image pull", e.to_string()))?;
        }
        Ok(())
    }

    /// Create and start the container described by `spec`, replacing any
    /// stale container of the same name.
    pub async fn start(&self, spec: &ContainerSpec) -> ForgeResult<()> {
        // a leftover from a previous run would collide on the name
        self.remove(&spec.name).await?;

        let (exposed, bindings) = port_maps(&spec.ports);
        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|(host, container)| format!("{}:{container}", host.display()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed),
            host_config: Some(HostConfig {
                port_bindings: Some(bindings),
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions { name: spec.name.as_str(), platform: None }),
                config,
            )
            .await
            .map_err(|e| ForgeError::unavailable("docker create", e.to_string()))?;
        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ForgeError::unavailable("docker start", e.to_string()))?;

        info!(target: "forge::process", name = %spec.name, image = %spec.image, "container started");
        Ok(())
    }

    /// Graceful stop with the daemon-side timeout, then kill. Idempotent:
    /// a missing or already-stopped container is a success.
    pub async fn stop(&self, name: &str, timeout: Duration) -> ForgeResult<()> {
        let options = StopContainerOptions { t: timeout.as_secs() as i64 };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => {
                warn!(target: "forge::process", name, %e, "stop failed; killing container");
                self.kill(name).await
            }
        }
    }

    /// Immediate unconditional termination.
    pub async fn kill(&self, name: &str) -> ForgeResult<()> {
        match self.docker.kill_container(name, None::<KillContainerOptions<String>>).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(ForgeError::unavailable("docker kill", e.to_string())),
        }
    }

    /// Remove the container (and its anonymous volumes), if it exists.
    pub async fn remove(&self, name: &str) -> ForgeResult<()> {
        let options = RemoveContainerOptions { force: true, v: true, ..Default::default() };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                debug!(target: "forge::process", name, "stale container removed");
                Ok(())
            }
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(ForgeError::unavailable("docker remove", e.to_string())),
        }
    }

    /// Whether the named container is currently running. Container
    /// liveness is the source of truth for "started" in container mode.
    pub async fn is_running(&self, name: &str) -> bool {
        match self.docker.inspect_container(name, None).await {
            Ok(details) => details
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Run `cmd` in a fresh container to completion and return its output
    /// lines. The container is removed afterwards. Used for one-shot work
    /// (state exports) against a stopped node's volume.
    pub async fn run_once(
        &self,
        name: &str,
        image: &str,
        cmd: Vec<String>,
        volumes: Vec<(PathBuf, String)>,
    ) -> ForgeResult<Vec<String>> {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            cmd,
            env: Vec::new(),
            ports: Vec::new(),
            volumes,
        };
        self.start(&spec).await?;

        let mut wait = self
            .docker
            .wait_container(name, None::<bollard::container::WaitContainerOptions<String>>);
        let mut exit_code = 0;
        while let Some(response) = wait.next().await {
            match response {
                Ok(body) => exit_code = body.status_code,
                // the daemon reports non-zero exits as a wait error
                Err(DockerError::DockerContainerWaitError { code, .. }) => exit_code = code,
                Err(e) if is_gone(&e) => break,
                Err(e) => {
                    let _ = self.remove(name).await;
                    return Err(ForgeError::unavailable("docker wait", e.to_string()));
                }
            }
        }

        let lines = self.logs_tail(name, 100_000).await?;
        self.remove(name).await?;

        if exit_code != 0 {
            return Err(ForgeError::unavailable(
                "container command",
                format!("exit {exit_code}: {}", lines.last().cloned().unwrap_or_default()),
            ));
        }
        Ok(lines)
    }

    /// Last `lines` lines of the container log (stdout and stderr).
    pub async fn logs_tail(&self, name: &str, lines: usize) -> ForgeResult<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: lines.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ForgeError::unavailable("docker logs", e.to_string()))?;
            out.extend(
                String::from_utf8_lossy(&chunk.into_bytes())
                    .lines()
                    .map(|l| l.to_string()),
            );
        }
        Ok(out)
    }
}

/// A 404 (no such container) or 304 (already stopped) from the daemon.
fn is_gone(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError { status_code: 404 | 304, .. }
    )
}

type ExposedPorts = HashMap<String, HashMap<(), ()>>;
type Bindings = HashMap<String, Option<Vec<PortBinding>>>;

fn port_maps(ports: &[(u16, u16)]) -> (ExposedPorts, Bindings) {
    let mut exposed = HashMap::new();
    let mut bindings = HashMap::new();
    for (host, container) in ports {
        let key = format!("{container}/tcp");
        exposed.insert(key.clone(), HashMap::new());
        bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(host.to_string()),
            }]),
        );
    }
    (exposed, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_maps_bind_loopback_per_container_port() {
        let (exposed, bindings) = port_maps(&[(26667, 26657), (9100, 9090)]);
        assert!(exposed.contains_key("26657/tcp"));
        assert!(exposed.contains_key("9090/tcp"));
        let rpc = bindings["26657/tcp"].as_ref().unwrap();
        assert_eq!(rpc[0].host_port.as_deref(), Some("26667"));
        assert_eq!(rpc[0].host_ip.as_deref(), Some("127.0.0.1"));
    }
}
