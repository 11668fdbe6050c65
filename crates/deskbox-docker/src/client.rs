use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use deskbox::{ContainerRuntime, ContainerSpec, ProvisionError, Result, RunningContainer};

use crate::inspect::InspectEntry;

/// `ContainerRuntime` implementation that drives the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Fail early when the docker binary is not on PATH.
    pub fn check_available(&self) -> Result<()> {
        which::which(&self.binary).map_err(|e| {
            ProvisionError::Backend(format!("container runtime not found: {} ({e})", self.binary))
        })?;
        Ok(())
    }

    /// Run a docker subcommand, returning trimmed stdout.
    async fn exec(&self, args: &[&str]) -> Result<String> {
        let cmdline = format!("{} {}", self.binary, args.join(" "));
        trace!(command = %cmdline, "exec");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| ProvisionError::Backend(format!("spawn {cmdline}: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(ProvisionError::Backend(format!(
                "command failed: {cmdline}\n{stderr}"
            )))
        }
    }
}

/// Render a `ContainerSpec` as `docker run` arguments.
fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--detach".to_string()];
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    for cap in &spec.cap_add {
        args.push("--cap-add".to_string());
        args.push(cap.clone());
    }
    for device in &spec.devices {
        args.push("--device".to_string());
        args.push(device.clone());
    }
    for mount in &spec.mounts {
        let mode = if mount.read_only { ":ro" } else { "" };
        args.push("--volume".to_string());
        args.push(format!(
            "{}:{}{mode}",
            mount.host_path.display(),
            mount.guest_path
        ));
    }
    for port in &spec.ports {
        args.push("--publish".to_string());
        args.push(format!("{}:{}", port.host, port.guest));
    }
    args.push(spec.image.clone());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_running(&self) -> Result<Vec<RunningContainer>> {
        let ids = self.exec(&["ps", "--quiet", "--no-trunc"]).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect"];
        args.extend(ids.lines());
        let raw = self.exec(&args).await?;

        let entries: Vec<InspectEntry> = serde_json::from_str(&raw)
            .map_err(|e| ProvisionError::Backend(format!("parse docker inspect output: {e}")))?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let host_ports = entry.host_ports();
                RunningContainer {
                    id: entry.id,
                    host_ports,
                }
            })
            .collect())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let args = run_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.exec(&arg_refs).await?;
        if id.is_empty() {
            return Err(ProvisionError::Backend(
                "docker run returned no container ID".to_string(),
            ));
        }
        Ok(id)
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.exec(&["stop", id]).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.exec(&["rm", id]).await?;
        Ok(())
    }
}
