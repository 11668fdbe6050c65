use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use deskbox::{
    CreateSandbox, SandboxProvider, SnapshotSpec, VmEnv, VolumeMount, WaitConfig, ports, readiness,
};
use deskbox_cloud::CloudClient;

use crate::error::CliResult;

/// How a cloud provisioning run sources its disk image.
struct CloudPlan {
    snapshot: &'static str,
    image: &'static str,
    cpu: u32,
    memory_gb: u32,
    disk_gb: u32,
    volume: Option<VolumePlan>,
}

struct VolumePlan {
    name: &'static str,
    mount_path: &'static str,
}

/// Default plan: the disk image lives on a pre-built persistent volume.
const VOLUME_BASED: CloudPlan = CloudPlan {
    snapshot: "osworld",
    image: "synacktra/osworld-docker:latest",
    cpu: 4,
    memory_gb: 8,
    disk_gb: 10,
    volume: Some(VolumePlan {
        name: "osworld-ubuntu-vm",
        mount_path: "/vm",
    }),
};

/// `--bundled`: the snapshot image ships the disk image itself.
const BUNDLED: CloudPlan = CloudPlan {
    snapshot: "osworld-ubuntu",
    image: "synacktra/osworld-ubuntu:latest",
    cpu: 4,
    memory_gb: 8,
    disk_gb: 25,
    volume: None,
};

#[derive(Args)]
pub struct CloudArgs {
    /// Sandbox provider API URL
    #[arg(long, env = "DESKBOX_CLOUD_API_URL")]
    api_url: String,
    /// Sandbox provider API key
    #[arg(long, env = "DESKBOX_CLOUD_API_KEY", hide_env_values = true)]
    api_key: String,
    /// Use the self-contained snapshot that bundles the disk image
    #[arg(long)]
    bundled: bool,
    /// Seconds to wait for the VM to become ready
    #[arg(long, default_value_t = 300)]
    ready_timeout_secs: u64,
}

pub async fn run_cloud(args: CloudArgs) -> CliResult<()> {
    let provider = CloudClient::new(args.api_url, args.api_key)?;
    let plan = if args.bundled { &BUNDLED } else { &VOLUME_BASED };
    let wait = WaitConfig {
        timeout: Duration::from_secs(args.ready_timeout_secs),
        ..WaitConfig::default()
    };
    provision(&provider, &reqwest::Client::new(), plan, &wait).await
}

/// Get-or-create the snapshot, create a sandbox from it, wait for readiness,
/// and always delete the sandbox afterwards.
async fn provision<P: SandboxProvider>(
    provider: &P,
    client: &reqwest::Client,
    plan: &CloudPlan,
    wait: &WaitConfig,
) -> CliResult<()> {
    let volumes = match &plan.volume {
        Some(volume_plan) => match provider.get_volume(volume_plan.name).await? {
            Some(volume) => vec![VolumeMount {
                volume_id: volume.id,
                mount_path: volume_plan.mount_path.to_string(),
            }],
            None => {
                info!(
                    "volume '{}' not found; build the disk-image volume first, then re-run",
                    volume_plan.name
                );
                return Ok(());
            }
        },
        None => Vec::new(),
    };

    let snapshot = match provider.get_snapshot(plan.snapshot).await? {
        Some(snapshot) => snapshot,
        None => {
            info!(name = plan.snapshot, "snapshot not found, creating");
            provider
                .create_snapshot(&SnapshotSpec {
                    name: plan.snapshot.to_string(),
                    image: plan.image.to_string(),
                    cpu: plan.cpu,
                    memory_gb: plan.memory_gb,
                    disk_gb: plan.disk_gb,
                })
                .await?
        }
    };
    info!(id = %snapshot.id, name = %snapshot.name, "using snapshot");

    let sandbox_id = provider
        .create_sandbox(&CreateSandbox {
            snapshot: plan.snapshot.to_string(),
            volumes,
            env: VmEnv::default().to_env(),
        })
        .await?;
    info!(id = %sandbox_id, "sandbox created");

    let outcome = wait_ready(provider, client, &sandbox_id, wait).await;

    if let Err(e) = provider.delete_sandbox(&sandbox_id).await {
        warn!(id = %sandbox_id, error = %e, "sandbox delete failed");
    }

    let image = outcome?;
    super::save_screenshot(&image, super::short_id(&sandbox_id)).await?;
    Ok(())
}

/// Resolve the preview URL for the control API port and poll it.
async fn wait_ready<P: SandboxProvider>(
    provider: &P,
    client: &reqwest::Client,
    sandbox_id: &str,
    wait: &WaitConfig,
) -> CliResult<Vec<u8>> {
    let link = provider
        .preview_link(sandbox_id, ports::API_PORT_BASE)
        .await?;
    Ok(readiness::wait_for_vm(client, &link.url, Some(&link.token), wait).await?)
}
