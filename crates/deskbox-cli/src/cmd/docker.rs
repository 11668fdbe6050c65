use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use deskbox::{
    BindMount, ContainerRuntime, ContainerSpec, ImageStore, PortMapping, ServicePorts, VmEnv,
    WaitConfig, fetch, lock, ports, readiness,
};
use deskbox_docker::DockerCli;

use crate::error::{CliError, CliResult};

/// Container image that boots the desktop VM from a mounted qcow2 disk.
const VM_IMAGE: &str = "synacktra/osworld-docker";
/// Default location of the compressed disk-image artifact.
const DEFAULT_IMAGE_URL: &str =
    "https://huggingface.co/datasets/xlangai/ubuntu_osworld/resolve/main/Ubuntu.qcow2.tar.gz";
/// Where the raw disk image is bind-mounted inside the container.
const IMAGE_MOUNT_PATH: &str = "/vm/System.qcow2";
const KVM_DEVICE: &str = "/dev/kvm";
/// Serializes the scan→allocate→create section across deskbox processes.
const LOCK_FILE: &str = "deskbox-port-allocation.lock";

#[derive(Args)]
pub struct DockerArgs {
    /// URL of the compressed disk-image artifact (.tar.gz)
    #[arg(long, env = "DESKBOX_IMAGE_URL", default_value = DEFAULT_IMAGE_URL)]
    image_url: String,
    /// Directory holding downloaded disk images (default: ~/.deskbox/vms)
    #[arg(long, env = "DESKBOX_VMS_DIR")]
    vms_dir: Option<PathBuf>,
    /// Seconds to wait for the VM to become ready
    #[arg(long, default_value_t = 300)]
    ready_timeout_secs: u64,
}

pub async fn run_docker(args: DockerArgs) -> CliResult<()> {
    let docker = DockerCli::new();
    docker.check_available()?;

    let vms_dir = match args.vms_dir {
        Some(dir) => dir,
        None => default_vms_dir()?,
    };
    let store = ImageStore::new(vms_dir);
    let client = reqwest::Client::new();

    let image_path = fetch::ensure_image(&client, &store, &args.image_url).await?;
    info!(image = %image_path.display(), "disk image ready");

    let wait = WaitConfig {
        timeout: Duration::from_secs(args.ready_timeout_secs),
        ..WaitConfig::default()
    };
    provision(&docker, &client, &image_path, &wait).await
}

/// Allocate ports, start the container, wait for readiness, and always tear
/// the container down afterwards.
async fn provision<R: ContainerRuntime>(
    runtime: &R,
    client: &reqwest::Client,
    image_path: &Path,
    wait: &WaitConfig,
) -> CliResult<()> {
    let (container_id, service_ports) = {
        // The lock covers the occupied-set snapshot through container
        // creation; once `docker run` returns, the ports are published and
        // visible to the next allocator's scan.
        let lock_path = std::env::temp_dir().join(LOCK_FILE);
        let _lock = lock::acquire(&lock_path, lock::DEFAULT_TIMEOUT).await?;

        let mut occupied = ports::system_occupied_ports();
        occupied.extend(ports::container_occupied_ports(
            &runtime.list_running().await?,
        ));
        let service_ports = ports::allocate_service_ports(&mut occupied)?;

        let id = runtime.create(&vm_spec(image_path, service_ports)).await?;
        (id, service_ports)
    };
    info!(
        id = super::short_id(&container_id),
        api = service_ports.api,
        display = service_ports.display,
        devtools = service_ports.devtools,
        media = service_ports.media,
        "container started"
    );

    let base_url = format!("http://localhost:{}", service_ports.api);
    let outcome = readiness::wait_for_vm(client, &base_url, None, wait).await;

    teardown(runtime, &container_id).await;

    let image = outcome?;
    super::save_screenshot(&image, super::short_id(&container_id)).await?;
    Ok(())
}

/// Build the container spec, probing `/dev/kvm` for hardware acceleration.
fn vm_spec(image_path: &Path, service_ports: ServicePorts) -> ContainerSpec {
    let mut env = VmEnv::default();
    let mut devices = Vec::new();
    if Path::new(KVM_DEVICE).exists() {
        info!("KVM device found, using hardware acceleration");
        devices.push(KVM_DEVICE.to_string());
    } else {
        warn!("KVM device not found, running without hardware acceleration (will be slower)");
        env.disable_accel = true;
    }

    ContainerSpec {
        image: VM_IMAGE.to_string(),
        env: env.to_env(),
        cap_add: vec!["NET_ADMIN".to_string()],
        devices,
        mounts: vec![BindMount {
            host_path: image_path.to_path_buf(),
            guest_path: IMAGE_MOUNT_PATH.to_string(),
            read_only: true,
        }],
        ports: vec![
            PortMapping {
                host: service_ports.api,
                guest: ports::API_PORT_BASE,
            },
            PortMapping {
                host: service_ports.display,
                guest: ports::DISPLAY_PORT_BASE,
            },
            PortMapping {
                host: service_ports.devtools,
                guest: ports::DEVTOOLS_PORT_BASE,
            },
            PortMapping {
                host: service_ports.media,
                guest: ports::MEDIA_PORT_BASE,
            },
        ],
    }
}

/// Best-effort teardown; failures are logged, never raised, so they cannot
/// mask the readiness outcome.
async fn teardown<R: ContainerRuntime>(runtime: &R, id: &str) {
    if let Err(e) = runtime.stop(id).await {
        warn!(id = super::short_id(id), error = %e, "container stop failed");
    }
    if let Err(e) = runtime.remove(id).await {
        warn!(id = super::short_id(id), error = %e, "container remove failed");
    }
}

fn default_vms_dir() -> CliResult<PathBuf> {
    let home = std::env::var_os("HOME")
        .ok_or_else(|| CliError::Config("HOME not set and --vms-dir not given".to_string()))?;
    Ok(PathBuf::from(home).join(".deskbox").join("vms"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use deskbox::{ProvisionError, Result, RunningContainer};

    use super::*;

    /// Records lifecycle calls; readiness against the allocated port fails
    /// because nothing listens there.
    #[derive(Default)]
    struct MockRuntime {
        calls: Mutex<Vec<String>>,
        specs: Mutex<Vec<ContainerSpec>>,
        published: BTreeSet<u16>,
    }

    impl MockRuntime {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn list_running(&self) -> Result<Vec<RunningContainer>> {
            self.calls.lock().unwrap().push("list".to_string());
            Ok(vec![RunningContainer {
                id: "existing".to_string(),
                host_ports: self.published.clone(),
            }])
        }

        async fn create(&self, spec: &ContainerSpec) -> Result<String> {
            self.calls.lock().unwrap().push("create".to_string());
            self.specs.lock().unwrap().push(spec.clone());
            Ok("deadbeefdeadbeef".to_string())
        }

        async fn stop(&self, _id: &str) -> Result<()> {
            self.calls.lock().unwrap().push("stop".to_string());
            Ok(())
        }

        async fn remove(&self, _id: &str) -> Result<()> {
            self.calls.lock().unwrap().push("remove".to_string());
            Ok(())
        }
    }

    fn fast_wait() -> WaitConfig {
        WaitConfig {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(50),
            request_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn teardown_runs_after_readiness_failure() {
        let runtime = MockRuntime::default();
        let client = reqwest::Client::new();
        let image = std::env::temp_dir().join("fake.qcow2");

        let err = provision(&runtime, &client, &image, &fast_wait())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CliError::Provision(ProvisionError::ReadyTimeout(_))
        ));
        assert_eq!(runtime.calls(), vec!["list", "create", "stop", "remove"]);
    }

    #[tokio::test]
    async fn created_container_publishes_four_distinct_ports() {
        let runtime = MockRuntime::default();
        let client = reqwest::Client::new();
        let image = std::env::temp_dir().join("fake.qcow2");

        let _ = provision(&runtime, &client, &image, &fast_wait()).await;

        let specs = runtime.specs.lock().unwrap();
        let spec = specs.first().unwrap();
        let hosts: BTreeSet<u16> = spec.ports.iter().map(|p| p.host).collect();
        assert_eq!(hosts.len(), 4);
        assert_eq!(spec.cap_add, vec!["NET_ADMIN".to_string()]);
        assert!(spec.mounts.first().unwrap().read_only);
    }

    #[tokio::test]
    async fn allocation_avoids_ports_published_by_containers() {
        let mut published = BTreeSet::new();
        published.insert(ports::API_PORT_BASE);
        let runtime = MockRuntime {
            published,
            ..MockRuntime::default()
        };
        let client = reqwest::Client::new();
        let image = std::env::temp_dir().join("fake.qcow2");

        let _ = provision(&runtime, &client, &image, &fast_wait()).await;

        let specs = runtime.specs.lock().unwrap();
        let api_mapping = specs
            .first()
            .unwrap()
            .ports
            .iter()
            .find(|p| p.guest == ports::API_PORT_BASE)
            .copied()
            .unwrap();
        assert_ne!(api_mapping.host, ports::API_PORT_BASE);
    }

    #[test]
    fn vm_spec_mounts_image_read_only() {
        let spec = vm_spec(
            Path::new("/data/vms/Ubuntu.qcow2"),
            ServicePorts {
                api: 5000,
                display: 8006,
                devtools: 9222,
                media: 8080,
            },
        );
        let mount = spec.mounts.first().unwrap();
        assert_eq!(mount.guest_path, IMAGE_MOUNT_PATH);
        assert!(mount.read_only);
        assert_eq!(spec.image, VM_IMAGE);
    }
}
