use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

/// A host↔guest port publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub guest: u16,
}

/// A host file bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub guest_path: String,
    pub read_only: bool,
}

/// Everything needed to start one VM container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<(String, String)>,
    pub cap_add: Vec<String>,
    /// Host devices passed through verbatim (e.g. `/dev/kvm`).
    pub devices: Vec<String>,
    pub mounts: Vec<BindMount>,
    pub ports: Vec<PortMapping>,
}

/// A running container as seen by the occupied-port scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    /// Host-side ports currently published by this container.
    pub host_ports: BTreeSet<u16>,
}

/// Capability interface over the local container runtime.
///
/// The provisioning flow and the port allocator depend only on this trait, so
/// they carry no compile-time coupling to any concrete runtime client.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All currently running containers with their published host ports.
    async fn list_running(&self) -> Result<Vec<RunningContainer>>;

    /// Create and start a detached container; returns its ID.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn stop(&self, id: &str) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;
}
