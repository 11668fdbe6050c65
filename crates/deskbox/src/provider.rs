use async_trait::async_trait;

use crate::error::Result;

/// A reusable named image definition on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
}

/// A named persistent volume on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub name: String,
}

/// Resources declared when building a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSpec {
    pub name: String,
    /// Container-image reference the snapshot is built from.
    pub image: String,
    pub cpu: u32,
    pub memory_gb: u32,
    pub disk_gb: u32,
}

/// A volume attachment for a new sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume_id: String,
    pub mount_path: String,
}

/// Parameters for creating a sandbox instance from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSandbox {
    pub snapshot: String,
    pub volumes: Vec<VolumeMount>,
    pub env: Vec<(String, String)>,
}

/// Externally reachable URL (plus bearer token) for one sandbox-internal port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewLink {
    pub url: String,
    pub token: String,
}

/// Capability interface over the cloud sandbox provider.
///
/// Mirrors the provider's own resource model (snapshots, volumes, sandbox
/// instances) without exposing its client types.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Look up a snapshot by name; `None` if the provider doesn't have it.
    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>>;

    async fn create_snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot>;

    /// Look up a volume by name; `None` if the provider doesn't have it.
    async fn get_volume(&self, name: &str) -> Result<Option<Volume>>;

    /// Create a sandbox instance; returns its ID.
    async fn create_sandbox(&self, params: &CreateSandbox) -> Result<String>;

    /// Preview URL and bearer token for a sandbox-internal port.
    async fn preview_link(&self, sandbox_id: &str, port: u16) -> Result<PreviewLink>;

    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<()>;
}
