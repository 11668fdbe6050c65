mod config;
mod error;
pub mod fetch;
pub mod lock;
mod paths;
pub mod ports;
mod provider;
pub mod readiness;
mod runtime;

pub use config::VmEnv;
pub use error::{ProvisionError, Result};
pub use paths::ImageStore;
pub use ports::ServicePorts;
pub use provider::{
    CreateSandbox, PreviewLink, SandboxProvider, Snapshot, SnapshotSpec, Volume, VolumeMount,
};
pub use readiness::WaitConfig;
pub use runtime::{BindMount, ContainerRuntime, ContainerSpec, PortMapping, RunningContainer};
