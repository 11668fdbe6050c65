/// Guest resource envelope passed to both backends as environment variables.
///
/// An explicit record rather than a shared mutable map; callers start from
/// `VmEnv::default()` and override per flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmEnv {
    /// Guest disk size (e.g. "8G").
    pub disk_size: String,
    /// Guest RAM size (e.g. "4G").
    pub ram_size: String,
    /// Guest CPU core count, as the emulator expects it (e.g. "4").
    pub cpu_cores: String,
    /// Disable hardware acceleration (sets `KVM=N` in the guest environment).
    pub disable_accel: bool,
}

impl Default for VmEnv {
    fn default() -> Self {
        Self {
            disk_size: "8G".to_string(),
            ram_size: "4G".to_string(),
            cpu_cores: "4".to_string(),
            disable_accel: false,
        }
    }
}

impl VmEnv {
    /// Render the record as the environment map the VM image understands.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("DISK_SIZE".to_string(), self.disk_size.clone()),
            ("RAM_SIZE".to_string(), self.ram_size.clone()),
            ("CPU_CORES".to_string(), self.cpu_cores.clone()),
        ];
        if self.disable_accel {
            env.push(("KVM".to_string(), "N".to_string()));
        }
        env
    }
}
