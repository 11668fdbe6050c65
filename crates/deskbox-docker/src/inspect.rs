//! Serde model of the slice of `docker inspect` output we consume.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct InspectEntry {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    /// Guest port spec (e.g. `"5000/tcp"`) → host bindings, null when unbound.
    #[serde(rename = "Ports", default)]
    ports: HashMap<String, Option<Vec<PortBinding>>>,
}

#[derive(Debug, Deserialize)]
struct PortBinding {
    #[serde(rename = "HostPort")]
    host_port: String,
}

impl InspectEntry {
    /// Every host-side port this container publishes.
    ///
    /// Bindings whose `HostPort` does not parse (never seen from a healthy
    /// daemon) are skipped rather than failing the whole scan.
    pub fn host_ports(&self) -> BTreeSet<u16> {
        self.network_settings
            .ports
            .values()
            .flatten()
            .flatten()
            .filter_map(|binding| binding.host_port.parse().ok())
            .collect()
    }
}
