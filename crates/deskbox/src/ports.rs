//! Occupied-port discovery and free-port selection for the local backend.
//!
//! The occupied set is the union of every local port appearing in the host's
//! connection tables (any state, not just LISTEN) and every host-side port
//! published by a running container. It is rebuilt from scratch on each
//! allocation pass and is only a point-in-time snapshot; the allocation lock
//! in [`crate::lock`] serializes concurrent allocators of this crate, nothing
//! more.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{ProvisionError, Result};
use crate::runtime::RunningContainer;

/// Ports are drawn from `[start, PORT_LIMIT)`.
const PORT_LIMIT: u32 = 65354;

/// Baseline port for the VM control API.
pub const API_PORT_BASE: u16 = 5000;
/// Baseline port for the remote display (VNC-over-HTTP).
pub const DISPLAY_PORT_BASE: u16 = 8006;
/// Baseline port for the browser remote-debugging endpoint.
pub const DEVTOOLS_PORT_BASE: u16 = 9222;
/// Baseline port for the media relay.
pub const MEDIA_PORT_BASE: u16 = 8080;

/// Connection tables scanned for locally used ports.
const PROC_NET_TABLES: [&str; 4] = [
    "/proc/net/tcp",
    "/proc/net/tcp6",
    "/proc/net/udp",
    "/proc/net/udp6",
];

/// Host ports granted to one VM instance, one per multiplexed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePorts {
    pub api: u16,
    pub display: u16,
    pub devtools: u16,
    pub media: u16,
}

/// Every local port currently present in the host's connection tables.
///
/// Tables that cannot be read (or rows that fail to parse) are skipped, so a
/// host without e.g. IPv6 support still yields a usable snapshot.
pub fn system_occupied_ports() -> BTreeSet<u16> {
    let mut occupied = BTreeSet::new();
    for table in PROC_NET_TABLES {
        match std::fs::read_to_string(table) {
            Ok(content) => {
                occupied.extend(parse_local_ports(&content));
            }
            Err(e) => {
                debug!(table, error = %e, "skipping unreadable connection table");
            }
        }
    }
    occupied
}

/// Parse the local ports out of a `/proc/net/{tcp,udp}`-format table.
///
/// Rows look like `0: 0100007F:1388 00000000:0000 0A ...`; the local address
/// is the second column and its port is hex after the last colon.
fn parse_local_ports(content: &str) -> BTreeSet<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let local = line.split_whitespace().nth(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

/// Every host-side port published by the given running containers.
pub fn container_occupied_ports(containers: &[RunningContainer]) -> BTreeSet<u16> {
    containers
        .iter()
        .flat_map(|c| c.host_ports.iter().copied())
        .collect()
}

/// The smallest free port at or above `start`.
///
/// Fails with [`ProvisionError::PortsExhausted`] when every port in
/// `[start, 65354)` is occupied.
pub fn next_available_port(start: u16, occupied: &BTreeSet<u16>) -> Result<u16> {
    (u32::from(start)..PORT_LIMIT)
        .filter_map(|p| u16::try_from(p).ok())
        .find(|p| !occupied.contains(p))
        .ok_or(ProvisionError::PortsExhausted { start })
}

/// Allocate one host port per service against a single occupied-set snapshot.
///
/// Each grant is inserted into `occupied` before the next service is served,
/// so the four results are mutually distinct even when walking up from one
/// baseline reaches another baseline's range.
pub fn allocate_service_ports(occupied: &mut BTreeSet<u16>) -> Result<ServicePorts> {
    let mut take = |start: u16| -> Result<u16> {
        let port = next_available_port(start, occupied)?;
        occupied.insert(port);
        Ok(port)
    };
    Ok(ServicePorts {
        api: take(API_PORT_BASE)?,
        display: take(DISPLAY_PORT_BASE)?,
        devtools: take(DEVTOOLS_PORT_BASE)?,
        media: take(MEDIA_PORT_BASE)?,
    })
}
