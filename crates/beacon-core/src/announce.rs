//! Validated announce: the immutable value handed between components.
//!
//! An `Announce` only exists once every required field has been checked,
//! so downstream code never re-validates. Equality is full structural
//! equality: two announces from the same path that differ in any field
//! (an address, a service port) are different announces.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;

use crate::identity::PathIdentity;

/// A fully validated announce datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Announce {
    pub api_version: String,
    pub device: Device,
    /// Present when the device is reached through a router.
    pub router_uuid: Option<String>,
    pub interface: Interface,
    pub default_gateway: Option<DefaultGateway>,
    pub services: Vec<Service>,
    /// Already defaulted by the validator, always positive.
    pub expiration_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub uuid: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub family_type: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_id: Option<String>,
    pub label: Option<String>,
    pub is_router: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    #[serde(rename = "type")]
    pub interface_type: Option<String>,
    pub description: Option<String>,
    pub ipv4: Vec<Ipv4Entry>,
    pub ipv6: Vec<Ipv6Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv4Entry {
    pub address: String,
    pub netmask: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv6Entry {
    pub address: String,
    pub prefix: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultGateway {
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
}

/// A service the device offers on this interface, e.g. `http` on port 80.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    #[serde(rename = "type")]
    pub service_type: String,
    pub port: u16,
}

impl Announce {
    /// The path this announce arrived over: device, router, interface.
    pub fn path_identity(&self) -> PathIdentity {
        PathIdentity::new(
            &self.device.uuid,
            self.router_uuid.as_deref(),
            &self.interface.name,
        )
    }

    /// How long the presence stays alive without a refresh.
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    /// Announced IPv4 addresses with their netmasks.
    /// Entries that do not parse as dotted quads are skipped.
    pub fn ipv4_addresses(&self) -> Vec<(Ipv4Addr, Ipv4Addr)> {
        self.interface
            .ipv4
            .iter()
            .filter_map(|e| {
                let addr = e.address.parse().ok()?;
                let mask = e.netmask.parse().unwrap_or(Ipv4Addr::BROADCAST);
                Some((addr, mask))
            })
            .collect()
    }

    /// Look up the port of an announced service by type.
    pub fn service_port(&self, service_type: &str) -> Option<u16> {
        self.services
            .iter()
            .find(|s| s.service_type == service_type)
            .map(|s| s.port)
    }
}
