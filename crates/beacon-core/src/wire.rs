//! Beacon wire format: the JSON-RPC announce datagram as it arrives.
//!
//! Devices multicast one `announce` notification per interface every
//! `expiration / 2` seconds. The JSON-RPC envelope is checked on a raw
//! `serde_json::Value`; only `params` is decoded into these types.
//!
//! Every field here is optional and decoded leniently: a missing key, a
//! JSON `null`, or a value of the wrong type all come out as absent.
//! Requiredness is enforced by the validator, so a wrong-typed
//! `device.uuid` is reported as a missing uuid rather than a parse error,
//! and a bad optional field never drops an otherwise valid announce.
//! Unknown fields are ignored so newer senders stay readable.

use std::net::Ipv4Addr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

// ── Protocol constants ────────────────────────────────────────────────────────

/// JSON-RPC method name carried by every announce datagram.
pub const ANNOUNCE_METHOD: &str = "announce";

/// The only `params.apiVersion` this implementation understands.
pub const SUPPORTED_API_VERSION: &str = "1.0";

/// Expiration applied when an announce carries none, zero, or a negative value.
pub const DEFAULT_EXPIRATION_SECS: u64 = 6;

/// Default bound for each of the two dedup cache indexes.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// IPv4 multicast group announces are sent to.
pub const ANNOUNCE_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 100, 1);

/// UDP port announces are sent to.
pub const ANNOUNCE_PORT: u16 = 8765;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// ── Params ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireParams {
    #[serde(default, deserialize_with = "lenient")]
    pub api_version: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub device: Option<WireDevice>,
    #[serde(default, deserialize_with = "lenient")]
    pub net_settings: Option<WireNetSettings>,
    #[serde(default, deserialize_with = "lenient")]
    pub router: Option<WireRouter>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub services: Vec<WireService>,
    #[serde(default, deserialize_with = "lenient")]
    pub expiration: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDevice {
    #[serde(default, deserialize_with = "lenient")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub device_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub family_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub firmware_version: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub hardware_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_router: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNetSettings {
    #[serde(default, deserialize_with = "lenient")]
    pub default_gateway: Option<WireGateway>,
    #[serde(default, deserialize_with = "lenient")]
    pub interface: Option<WireInterface>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGateway {
    #[serde(default, deserialize_with = "lenient")]
    pub ipv4_address: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub ipv6_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireInterface {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub interface_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub ipv4: Vec<WireIpv4>,
    #[serde(default, deserialize_with = "lenient_seq")]
    pub ipv6: Vec<WireIpv6>,
}

/// Entries missing their address are dropped by the validator, not rejected.
#[derive(Debug, Default, Deserialize)]
pub struct WireIpv4 {
    #[serde(default, deserialize_with = "lenient")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub netmask: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireIpv6 {
    #[serde(default, deserialize_with = "lenient")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub prefix: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireRouter {
    #[serde(default, deserialize_with = "lenient")]
    pub uuid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireService {
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub service_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub port: Option<u16>,
}

/// Decode a field, falling back to the default on `null` or a type mismatch.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Decode an array element by element, skipping elements that do not fit.
/// Anything other than an array decodes as empty.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}
