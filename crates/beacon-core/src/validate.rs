//! Announce validation: untrusted text in, `Announce` + `PathIdentity` out.
//!
//! The protocol is best-effort: every failure is a typed `ValidationError`
//! that the caller logs and drops. Nothing here has side effects beyond
//! a log record, so one malformed datagram never affects the next.
//!
//! Checks run in a fixed order and the first failure wins:
//!   1. valid JSON object with `method == "announce"`
//!   2. `params.apiVersion` equals the supported version
//!   3. `params.device.uuid` present and non-blank
//!   4. `params.netSettings.interface.name` present and non-blank
//!   5. if `params.router` is present, its `uuid` is non-blank
//!   6. `params.expiration` <= 0 or absent falls back to the default
//!
//! A field that is `null` or of the wrong JSON type counts as absent. An
//! address or service entry missing a required part is dropped on its own.

use std::time::Duration;

use serde_json::Value;

use crate::announce::{Announce, DefaultGateway, Device, Interface, Ipv4Entry, Ipv6Entry, Service};
use crate::identity::PathIdentity;
use crate::wire::{
    WireParams, ANNOUNCE_METHOD, DEFAULT_EXPIRATION_SECS, SUPPORTED_API_VERSION,
};

/// Why an announce was dropped. Diagnostics only, never control flow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("empty message")]
    EmptyMessage,
    #[error("message is not a JSON object")]
    MalformedJson,
    #[error("unsupported method: {0:?}")]
    UnsupportedMethod(Option<String>),
    #[error("unsupported api version: {0:?}")]
    UnsupportedApiVersion(Option<String>),
    #[error("malformed params: {0}")]
    MalformedParams(String),
    #[error("missing params.device")]
    MissingDevice,
    #[error("missing params.device.uuid")]
    MissingDeviceUuid,
    #[error("missing params.netSettings")]
    MissingNetSettings,
    #[error("missing params.netSettings.interface")]
    MissingInterface,
    #[error("missing params.netSettings.interface.name")]
    MissingInterfaceName,
    #[error("params.router present without uuid")]
    MissingRouterUuid,
}

impl ValidationError {
    /// A version we do not speak yet. Expected as the protocol evolves,
    /// so it is logged louder than plain garbage.
    pub fn is_protocol_evolution(&self) -> bool {
        matches!(self, Self::UnsupportedApiVersion(_))
    }
}

/// Output of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub announce: Announce,
    pub identity: PathIdentity,
}

/// Stateless announce validator.
#[derive(Debug, Clone)]
pub struct Validator {
    default_expiration_secs: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_EXPIRATION_SECS))
    }
}

impl Validator {
    /// `default_expiration` is rounded down to whole seconds, minimum one.
    pub fn new(default_expiration: Duration) -> Self {
        Self {
            default_expiration_secs: default_expiration.as_secs().max(1),
        }
    }

    pub fn default_expiration(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs)
    }

    /// Validate one raw message. Logs the rejection reason on failure.
    pub fn validate(&self, raw: &str) -> Result<Validated, ValidationError> {
        let result = self.check(raw);
        if let Err(e) = &result {
            if e.is_protocol_evolution() {
                tracing::info!(reason = %e, "announce ignored");
            } else {
                tracing::debug!(reason = %e, "announce rejected");
            }
        }
        result
    }

    fn check(&self, raw: &str) -> Result<Validated, ValidationError> {
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        let value: Value = serde_json::from_str(raw).map_err(|_| ValidationError::MalformedJson)?;
        let Value::Object(mut envelope) = value else {
            return Err(ValidationError::MalformedJson);
        };

        // Responses carry no method at all and land here too.
        match envelope.get("method").and_then(Value::as_str) {
            Some(ANNOUNCE_METHOD) => {}
            other => return Err(ValidationError::UnsupportedMethod(other.map(str::to_owned))),
        }

        let params = match envelope.remove("params") {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(p @ Value::Object(_)) => p,
            Some(_) => {
                return Err(ValidationError::MalformedParams(
                    "params is not an object".into(),
                ))
            }
        };

        let version = params.get("apiVersion").and_then(Value::as_str);
        if version != Some(SUPPORTED_API_VERSION) {
            return Err(ValidationError::UnsupportedApiVersion(
                version.map(str::to_owned),
            ));
        }

        // Field decoding is lenient, so only a non-object can fail here.
        let params: WireParams = serde_json::from_value(params)
            .map_err(|e| ValidationError::MalformedParams(e.to_string()))?;

        let device = params.device.ok_or(ValidationError::MissingDevice)?;
        let uuid = non_blank(device.uuid).ok_or(ValidationError::MissingDeviceUuid)?;

        let net = params
            .net_settings
            .ok_or(ValidationError::MissingNetSettings)?;
        let iface = net.interface.ok_or(ValidationError::MissingInterface)?;
        let name = non_blank(iface.name).ok_or(ValidationError::MissingInterfaceName)?;

        let router_uuid = match params.router {
            Some(router) => Some(non_blank(router.uuid).ok_or(ValidationError::MissingRouterUuid)?),
            None => None,
        };

        let expiration_secs = match params.expiration {
            Some(secs) if secs > 0 => secs as u64,
            _ => self.default_expiration_secs,
        };

        let announce = Announce {
            api_version: SUPPORTED_API_VERSION.to_owned(),
            device: Device {
                uuid,
                name: device.name,
                device_type: device.device_type,
                family_type: device.family_type,
                firmware_version: device.firmware_version,
                hardware_id: device.hardware_id,
                label: device.label,
                is_router: device.is_router,
            },
            router_uuid,
            interface: Interface {
                name,
                interface_type: iface.interface_type,
                description: iface.description,
                ipv4: iface
                    .ipv4
                    .into_iter()
                    .filter_map(|e| {
                        Some(Ipv4Entry {
                            address: non_blank(e.address)?,
                            netmask: e.netmask.unwrap_or_default(),
                        })
                    })
                    .collect(),
                ipv6: iface
                    .ipv6
                    .into_iter()
                    .filter_map(|e| {
                        Some(Ipv6Entry {
                            address: non_blank(e.address)?,
                            prefix: e.prefix?,
                        })
                    })
                    .collect(),
            },
            default_gateway: net.default_gateway.map(|g| DefaultGateway {
                ipv4_address: g.ipv4_address,
                ipv6_address: g.ipv6_address,
            }),
            services: params
                .services
                .into_iter()
                .filter_map(|s| {
                    Some(Service {
                        service_type: non_blank(s.service_type)?,
                        port: s.port?,
                    })
                })
                .collect(),
            expiration_secs,
        };

        let identity = announce.path_identity();
        Ok(Validated { announce, identity })
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}
