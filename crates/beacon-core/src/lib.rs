//! beacon-core: announce wire format, validation, and path identity.
//! All other Beacon crates depend on this one.

pub mod announce;
pub mod config;
pub mod identity;
pub mod validate;
pub mod wire;

pub use announce::Announce;
pub use identity::PathIdentity;
pub use validate::{Validated, ValidationError, Validator};
