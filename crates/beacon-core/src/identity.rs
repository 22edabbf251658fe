//! Path identity: "this device, via this router, via this interface".
//!
//! The same device UUID announced over two interfaces (or through two
//! routers) yields two identities and is tracked as two presences.

use std::fmt;

/// Canonical key for one announce path. BLAKE3 over the ordered components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathIdentity([u8; 32]);

impl PathIdentity {
    /// Derive the identity from its components.
    ///
    /// Each component is length-prefixed and the router slot carries a
    /// presence tag, so no two distinct triples hash the same input.
    pub fn new(device_uuid: &str, router_uuid: Option<&str>, interface_name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        put(&mut hasher, device_uuid);
        match router_uuid {
            Some(router) => {
                hasher.update(&[1]);
                put(&mut hasher, router);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        put(&mut hasher, interface_name);
        Self(*hasher.finalize().as_bytes())
    }

    /// Full lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn put(hasher: &mut blake3::Hasher, component: &str) {
    hasher.update(&(component.len() as u64).to_le_bytes());
    hasher.update(component.as_bytes());
}

impl fmt::Display for PathIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PathIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathIdentity({})", self)
    }
}
