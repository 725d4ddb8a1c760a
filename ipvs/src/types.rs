// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::net::Ipv4Addr;

use api::L4Protocol;

/// Session-affinity / hash flags carried on an IPVS virtual server.
///
/// The kernel always reports a freshly-created service with `HASHED` set
/// (every service lives in the kernel's hash table); callers never set that
/// bit themselves; `bmlb-ipvs`'s kernel backend strips it on read and rejects
/// any read that is missing it (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceFlags(u32);

impl ServiceFlags {
    pub const PERSISTENT: ServiceFlags = ServiceFlags(0x1);
    pub const HASHED: ServiceFlags = ServiceFlags(0x2);

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn contains(self, flag: ServiceFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[must_use]
    pub fn without(self, flag: ServiceFlags) -> Self {
        Self(self.0 & !flag.0)
    }

    #[must_use]
    pub fn with(self, flag: ServiceFlags) -> Self {
        Self(self.0 | flag.0)
    }
}

/// A user-facing description of an IPVS virtual server (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualServer {
    pub address: Ipv4Addr,
    pub protocol: L4Protocol,
    pub port: u16,
    pub scheduler: String,
    pub flags: ServiceFlags,
    pub timeout: u32,
}

impl VirtualServer {
    #[must_use]
    pub fn new(address: Ipv4Addr, protocol: L4Protocol, port: u16) -> Self {
        Self {
            address,
            protocol,
            port,
            scheduler: "rr".to_string(),
            flags: ServiceFlags::default(),
            timeout: 0,
        }
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }
}

impl fmt::Display for VirtualServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.address, self.port, self.protocol)
    }
}

/// A user-facing description of an IPVS real (backend) server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealServer {
    pub address: Ipv4Addr,
    pub port: u16,
    pub weight: u32,
}

impl RealServer {
    #[must_use]
    pub fn new(address: Ipv4Addr, port: u16, weight: u32) -> Self {
        Self {
            address,
            port,
            weight,
        }
    }

    /// Identity key used to diff real-server sets: weight differences are
    /// best-effort drift and do not trigger delete-then-add (spec.md §4.5).
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for RealServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_flags_strip_hashed() {
        let flags = ServiceFlags::HASHED.with(ServiceFlags::PERSISTENT);
        assert!(flags.contains(ServiceFlags::HASHED));
        let stripped = flags.without(ServiceFlags::HASHED);
        assert!(!stripped.contains(ServiceFlags::HASHED));
        assert!(stripped.contains(ServiceFlags::PERSISTENT));
    }

    #[test]
    fn real_server_key_ignores_weight() {
        let a = RealServer::new(Ipv4Addr::new(10, 0, 0, 1), 8080, 1);
        let b = RealServer::new(Ipv4Addr::new(10, 0, 0, 1), 8080, 5);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }
}
