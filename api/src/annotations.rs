// SPDX-License-Identifier: Apache-2.0

//! Codec for the two annotation keys this controller owns on `LoadBalancer`
//! services (spec.md §6).

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::protocol::L4Protocol;

/// `v1.status.bmlb.l4/bindedPort` — controller-owned, records the ports bound
/// on the VIP for a service. This is a stable on-disk format: round-tripping
/// a non-empty [`BoundPorts`] through [`BoundPorts::encode`] and
/// [`BoundPorts::decode`] must reproduce the same set of ports per protocol,
/// modulo ordering.
pub const ANNOTATION_BINDED_PORT: &str = "v1.status.bmlb.l4/bindedPort";

/// `v1.bmlb.l4/weight` — optional, advisory per-backend-index weight map.
pub const ANNOTATION_WEIGHT: &str = "v1.bmlb.l4/weight";

/// The ports a `LoadBalancer` service has bound on the VIP, split by
/// protocol. Held in sorted order internally so that [`BoundPorts::encode`]
/// output is deterministic, which keeps unit tests (and diffing against a
/// previous annotation value) simple; the wire format does not require
/// ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundPorts {
    tcp: BTreeMap<u16, ()>,
    udp: BTreeMap<u16, ()>,
}

impl BoundPorts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, proto: L4Protocol, port: u16) {
        match proto {
            L4Protocol::Tcp => self.tcp.insert(port, ()),
            L4Protocol::Udp => self.udp.insert(port, ()),
        };
    }

    pub fn remove(&mut self, proto: L4Protocol, port: u16) {
        match proto {
            L4Protocol::Tcp => self.tcp.remove(&port),
            L4Protocol::Udp => self.udp.remove(&port),
        };
    }

    #[must_use]
    pub fn contains(&self, proto: L4Protocol, port: u16) -> bool {
        match proto {
            L4Protocol::Tcp => self.tcp.contains_key(&port),
            L4Protocol::Udp => self.udp.contains_key(&port),
        }
    }

    pub fn ports(&self, proto: L4Protocol) -> impl Iterator<Item = u16> + '_ {
        match proto {
            L4Protocol::Tcp => self.tcp.keys().copied(),
            L4Protocol::Udp => self.udp.keys().copied(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.udp.is_empty()
    }

    /// Encode as `<tcp-ports>;<udp-ports>`, each a comma-list of decimal
    /// integers. The trailing section is always emitted, even when empty, so
    /// that the semicolon separator is present regardless (spec.md §4.2).
    #[must_use]
    pub fn encode(&self) -> String {
        let tcp = self
            .tcp
            .keys()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let udp = self
            .udp
            .keys()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{tcp};{udp}")
    }

    /// Decode the annotation value. A missing trailing section (no `;`)
    /// defaults to an empty UDP list. Unparsable tokens (empty strings from a
    /// trailing comma, non-numeric garbage) are silently discarded — this is
    /// one of the "silently skip" cases in spec.md §7.
    #[must_use]
    pub fn decode(value: &str) -> Self {
        let mut sections = value.splitn(2, ';');
        let tcp_section = sections.next().unwrap_or_default();
        let udp_section = sections.next().unwrap_or_default();

        let mut bound = BoundPorts::new();
        for port in Self::parse_section(tcp_section) {
            bound.insert(L4Protocol::Tcp, port);
        }
        for port in Self::parse_section(udp_section) {
            bound.insert(L4Protocol::Udp, port);
        }
        bound
    }

    fn parse_section(section: &str) -> impl Iterator<Item = u16> + '_ {
        section
            .split(',')
            .filter(|tok| !tok.is_empty())
            .filter_map(|tok| tok.trim().parse::<u16>().ok())
    }
}

/// `v1.bmlb.l4/weight` — a JSON object mapping backend index to weight.
/// Decoded but, per spec.md §9 Open Questions, not applied to real servers in
/// this version; see DESIGN.md for the resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightMap(HashMap<u32, u32>);

impl WeightMap {
    #[must_use]
    pub fn decode(value: &str) -> Self {
        serde_json::from_str(value).map(WeightMap).unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<u32> {
        self.0.get(&index).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_preserves_two_sections_when_one_empty() {
        let mut b = BoundPorts::new();
        b.insert(L4Protocol::Tcp, 80);
        b.insert(L4Protocol::Tcp, 443);
        assert_eq!(b.encode(), "80,443;");

        let mut b = BoundPorts::new();
        b.insert(L4Protocol::Udp, 53);
        assert_eq!(b.encode(), ";53");
    }

    #[test]
    fn decode_defaults_missing_udp_section_to_empty() {
        let b = BoundPorts::decode("80,443");
        assert_eq!(b.ports(L4Protocol::Tcp).collect::<Vec<_>>(), vec![80, 443]);
        assert_eq!(b.ports(L4Protocol::Udp).count(), 0);
    }

    #[test]
    fn decode_discards_unparsable_tokens() {
        let b = BoundPorts::decode("80,,abc,443;,9000,");
        assert_eq!(b.ports(L4Protocol::Tcp).collect::<Vec<_>>(), vec![80, 443]);
        assert_eq!(b.ports(L4Protocol::Udp).collect::<Vec<_>>(), vec![9000]);
    }

    #[test]
    fn round_trips_modulo_ordering() {
        for value in ["80,443;53", ";", "70,80;8080", ";8080"] {
            let decoded = BoundPorts::decode(value);
            let encoded = decoded.encode();
            assert_eq!(BoundPorts::decode(&encoded), decoded, "value={value}");
        }
    }

    #[test]
    fn weight_map_decodes_json_object() {
        let w = WeightMap::decode(r#"{"0": 5, "1": 10}"#);
        assert_eq!(w.get(0), Some(5));
        assert_eq!(w.get(1), Some(10));
        assert_eq!(w.get(2), None);
    }

    #[test]
    fn weight_map_defaults_on_malformed_json() {
        let w = WeightMap::decode("not json");
        assert!(w.is_empty());
    }
}
