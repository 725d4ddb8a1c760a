// SPDX-License-Identifier: Apache-2.0

//! `filterAndAllocatePorts` (spec.md §4.9.1): the two-pass reconciliation
//! between the persisted `bindedPort` annotation and a service's live
//! `spec.ports`.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Service, ServiceStatus,
};
use serde_json::{Value, json};

use api::annotations::ANNOTATION_BINDED_PORT;
use api::{BoundPorts, L4Protocol, ServiceKey, binded_port_annotation, has_ingress};
use port::{PortAllocator, PortAllocatorError};

/// Default allocation range (spec.md §3): `[29000, 29999]`.
pub const DEFAULT_PORT_MIN: u16 = 29000;
pub const DEFAULT_PORT_MAX: u16 = 29999;

/// One [`PortAllocator`] per transport protocol (spec.md §4.1, §5: the
/// allocator is reconciler-owned, but `revoke` may also be called from the
/// service-delete watch callback).
pub struct ProtocolAllocators {
    tcp: PortAllocator,
    udp: PortAllocator,
}

impl ProtocolAllocators {
    pub fn new(min: u16, max: u16) -> Result<Self, PortAllocatorError> {
        Ok(Self {
            tcp: PortAllocator::new(min, max)?,
            udp: PortAllocator::new(min, max)?,
        })
    }

    pub(crate) fn get(&self, proto: L4Protocol) -> &PortAllocator {
        match proto {
            L4Protocol::Tcp => &self.tcp,
            L4Protocol::Udp => &self.udp,
        }
    }

    /// Revoke every port recorded in `bound`, one call per port (S3). Used
    /// both by the reconciliation loop and by the service-delete callback.
    pub fn revoke_all(&self, bound: &BoundPorts) {
        for proto in L4Protocol::ALL {
            for p in bound.ports(proto) {
                self.get(proto).revoke(p);
            }
        }
    }
}

/// A service queued for a status/annotation patch, with the merge-patch
/// body already built (spec.md §4.9.2: "build a merge-patch JSON containing
/// only the relevant annotation keys").
pub struct PendingUpdate {
    pub key: ServiceKey,
    pub patch: Value,
}

fn expected_ports(svc: &Service) -> [BTreeSet<u16>; 2] {
    let mut expect = [BTreeSet::new(), BTreeSet::new()];
    let Some(ports) = svc.spec.as_ref().and_then(|s| s.ports.as_ref()) else {
        return expect;
    };
    for p in ports {
        let proto = p
            .protocol
            .as_deref()
            .and_then(L4Protocol::from_k8s_str)
            .unwrap_or(L4Protocol::Tcp);
        if let Ok(port) = u16::try_from(p.port) {
            expect[proto.index()].insert(port);
        }
    }
    expect
}

/// `filterAndAllocatePorts` (spec.md §4.9.1).
///
/// Returns `(filtered, needsUpdate)`: `filtered` is every `lb_svcs` entry
/// with its `bindedPort` annotation brought in sync with `spec.ports` (the
/// value the `LoadBalance` facade will render from); `needsUpdate` is the
/// subset that needs a cluster-API patch.
#[must_use]
pub fn filter_and_allocate_ports(
    lb_svcs: &[Service],
    allocators: &ProtocolAllocators,
    vip: Ipv4Addr,
) -> (Vec<Service>, Vec<PendingUpdate>) {
    // Pass 1: absorb persisted state so a restart doesn't invent conflicting
    // allocations for ports services already hold.
    for svc in lb_svcs {
        if let Some(bound) = binded_port_annotation(svc) {
            for proto in L4Protocol::ALL {
                for port in bound.ports(proto) {
                    allocators.get(proto).allocated(port);
                }
            }
        }
    }

    let mut filtered = Vec::with_capacity(lb_svcs.len());
    let mut needs_update = Vec::new();

    // Pass 2: reconcile to spec.
    for svc in lb_svcs {
        let mut allocated = binded_port_annotation(svc).unwrap_or_default();
        let expect = expected_ports(svc);
        let mut dirty = false;

        for proto in L4Protocol::ALL {
            for &want in &expect[proto.index()] {
                if !allocated.contains(proto, want) {
                    if allocators.get(proto).allocated(want) {
                        allocated.insert(proto, want);
                        dirty = true;
                    }
                    // else: owned by another service this tick, skip.
                }
            }
            let held: Vec<u16> = allocated.ports(proto).collect();
            for port in held {
                if !expect[proto.index()].contains(&port) {
                    allocated.remove(proto, port);
                    allocators.get(proto).revoke(port);
                    dirty = true;
                }
            }
        }

        let mut svc = svc.clone();
        if dirty {
            let encoded = allocated.encode();
            let set_ingress = !has_ingress(&svc);
            if set_ingress {
                let status = svc.status.get_or_insert_with(ServiceStatus::default);
                status.load_balancer = Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        ip: Some(vip.to_string()),
                        ..Default::default()
                    }]),
                });
            }
            svc.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(ANNOTATION_BINDED_PORT.to_string(), encoded.clone());

            if let Some(key) = ServiceKey::from_service(&svc) {
                let mut patch = json!({
                    "metadata": {
                        "annotations": { ANNOTATION_BINDED_PORT: encoded },
                    },
                });
                if set_ingress {
                    patch["status"] = json!({
                        "loadBalancer": { "ingress": [{ "ip": vip.to_string() }] },
                    });
                }
                needs_update.push(PendingUpdate { key, patch });
            }
        }
        filtered.push(svc);
    }

    (filtered, needs_update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn lb_svc(name: &str, ports: &[(i32, &str)], annotation: Option<&str>) -> Service {
        let mut annotations = BTreeMap::new();
        if let Some(a) = annotation {
            annotations.insert(ANNOTATION_BINDED_PORT.to_string(), a.to_string());
        }
        Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                annotations: Some(annotations.into_iter().collect()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(
                    ports
                        .iter()
                        .map(|(port, proto)| ServicePort {
                            port: *port,
                            protocol: Some((*proto).to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn fresh_service_allocates_its_spec_ports_and_is_marked_dirty() {
        let allocators = ProtocolAllocators::new(29000, 29999).unwrap();
        let svc = lb_svc("web", &[(80, "TCP"), (53, "UDP")], None);
        let (filtered, needs_update) = filter_and_allocate_ports(&[svc], &allocators, Ipv4Addr::new(10, 0, 0, 2));

        assert_eq!(filtered.len(), 1);
        assert_eq!(needs_update.len(), 1);
        let bound = binded_port_annotation(&filtered[0]).unwrap();
        assert!(bound.contains(L4Protocol::Tcp, 80));
        assert!(bound.contains(L4Protocol::Udp, 53));
        assert_eq!(
            needs_update[0].patch["status"]["loadBalancer"]["ingress"][0]["ip"],
            "10.0.0.2"
        );
    }

    #[test]
    fn already_reconciled_service_is_left_untouched() {
        let allocators = ProtocolAllocators::new(29000, 29999).unwrap();
        let svc = lb_svc("web", &[(80, "TCP")], Some("80;"));
        let (filtered, needs_update) = filter_and_allocate_ports(&[svc], &allocators, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(filtered.len(), 1);
        assert!(needs_update.is_empty());
    }

    #[test]
    fn port_dropped_from_spec_is_revoked_and_reannotated() {
        let allocators = ProtocolAllocators::new(29000, 29999).unwrap();
        let svc = lb_svc("web", &[(443, "TCP")], Some("80,443;"));
        let (filtered, needs_update) = filter_and_allocate_ports(&[svc], &allocators, Ipv4Addr::new(10, 0, 0, 2));
        let bound = binded_port_annotation(&filtered[0]).unwrap();
        assert!(!bound.contains(L4Protocol::Tcp, 80));
        assert!(bound.contains(L4Protocol::Tcp, 443));
        assert_eq!(needs_update.len(), 1);
        assert!(allocators.tcp.allocated(80), "revoked port must be free again");
    }

    #[test]
    fn two_services_racing_for_the_same_port_only_one_wins() {
        let allocators = ProtocolAllocators::new(29000, 29999).unwrap();
        let a = lb_svc("a", &[(80, "TCP")], None);
        let b = lb_svc("b", &[(80, "TCP")], None);
        let (filtered, needs_update) = filter_and_allocate_ports(&[a, b], &allocators, Ipv4Addr::new(10, 0, 0, 2));
        let bound_a = binded_port_annotation(&filtered[0]).unwrap();
        let bound_b = binded_port_annotation(&filtered[1]).unwrap();
        assert!(bound_a.contains(L4Protocol::Tcp, 80));
        assert!(bound_b.is_empty(), "second claimant must not get the port");
        assert_eq!(needs_update.len(), 1);
    }
}
