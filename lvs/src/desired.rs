// SPDX-License-Identifier: Apache-2.0

//! Desired-state derivation: turning `(services, endpoints)` into the
//! `portServiceMap`/`endpointsMap` the reconciliation algorithm diffs
//! against (spec.md §4.5 "Desired-state derivation" and §4.5.2).

use std::collections::{BTreeMap, HashMap};

use api::{L4Protocol, ServiceKey, binded_port_annotation};
use k8s_openapi::api::core::v1::{Endpoints, EndpointSubset, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::RealServer;

/// `portServiceMap[protoIdx][port] -> services bound to that (protocol,
/// port)`. Built from the `bindedPort` annotation, not `spec.ports[*].port`
/// — those are allowed to differ (spec.md §4.5).
pub type PortServiceMap<'a> = [BTreeMap<u16, Vec<&'a Service>>; 2];

#[must_use]
pub fn build_port_service_map(lb_svcs: &[Service]) -> PortServiceMap<'_> {
    let mut map: PortServiceMap<'_> = [BTreeMap::new(), BTreeMap::new()];
    for svc in lb_svcs {
        let Some(bound) = binded_port_annotation(svc) else {
            continue;
        };
        for proto in L4Protocol::ALL {
            for port in bound.ports(proto) {
                map[proto.index()].entry(port).or_default().push(svc);
            }
        }
    }
    map
}

/// `(namespace, name) -> Endpoints objects for that service`. A service with
/// no matching `Endpoints` yet simply maps to an empty vec — the original's
/// `endpointsMap[svc.Namespace][svc.Name] = []` initialization.
#[must_use]
pub fn build_endpoints_map<'a>(
    lb_svcs: &[Service],
    endpoints: &'a [Endpoints],
) -> HashMap<ServiceKey, Vec<&'a Endpoints>> {
    let mut map: HashMap<ServiceKey, Vec<&'a Endpoints>> = lb_svcs
        .iter()
        .filter_map(ServiceKey::from_service)
        .map(|key| (key, Vec::new()))
        .collect();
    for ep in endpoints {
        if let Some(key) = ServiceKey::from_metadata(&ep.metadata) {
            if let Some(bucket) = map.get_mut(&key) {
                bucket.push(ep);
            }
        }
    }
    map
}

/// Project a set of services sharing a `(proto, port)` virtual server onto
/// their expected real servers, keyed by `"address:port"` (spec.md §4.5.2).
#[must_use]
pub fn expect_real_servers(
    svcs: &[&Service],
    endpoints_map: &HashMap<ServiceKey, Vec<&Endpoints>>,
    bound_port: u16,
) -> HashMap<String, RealServer> {
    let mut out = HashMap::new();
    for svc in svcs {
        let Some(key) = ServiceKey::from_service(svc) else {
            continue;
        };
        let edpts = endpoints_map.get(&key).map_or(&[][..], Vec::as_slice);
        if edpts.is_empty() {
            continue;
        }
        let Some(target_port) = target_port_for(svc, bound_port) else {
            // svc.spec.ports has no entry at this bound port: should never
            // happen since the port came from this service's own annotation.
            continue;
        };
        let svc_port_len = svc
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map_or(0, Vec::len);
        for ep in edpts {
            add_expect_real_servers(&mut out, ep, &target_port, svc_port_len);
        }
    }
    out
}

/// Locate `svc.spec.ports[i].targetPort` for the port entry whose `port ==
/// bound_port`. Resolves spec.md §9's Open Question by indexing via
/// `spec.ports`, not the annotation's internal ordering — see DESIGN.md.
fn target_port_for(svc: &Service, bound_port: u16) -> Option<IntOrString> {
    let ports = svc.spec.as_ref()?.ports.as_ref()?;
    #[allow(clippy::cast_sign_loss)] // spec.ports[*].port is always positive
    ports
        .iter()
        .find(|p| p.port as u16 == bound_port)
        .map(|p| p.target_port.clone().unwrap_or(IntOrString::Int(i32::from(bound_port))))
}

fn add_expect_real_servers(
    out: &mut HashMap<String, RealServer>,
    ep: &Endpoints,
    target_port: &IntOrString,
    svc_port_len: usize,
) {
    let Some(subsets) = &ep.subsets else {
        return;
    };
    for subset in subsets {
        let subset_port_len = subset.ports.as_ref().map_or(0, Vec::len);
        // Legacy rule (spec.md §4.5.2 step 4): a subset whose port count
        // doesn't match the service's is considered transiently out of sync.
        if subset_port_len != svc_port_len {
            continue;
        }
        let resolved_port = resolve_target_port(target_port, subset);
        if resolved_port == 0 {
            continue;
        }
        let Some(addresses) = &subset.addresses else {
            continue;
        };
        for addr in addresses {
            let Ok(address) = addr.ip.parse() else {
                continue;
            };
            let rs = RealServer::new(address, resolved_port, 1);
            out.insert(rs.key(), rs);
        }
    }
}

fn resolve_target_port(target_port: &IntOrString, subset: &EndpointSubset) -> u16 {
    match target_port {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        IntOrString::Int(i) => (*i).max(0) as u16,
        IntOrString::String(name) => subset
            .ports
            .as_ref()
            .into_iter()
            .flatten()
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .map_or(0, |p| {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    p.port.max(0) as u16
                }
            }),
    }
}
