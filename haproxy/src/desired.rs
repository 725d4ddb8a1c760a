// SPDX-License-Identifier: Apache-2.0

//! Projects `(services, endpoints)` onto the servers each HAProxy backend
//! needs, mirroring the desired-state derivation `bmlb-lvs` does for the
//! kernel data plane (spec.md §4.6).

use std::collections::HashMap;

use api::ServiceKey;
use k8s_openapi::api::core::v1::{Endpoints, EndpointSubset, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendServer {
    pub address: String,
    pub port: u16,
}

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

/// Every backend server this service's `svc_port` should forward to, one
/// entry per matching `(endpointAddress, endpointPort)` pair.
#[must_use]
pub fn backend_servers(
    svc_port: &ServicePort,
    endpoints: &[&Endpoints],
) -> Vec<BackendServer> {
    let target_port = svc_port
        .target_port
        .clone()
        .unwrap_or(IntOrString::Int(svc_port.port));
    let mut out = Vec::new();
    for ep in endpoints {
        let Some(subsets) = &ep.subsets else { continue };
        for subset in subsets {
            let resolved = resolve_target_port(&target_port, subset);
            if resolved == 0 {
                continue;
            }
            let Some(addresses) = &subset.addresses else {
                continue;
            };
            for addr in addresses {
                out.push(BackendServer {
                    address: addr.ip.clone(),
                    port: resolved,
                });
            }
        }
    }
    out
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

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn ep(addrs: &[&str], port_name: Option<&str>, port: i32) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta::default(),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    addrs
                        .iter()
                        .map(|ip| EndpointAddress {
                            ip: (*ip).to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                not_ready_addresses: None,
                ports: Some(vec![EndpointPort {
                    name: port_name.map(str::to_string),
                    port,
                    ..Default::default()
                }]),
            }]),
        }
    }

    #[test]
    fn resolves_named_target_port_per_subset() {
        let svc_port = ServicePort {
            port: 80,
            target_port: Some(IntOrString::String("http".to_string())),
            ..Default::default()
        };
        let endpoints = ep(&["10.0.0.1", "10.0.0.2"], Some("http"), 8080);
        let servers = backend_servers(&svc_port, &[&endpoints]);
        assert_eq!(
            servers,
            vec![
                BackendServer { address: "10.0.0.1".to_string(), port: 8080 },
                BackendServer { address: "10.0.0.2".to_string(), port: 8080 },
            ]
        );
    }

    #[test]
    fn unresolvable_named_port_is_skipped() {
        let svc_port = ServicePort {
            port: 80,
            target_port: Some(IntOrString::String("missing".to_string())),
            ..Default::default()
        };
        let endpoints = ep(&["10.0.0.1"], Some("http"), 8080);
        assert!(backend_servers(&svc_port, &[&endpoints]).is_empty());
    }
}
