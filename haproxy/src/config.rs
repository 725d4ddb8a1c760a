// SPDX-License-Identifier: Apache-2.0

//! Renders `(lbSvcs, endpoints)` into an HAProxy configuration file, the
//! user-space alternative to the kernel IPVS table (spec.md §4.6).
//!
//! Grounded on the original controller's three hand-rolled `text/template`
//! strings (`haproxy/template.go`): a fixed `global`/`listen stats` header,
//! one `frontend` block per bound port, and one `backend` block per
//! frontend. This renderer keeps the same three-section shape but builds it
//! with `write!` rather than carrying a templating engine neither the
//! teacher nor the rest of the pack reaches for.

use std::fmt::Write as _;

use api::ServiceKey;
use k8s_openapi::api::core::v1::{Endpoints, Service};

use crate::desired::{backend_servers, build_endpoints_map};

const STATS_BIND_PORT: u16 = 8081;
const STATS_AUTH: &str = "admin:admin";

const HEADER: &str = "# bmlb-haproxy generated configuration\nglobal\n\tmaxconn\t20000\n\tulimit-n\t16384\n\tlog\t127.0.0.1\tlocal0\n\tdaemon\n";

fn write_stats_section(out: &mut String) {
    let _ = writeln!(out, "\nlisten stats");
    let _ = writeln!(out, "\tbind\t:{STATS_BIND_PORT}");
    let _ = writeln!(out, "\tmode\thttp");
    let _ = writeln!(out, "\tstats\tenable");
    let _ = writeln!(out, "\tstats\thide-version");
    let _ = writeln!(out, "\tstats\turi\t/");
    let _ = writeln!(out, "\tstats\tauth\t{STATS_AUTH}");
}

fn frontend_backend_name(key: &ServiceKey, port: u16) -> String {
    format!("{}-{}-{port}", key.namespace, key.name)
}

fn write_frontend(out: &mut String, name: &str, bind_ip: &str, port: u16, default_backend: &str) {
    let _ = writeln!(out, "\nfrontend {name}");
    let _ = writeln!(out, "\tbind\t{bind_ip}:{port}");
    let _ = writeln!(out, "\tlog\tglobal");
    let _ = writeln!(out, "\toption\tdontlognull");
    let _ = writeln!(out, "\tmaxconn\t8000");
    let _ = writeln!(out, "\ttimeout\tclient\t30s");
    let _ = writeln!(out, "\tdefault_backend\t{default_backend}");
}

fn write_backend(out: &mut String, name: &str, servers: &[crate::desired::BackendServer]) {
    let _ = writeln!(out, "\nbackend {name}");
    let _ = writeln!(out, "\ttimeout\tconnect\t5s");
    let _ = writeln!(out, "\ttimeout\tserver\t5s");
    let _ = writeln!(out, "\tretries\t2");
    let _ = writeln!(out, "\tbalance\troundrobin");
    for (i, server) in servers.iter().enumerate() {
        let _ = writeln!(out, "\tserver\t{name}-{i}\t{}:{}\tcheck", server.address, server.port);
    }
}

/// Pure function from `(lbSvcs, endpoints)` to a complete configuration file
/// (spec.md §4.6). A service whose resolved backend servers are empty is
/// skipped entirely — no dangling frontend pointed at an empty backend.
#[must_use]
pub fn render(lb_svcs: &[Service], endpoints: &[Endpoints], bind_ip: &str) -> String {
    let mut out = String::from(HEADER);
    write_stats_section(&mut out);

    let endpoints_map = build_endpoints_map(lb_svcs, endpoints);
    for svc in lb_svcs {
        let Some(key) = ServiceKey::from_service(svc) else {
            continue;
        };
        let Some(ports) = svc.spec.as_ref().and_then(|s| s.ports.as_ref()) else {
            continue;
        };
        let svc_endpoints = endpoints_map.get(&key).map_or(&[][..], Vec::as_slice);
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        for svc_port in ports {
            let servers = backend_servers(svc_port, svc_endpoints);
            if servers.is_empty() {
                continue;
            }
            let name = frontend_backend_name(&key, svc_port.port as u16);
            write_frontend(&mut out, &name, bind_ip, svc_port.port as u16, &name);
            write_backend(&mut out, &name, &servers);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, ServicePort, ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn svc(name: &str, ports: Vec<ServicePort>) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(ports),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn ep(name: &str, addrs: &[&str], port: i32) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
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
                ports: Some(vec![EndpointPort { port, ..Default::default() }]),
            }]),
        }
    }

    #[test]
    fn header_always_contains_stats_section() {
        let cfg = render(&[], &[], "0.0.0.0");
        assert!(cfg.contains("listen stats"));
        assert!(cfg.contains("bind\t:8081"));
        assert!(cfg.contains("admin:admin"));
    }

    #[test]
    fn renders_one_frontend_and_backend_per_bound_port() {
        let s = svc(
            "web",
            vec![ServicePort {
                port: 80,
                target_port: Some(IntOrString::Int(8080)),
                ..Default::default()
            }],
        );
        let e = ep("web", &["10.0.0.1"], 8080);
        let cfg = render(&[s], &[e], "0.0.0.0");
        assert!(cfg.contains("frontend default-web-80"));
        assert!(cfg.contains("bind\t0.0.0.0:80"));
        assert!(cfg.contains("backend default-web-80"));
        assert!(cfg.contains("server\tdefault-web-80-0\t10.0.0.1:8080\tcheck"));
    }

    #[test]
    fn service_without_endpoints_is_skipped() {
        let s = svc(
            "empty",
            vec![ServicePort { port: 80, ..Default::default() }],
        );
        let cfg = render(&[s], &[], "0.0.0.0");
        assert!(!cfg.contains("frontend"));
    }
}
