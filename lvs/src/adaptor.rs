// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use tracing::warn;

use api::L4Protocol;
use ipvs::{IpvsDriver, RealServer, VirtualServer};
use netfilter::{IpsetDriver, IptablesDriver, IpsetEntry, SetType, SysctlDriver, VIP_VPORT_SET, diff_entries, ensure_base_rules};
use rekon::Reconcile;

use crate::desired::{build_endpoints_map, build_port_service_map, expect_real_servers};

/// Everything needed to derive the desired kernel state for one
/// reconciliation tick (spec.md §4.5 Inputs).
pub struct LvsRequirement<'a> {
    pub lb_svcs: &'a [Service],
    pub endpoints: &'a [Endpoints],
}

/// Outcome of one `build()`/`reconcile()` call, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub virtual_servers_created: u32,
    pub virtual_servers_deleted: u32,
    pub real_servers_created: u32,
    pub real_servers_deleted: u32,
    pub warnings: Vec<String>,
}

impl BuildReport {
    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Reconciles the kernel IPVS table, the `bmlb-vip-vport` ipset, and the
/// MARK/MASQUERADE iptables rules against one VIP (spec.md §4.5).
pub struct LvsAdaptor {
    ipvs: Arc<dyn IpvsDriver>,
    ipset: Arc<dyn IpsetDriver>,
    iptables: Arc<dyn IptablesDriver>,
    sysctl: Arc<dyn SysctlDriver>,
    vip: Ipv4Addr,
    remove_old_vs: bool,
}

impl LvsAdaptor {
    #[must_use]
    pub fn new(
        ipvs: Arc<dyn IpvsDriver>,
        ipset: Arc<dyn IpsetDriver>,
        iptables: Arc<dyn IptablesDriver>,
        sysctl: Arc<dyn SysctlDriver>,
        vip: Ipv4Addr,
        remove_old_vs: bool,
    ) -> Self {
        Self {
            ipvs,
            ipset,
            iptables,
            sysctl,
            vip,
            remove_old_vs,
        }
    }

    fn ensure_preconditions(&self, report: &mut BuildReport) {
        if let Err(e) = self.sysctl.ensure("net/ipv4/vs/conntrack", 1) {
            warn!(error = %e, "failed to ensure net/ipv4/vs/conntrack");
            report.warn(format!("sysctl ensure failed: {e}"));
        }
        if let Err(e) = self.ipset.create_set(VIP_VPORT_SET, SetType::HashIpPort, true) {
            warn!(error = %e, set = VIP_VPORT_SET, "failed to create ipset");
            report.warn(format!("ipset create failed: {e}"));
        }
        for e in ensure_base_rules(self.iptables.as_ref()) {
            warn!(error = %e, "failed to ensure iptables rule");
            report.warn(format!("iptables ensure failed: {e}"));
        }
    }

    /// §4.5.1: diff the ipset's membership against the ports this VIP
    /// should be listening on and converge it.
    fn build_iptables(
        &self,
        port_service_map: &crate::desired::PortServiceMap<'_>,
        report: &mut BuildReport,
    ) {
        let expected: std::collections::HashSet<String> = L4Protocol::ALL
            .into_iter()
            .flat_map(|proto| {
                port_service_map[proto.index()].keys().map(move |&port| {
                    IpsetEntry {
                        address: self.vip,
                        protocol: proto,
                        port,
                    }
                    .to_string()
                })
            })
            .collect();

        let existing = match self.ipset.list_entries(VIP_VPORT_SET) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to list ipset entries");
                report.warn(format!("ipset list failed: {e}"));
                return;
            }
        };

        let (to_add, to_remove) = diff_entries(&existing, &expected, self.remove_old_vs);
        for entry in to_remove {
            if let Err(e) = self.ipset.del_entry(&entry, VIP_VPORT_SET) {
                warn!(error = %e, entry, "failed to delete ipset entry");
                report.warn(format!("ipset del {entry} failed: {e}"));
            }
        }
        for entry in to_add {
            if let Err(e) = self.ipset.add_entry(&entry, VIP_VPORT_SET, true) {
                warn!(error = %e, entry, "failed to add ipset entry");
                report.warn(format!("ipset add {entry} failed: {e}"));
            }
        }
    }

    /// Populate a just-created virtual server's real servers unconditionally
    /// (spec.md §4.5 step 1's create path: "create the virtual server... then
    /// add all its expected real servers"). `vs` is known-empty, so there is
    /// nothing to diff against and no need to read it back first.
    fn add_real_servers(&self, vs: &VirtualServer, expect: std::collections::HashMap<String, RealServer>, report: &mut BuildReport) {
        for (_, rs) in expect {
            if let Err(e) = self.ipvs.add_real_server(vs, &rs) {
                warn!(error = %e, real_server = %rs, "failed to add real server");
                report.warn(format!("add real server {rs} failed: {e}"));
            } else {
                report.real_servers_created += 1;
            }
        }
    }

    fn reconcile_real_servers(
        &self,
        vs: &VirtualServer,
        mut expect: std::collections::HashMap<String, RealServer>,
        report: &mut BuildReport,
    ) {
        match self.ipvs.get_real_servers(vs) {
            Ok(existing) => {
                for rs in existing {
                    if expect.remove(&rs.key()).is_none() {
                        if let Err(e) = self.ipvs.delete_real_server(vs, &rs) {
                            warn!(error = %e, real_server = %rs, "failed to delete real server");
                            report.warn(format!("delete real server {rs} failed: {e}"));
                        } else {
                            report.real_servers_deleted += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, virtual_server = %vs, "failed to get real servers");
                report.warn(format!("get real servers for {vs} failed: {e}"));
                return;
            }
        }
        for (_, rs) in expect {
            if let Err(e) = self.ipvs.add_real_server(vs, &rs) {
                warn!(error = %e, real_server = %rs, "failed to add real server");
                report.warn(format!("add real server {rs} failed: {e}"));
            } else {
                report.real_servers_created += 1;
            }
        }
    }

    /// Run one reconciliation tick. See spec.md §4.5 "Reconciliation
    /// algorithm" for the full step-by-step description this mirrors.
    pub fn build(&self, lb_svcs: &[Service], endpoints: &[Endpoints]) -> BuildReport {
        let mut report = BuildReport::default();
        self.ensure_preconditions(&mut report);

        let mut port_service_map = build_port_service_map(lb_svcs);
        let endpoints_map = build_endpoints_map(lb_svcs, endpoints);

        self.build_iptables(&port_service_map, &mut report);

        let vss = match self.ipvs.get_virtual_servers() {
            Ok(vss) => vss,
            Err(e) => {
                warn!(error = %e, "failed to list virtual servers");
                report.warn(format!("get virtual servers failed: {e}"));
                return report;
            }
        };

        for vs in &vss {
            if vs.address != self.vip {
                // Foreign VIP: this controller owns exactly one VIP, so
                // anything else in the table is stale. A future version may
                // want a "leave user rules alone" mode (spec.md §4.5).
                if let Err(e) = self.ipvs.delete_virtual_server(vs) {
                    warn!(error = %e, virtual_server = %vs, "failed to delete foreign virtual server");
                    report.warn(format!("delete foreign vs {vs} failed: {e}"));
                } else {
                    report.virtual_servers_deleted += 1;
                }
                continue;
            }

            let svcs = port_service_map[vs.protocol.index()].remove(&vs.port);
            match svcs {
                None => {
                    if let Err(e) = self.ipvs.delete_virtual_server(vs) {
                        warn!(error = %e, virtual_server = %vs, "failed to delete stale virtual server");
                        report.warn(format!("delete stale vs {vs} failed: {e}"));
                    } else {
                        report.virtual_servers_deleted += 1;
                    }
                }
                Some(svcs) => {
                    let expect = expect_real_servers(&svcs, &endpoints_map, vs.port);
                    self.reconcile_real_servers(vs, expect, &mut report);
                }
            }
        }

        for proto in L4Protocol::ALL {
            for (port, svcs) in std::mem::take(&mut port_service_map[proto.index()]) {
                let vs = VirtualServer::new(self.vip, proto, port).with_scheduler("rr");
                if let Err(e) = self.ipvs.add_virtual_server(&vs) {
                    warn!(error = %e, virtual_server = %vs, "failed to add virtual server");
                    report.warn(format!("add vs {vs} failed: {e}"));
                    continue;
                }
                report.virtual_servers_created += 1;
                let expect = expect_real_servers(&svcs, &endpoints_map, port);
                self.add_real_servers(&vs, expect, &mut report);
            }
        }

        report
    }
}

impl Reconcile for LvsAdaptor {
    type Requirement<'a> = LvsRequirement<'a>;
    type Observation<'a> = ();
    type Outcome<'a> = BuildReport;

    /// The LVS adaptor self-observes: it re-reads the kernel table on every
    /// tick rather than taking a separately-fetched observation, matching
    /// the original's `a.lvsHandler.GetVirtualServers()` call inside
    /// `Build`.
    fn reconcile<'a>(
        &self,
        requirement: Self::Requirement<'a>,
        _observation: Self::Observation<'a>,
    ) -> impl Future<Output = Self::Outcome<'a>> + Send
    where
        Self: 'a,
    {
        let report = self.build(requirement.lb_svcs, requirement.endpoints);
        async move { report }
    }
}
